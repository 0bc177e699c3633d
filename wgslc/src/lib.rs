//! # wgslc: a WGSL compiler.
//!
//! The pipeline is linear: source text is lexed and parsed into an AST,
//! lowered into a shader-agnostic IR, optionally validated, and handed to
//! one of four backends.
//!
//! ```ignore
//! let spirv = wgslc::compile(source, &wgslc::Options::default())?;
//!
//! let module = wgslc::lower(&wgslc::parse(source)?)?.0;
//! let (msl, info) = wgslc::generate_msl(&module, &wgslc::msl::Options::default())?;
//! ```
//!
//! Each phase returns its output or the first error it hit; nothing is
//! retried and nothing is partially emitted. Warnings (currently only
//! unused-binding reports from the lowerer) never block compilation and are
//! available through [`compile_with_warnings`].
//!
//! A compilation shares no state with any other: every call owns its
//! module, registries and scratch buffers, so separate compilations are
//! free to run on separate threads.

use thiserror::Error;

pub use wgslc_back::{glsl, hlsl, msl, spv, BoundsCheckPolicies, BoundsCheckPolicy, TranslationInfo};
pub use wgslc_core::{Module, ValidationError, ValidationFlags, Validator};
pub use wgslc_front::{ast, format_error, LowerError, ParseError, Span, Warning};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Lower(#[from] LowerError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("SPIR-V backend error: {0}")]
    SpirV(#[from] spv::Error),
    #[error("MSL backend error: {0}")]
    Msl(#[from] msl::Error),
    #[error("GLSL backend error: {0}")]
    Glsl(#[from] glsl::Error),
    #[error("HLSL backend error: {0}")]
    Hlsl(#[from] hlsl::Error),
}

impl Error {
    /// Render the error against the source with a caret line, when the
    /// error carries a span.
    pub fn emit_to_string(&self, source: &str) -> String {
        match *self {
            Error::Parse(ref e) => format_error(&e.to_string(), e.span(), source),
            Error::Lower(ref e) => format_error(&e.to_string(), e.span(), source),
            ref other => format!("error: {}", other),
        }
    }
}

/// One-shot compilation options.
#[derive(Clone, Debug)]
pub struct Options {
    pub spirv: spv::Options,
    /// Run the validator between lowering and emission.
    pub validate: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            spirv: spv::Options::default(),
            validate: true,
        }
    }
}

/// Parse WGSL source text into an AST.
pub fn parse(source: &str) -> Result<ast::TranslationUnit, Error> {
    Ok(wgslc_front::parse_str(source)?)
}

/// Lower a parsed AST into an IR module, collecting non-fatal warnings.
pub fn lower(tu: &ast::TranslationUnit) -> Result<(Module, Vec<Warning>), Error> {
    Ok(wgslc_front::lower::lower(tu)?)
}

/// Check a lowered module. An empty list means the module is well-formed.
pub fn validate(module: &Module) -> Vec<ValidationError> {
    Validator::new(ValidationFlags::all()).validate(module)
}

/// Emit a SPIR-V binary, as bytes in little-endian word order.
pub fn generate_spirv(module: &Module, options: &spv::Options) -> Result<Vec<u8>, Error> {
    Ok(spv::write_bytes(module, options)?)
}

/// Emit Metal Shading Language source.
pub fn generate_msl(
    module: &Module,
    options: &msl::Options,
) -> Result<(String, TranslationInfo), Error> {
    Ok(msl::write_string(module, options)?)
}

/// Emit GLSL source for the entry point named in the options.
pub fn generate_glsl(
    module: &Module,
    options: &glsl::Options,
) -> Result<(String, TranslationInfo), Error> {
    Ok(glsl::write_string(module, options)?)
}

/// Emit HLSL source.
pub fn generate_hlsl(
    module: &Module,
    options: &hlsl::Options,
) -> Result<(String, TranslationInfo), Error> {
    Ok(hlsl::write_string(module, options)?)
}

/// Compile WGSL source to SPIR-V in one step.
pub fn compile(source: &str, options: &Options) -> Result<Vec<u8>, Error> {
    compile_with_warnings(source, options).map(|(bytes, _)| bytes)
}

/// Like [`compile`], also surfacing the lowerer's warnings.
pub fn compile_with_warnings(
    source: &str,
    options: &Options,
) -> Result<(Vec<u8>, Vec<Warning>), Error> {
    let tu = parse(source)?;
    let (module, warnings) = lower(&tu)?;
    if options.validate {
        if let Some(error) = validate(&module).into_iter().next() {
            return Err(Error::Validation(error));
        }
    }
    let bytes = generate_spirv(&module, &options.spirv)?;
    log::debug!(
        "compiled {} bytes of WGSL into {} bytes of SPIR-V with {} warnings",
        source.len(),
        bytes.len(),
        warnings.len()
    );
    Ok((bytes, warnings))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation_failures_surface_the_first_error() {
        // Two resources on the same binding point.
        let source = "
            @group(0) @binding(0) var<uniform> a: vec4<f32>;
            @group(0) @binding(0) var<uniform> b: vec4<f32>;
        ";
        let err = compile(source, &Options::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn validation_can_be_skipped() {
        let source = "
            @group(0) @binding(0) var<uniform> a: vec4<f32>;
            @group(0) @binding(0) var<uniform> b: vec4<f32>;
        ";
        let options = Options {
            validate: false,
            ..Options::default()
        };
        assert!(compile(source, &options).is_ok());
    }

    #[test]
    fn parse_errors_format_with_a_caret() {
        let source = "fn f( {";
        let err = compile(source, &Options::default()).unwrap_err();
        let rendered = err.emit_to_string(source);
        assert!(rendered.contains("error:"));
        assert!(rendered.contains('^'));
    }
}
