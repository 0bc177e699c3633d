//! # wgslc-front: the WGSL frontend.
//!
//! Three stages, each feeding the next:
//!
//! 1. [`lex`] turns source text into spanned tokens;
//! 2. [`parse`] builds the [`ast`] by recursive descent;
//! 3. [`lower`] resolves names and types and produces the IR module defined
//!    in `wgslc-core`.
//!
//! Each stage reports its first error and stops. Errors carry byte spans;
//! [`format_error`] renders them against the source with a caret line.

pub mod ast;
pub mod lex;
pub mod lower;
pub mod parse;

pub use lex::{LexError, Span};
pub use lower::{LowerError, Warning, WarningKind};
pub use parse::{parse_str, ParseError};

use wgslc_core::Module;

/// Parse and lower in one step.
pub fn translate(source: &str) -> Result<(Module, Vec<Warning>), FrontError> {
    let tu = parse_str(source)?;
    let (module, warnings) = lower::lower(&tu)?;
    Ok((module, warnings))
}

/// Any error the frontend can produce.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FrontError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Lower(#[from] LowerError),
}

impl FrontError {
    pub fn span(&self) -> Span {
        match *self {
            FrontError::Parse(ref e) => e.span(),
            FrontError::Lower(ref e) => e.span(),
        }
    }

    /// Render the error against its source with a caret line:
    ///
    /// ```text
    /// error: no declaration named `foo` in scope
    ///   --> 3:12
    ///    |     return foo;
    ///    |            ^^^
    /// ```
    pub fn emit_to_string(&self, source: &str) -> String {
        format_error(&self.to_string(), self.span(), source)
    }
}

/// Format a message and span against the source text.
pub fn format_error(message: &str, span: Span, source: &str) -> String {
    let (line, column, text) = span.locate(source);
    // Clip the caret to the reported line.
    let remaining = text.len().saturating_sub(column - 1).max(1);
    let width = ((span.end - span.start) as usize).clamp(1, remaining);
    let caret = format!("{}{}", " ".repeat(column - 1), "^".repeat(width));
    format!("error: {message}\n  --> {line}:{column}\n   | {text}\n   | {caret}")
}

#[cfg(test)]
mod test {
    use super::*;
    use wgslc_core::{
        AddressSpace, Expression, ScalarKind, Statement, TypeInner, ValidationFlags, Validator,
    };

    fn module(source: &str) -> Module {
        let (module, _) = translate(source).unwrap();
        module
    }

    #[test]
    fn forward_function_references_resolve() {
        let module = module("fn main() { helper(); } fn helper() {}");
        assert_eq!(module.functions.len(), 2);
        let main = module
            .functions
            .iter()
            .find(|(_, f)| f.name.as_deref() == Some("main"))
            .unwrap()
            .1;
        assert!(main
            .body
            .iter()
            .any(|stmt| matches!(*stmt, Statement::Call { .. })));
    }

    #[test]
    fn unused_local_warns_once() {
        let (_, warnings) = translate("fn f() { let unused = 1; let _keep = 2; }").unwrap();
        assert_eq!(warnings.len(), 1);
        match warnings[0].kind {
            WarningKind::UnusedLocal { ref name } => assert_eq!(name, "unused"),
        }
    }

    #[test]
    fn used_local_does_not_warn() {
        let (_, warnings) =
            translate("fn f() -> i32 { let x = 1; return x; }").unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn unsuffixed_literals_default_to_i32_and_f32() {
        let module = module("fn f() { let a = 1; let b = 1.5; }");
        let f = module.functions.iter().next().unwrap().1;
        let kinds: Vec<_> = f
            .expressions
            .iter()
            .filter_map(|(_, e)| match *e {
                Expression::Literal(lit) => Some(lit.scalar().kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ScalarKind::Sint, ScalarKind::Float]);
    }

    #[test]
    fn hinted_literals_take_the_declared_type() {
        let module = module("fn f() { var x: u32 = 1; var y: f32 = 2; }");
        let f = module.functions.iter().next().unwrap().1;
        let kinds: Vec<_> = f
            .expressions
            .iter()
            .filter_map(|(_, e)| match *e {
                Expression::Literal(lit) => Some(lit.scalar().kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ScalarKind::Uint, ScalarKind::Float]);
    }

    #[test]
    fn type_registry_dedups_across_declarations() {
        let module = module(
            "struct A { v: vec3<f32> }
             fn f(x: vec3<f32>) -> vec3<f32> { return x; }",
        );
        let vec3_count = module
            .types
            .iter()
            .filter(|(_, ty)| {
                matches!(
                    ty.inner,
                    TypeInner::Vector {
                        size: wgslc_core::VectorSize::Tri,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(vec3_count, 1);
    }

    #[test]
    fn globals_get_spaces_and_bindings() {
        let module = module(
            "@group(1) @binding(2) var<uniform> params: vec4<f32>;
             var<workgroup> scratch: atomic<u32>;",
        );
        let (_, params) = module
            .global_variables
            .iter()
            .find(|(_, v)| v.name.as_deref() == Some("params"))
            .unwrap();
        assert_eq!(params.space, AddressSpace::Uniform);
        assert_eq!(
            params.binding,
            Some(wgslc_core::ResourceBinding { group: 1, binding: 2 })
        );
        let (_, scratch) = module
            .global_variables
            .iter()
            .find(|(_, v)| v.name.as_deref() == Some("scratch"))
            .unwrap();
        assert_eq!(scratch.space, AddressSpace::WorkGroup);
        assert_eq!(scratch.binding, None);
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let err = translate("fn f() -> i32 { return nope; }").unwrap_err();
        assert!(matches!(
            err,
            FrontError::Lower(LowerError::UnknownIdent { .. })
        ));
        let rendered = err.emit_to_string("fn f() -> i32 { return nope; }");
        assert!(rendered.contains("^"));
        assert!(rendered.contains("nope"));
    }

    #[test]
    fn lowered_modules_validate() {
        let source = "
            var<workgroup> shared_counter: atomic<u32>;
            @group(0) @binding(0) var<storage, read_write> result: array<u32>;
            @compute @workgroup_size(64)
            fn main(@builtin(local_invocation_index) lid: u32) {
                if lid == 0u { atomicStore(&shared_counter, 0u); }
                workgroupBarrier();
                atomicAdd(&shared_counter, 1u);
                workgroupBarrier();
                if lid == 0u { result[0] = atomicLoad(&shared_counter); }
            }
        ";
        let module = module(source);
        let errors = Validator::new(ValidationFlags::all()).validate(&module);
        assert_eq!(errors, vec![]);
        assert_eq!(module.entry_points.len(), 1);
        assert_eq!(module.entry_points[0].workgroup_size, [64, 1, 1]);
    }

    #[test]
    fn expression_types_cover_every_expression() {
        let module = module(
            "fn f(a: vec2<f32>) -> f32 {
                var sum: f32 = 0.0;
                for (var i = 0; i < 2; i++) {
                    sum += a[i];
                }
                return sum;
            }",
        );
        for (_, function) in module.functions.iter() {
            assert_eq!(function.expr_types.len(), function.expressions.len());
        }
    }
}
