//! OpenGL Shading Language backend.
//!
//! GLSL compiles one entry point per invocation: shader stages are separate
//! compilation units, so the options name the entry point to emit. Inputs
//! and outputs become `in`/`out` globals with explicit locations, resources
//! become uniform and buffer blocks with `set`/`binding` layout qualifiers
//! (Vulkan-flavored GLSL), and the entry point itself is wrapped in the
//! mandatory `void main()`.

mod keywords;
mod writer;

use thiserror::Error;

use wgslc_core::Module;

use crate::TranslationInfo;

/// Target GLSL dialect and version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    /// `#version N core`
    Desktop(u16),
    /// `#version N es`
    Embedded(u16),
}

impl Version {
    /// Whether the version can host a compute shader.
    fn supports_compute(self) -> bool {
        match self {
            Version::Desktop(v) => v >= 430,
            Version::Embedded(v) => v >= 310,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Version::Desktop(v) => write!(f, "{} core", v),
            Version::Embedded(v) => write!(f, "{} es", v),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    pub version: Version,
    /// Name of the entry point to emit.
    pub entry_point: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            version: Version::Desktop(450),
            entry_point: "main".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
    #[error("no entry point named `{0}`")]
    EntryPointNotFound(String),
    #[error("{0} does not support this shader stage")]
    UnsupportedStage(Version),
    #[error("feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),
    #[error("module is not valid: {0}")]
    Validation(&'static str),
}

/// Translate one entry point of `module` to GLSL source text.
pub fn write_string(module: &Module, options: &Options) -> Result<(String, TranslationInfo), Error> {
    let mut writer = writer::Writer::new(module, options)?;
    let info = writer.write()?;
    Ok((writer.finish(), info))
}
