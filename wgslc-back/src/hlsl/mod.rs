//! High-Level Shading Language backend.
//!
//! Resources bind to registers: `b` for constant buffers, `t` for read-only
//! views, `u` for read-write views and `s` for samplers, with the
//! descriptor `group` mapped to a register space. Entry points carry
//! semantics on every input and output; compute entry points get their
//! `[numthreads]` attribute from the workgroup size.

mod keywords;
mod writer;

use thiserror::Error;

use wgslc_core::{FastHashMap, Module, ResourceBinding};

use crate::TranslationInfo;

/// Target shader model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShaderModel {
    /// The highest model FXC accepts.
    V5_1,
    V6_0,
    V6_1,
}

impl std::fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ShaderModel::V5_1 => f.write_str("5_1"),
            ShaderModel::V6_0 => f.write_str("6_0"),
            ShaderModel::V6_1 => f.write_str("6_1"),
        }
    }
}

/// Register assignment for one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindTarget {
    pub register: u32,
    pub space: u32,
}

pub type BindingMap = FastHashMap<ResourceBinding, BindTarget>;

#[derive(Clone, Debug)]
pub struct Options {
    pub shader_model: ShaderModel,
    /// Restrict output to one entry point, or emit all of them.
    pub entry_point: Option<String>,
    /// Overrides for the default `register = binding, space = group` rule.
    pub binding_map: BindingMap,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            shader_model: ShaderModel::V5_1,
            entry_point: None,
            binding_map: BindingMap::default(),
        }
    }
}

impl Options {
    fn resolve_binding(&self, binding: &ResourceBinding) -> BindTarget {
        match self.binding_map.get(binding) {
            Some(&target) => target,
            None => BindTarget {
                register: binding.binding,
                space: binding.group,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
    #[error("no entry point named `{0}`")]
    EntryPointNotFound(String),
    #[error("feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),
    #[error("module is not valid: {0}")]
    Validation(&'static str),
}

/// Translate `module` to HLSL source text.
pub fn write_string(module: &Module, options: &Options) -> Result<(String, TranslationInfo), Error> {
    let mut writer = writer::Writer::new(module, options)?;
    let info = writer.write()?;
    Ok((writer.finish(), info))
}
