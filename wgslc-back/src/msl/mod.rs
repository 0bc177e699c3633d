//! Metal Shading Language backend.
//!
//! Metal's binding model is flat per resource kind, so descriptor-style
//! `(group, binding)` pairs are mapped through an explicit table in the
//! options. Entry points get their varyings gathered into a `[[stage_in]]`
//! struct, their outputs into a returned struct, and every global resource
//! they touch becomes a function parameter; helper functions reached from an
//! entry point have the globals they use threaded through as parameters as
//! well, since MSL has no module-scope resource state.

mod keywords;
mod writer;

use thiserror::Error;

use wgslc_core::{FastHashMap, Module, ShaderStage};

use crate::{BoundsCheckPolicies, TranslationInfo};

/// Where one `(stage, group, binding)` source lands in Metal's argument
/// tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindTarget {
    pub buffer: Option<u8>,
    pub texture: Option<u8>,
    pub sampler: Option<u8>,
    /// Whether a buffer target is writable.
    pub mutable: bool,
}

#[derive(Clone, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct BindSource {
    pub stage: ShaderStage,
    pub group: u32,
    pub binding: u32,
}

pub type BindingMap = FastHashMap<BindSource, BindTarget>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
    #[error("bind source for {0:?} is missing from the binding map")]
    MissingBindTarget(BindSource),
    #[error("feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),
    #[error("module is not valid: {0}")]
    Validation(&'static str),
}

#[derive(Clone, Debug)]
pub struct Options {
    /// (Major, Minor) target version of the Metal Shading Language.
    pub lang_version: (u8, u8),
    /// Binding model mapping to Metal argument table slots.
    pub binding_map: BindingMap,
    /// Out-of-range access handling, per category.
    pub bounds_checks: BoundsCheckPolicies,
    /// Zero-initialize `threadgroup` memory at kernel start.
    pub zero_initialize_workgroup_memory: bool,
    /// Guard every loop with an iteration counter so the compiler cannot
    /// assume forward progress.
    pub force_loop_bounding: bool,
    /// Invent slots for missing bindings instead of failing.
    pub fake_missing_bindings: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lang_version: (2, 0),
            binding_map: BindingMap::default(),
            bounds_checks: BoundsCheckPolicies::default(),
            zero_initialize_workgroup_memory: false,
            force_loop_bounding: false,
            fake_missing_bindings: true,
        }
    }
}

impl Options {
    fn resolve_resource_binding(
        &self,
        stage: ShaderStage,
        binding: &wgslc_core::ResourceBinding,
    ) -> Result<BindTarget, Error> {
        let source = BindSource {
            stage,
            group: binding.group,
            binding: binding.binding,
        };
        match self.binding_map.get(&source) {
            Some(target) => Ok(target.clone()),
            None if self.fake_missing_bindings => Ok(BindTarget {
                buffer: Some(binding.binding as u8),
                texture: Some(binding.binding as u8),
                sampler: Some(binding.binding as u8),
                mutable: true,
            }),
            None => Err(Error::MissingBindTarget(source)),
        }
    }
}

/// Translate `module` to MSL source text.
pub fn write_string(module: &Module, options: &Options) -> Result<(String, TranslationInfo), Error> {
    let mut writer = writer::Writer::new(module, options);
    let info = writer.write()?;
    Ok((writer.finish(), info))
}
