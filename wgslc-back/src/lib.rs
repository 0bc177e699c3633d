//! # wgslc-back: output backends.
//!
//! One binary backend ([`spv`]) and three textual ones ([`msl`], [`glsl`],
//! [`hlsl`]). All four consume the immutable IR from `wgslc-core` and own
//! their scratch state, so backends can run concurrently on the same module.
//!
//! The textual backends share a small toolbox: the [`namer`] keeps emitted
//! identifiers collision-free against each target's reserved words, [`Level`]
//! tracks indentation, and [`TranslationInfo`] reports what a caller needs to
//! know about the emitted source.

pub mod glsl;
pub mod hlsl;
pub mod msl;
pub mod namer;
pub mod spv;

use std::fmt;

/// How out-of-range indices are handled in emitted code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoundsCheckPolicy {
    /// Emit the access as-is.
    #[default]
    Unchecked,
    /// Reads of out-of-range indices produce zero; writes are redirected to
    /// the last element.
    ReadZeroSkipWrite,
    /// Clamp the index into range.
    Restrict,
}

/// Per-category bounds check configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundsCheckPolicies {
    pub index: BoundsCheckPolicy,
    pub buffer: BoundsCheckPolicy,
    pub image: BoundsCheckPolicy,
    pub binding_array: BoundsCheckPolicy,
}

/// Indentation level for textual output.
#[derive(Clone, Copy, Debug, Default)]
pub struct Level(pub usize);

impl Level {
    pub fn next(self) -> Level {
        Level(self.0 + 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for _ in 0..self.0 {
            f.write_str("    ")?;
        }
        Ok(())
    }
}

/// What a caller needs to know about a textual translation.
#[derive(Clone, Debug, Default)]
pub struct TranslationInfo {
    /// Emitted name per entry point, in `module.entry_points` order.
    pub entry_point_names: Vec<String>,
    /// Whether the emitted code expects a buffer of runtime array sizes to
    /// be bound (MSL only).
    pub requires_sizes_buffer: bool,
}

#[cfg(test)]
mod test {
    use super::Level;

    #[test]
    fn level_indents_by_four() {
        assert_eq!(Level(0).to_string(), "");
        assert_eq!(Level(2).to_string(), "        ");
        assert_eq!(Level(1).next().to_string(), "        ");
    }
}
