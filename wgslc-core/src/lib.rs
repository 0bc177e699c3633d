//! # wgslc-core: the shader intermediate representation.
//!
//! This crate defines the language-independent IR shared between the WGSL
//! frontend (`wgslc-front`) and the output backends (`wgslc-back`), plus the
//! validator that checks a lowered module before emission.
//!
//! The IR is arena-based: a [`Module`] owns ordered tables of types,
//! constants, global variables and functions, and entities refer to each
//! other through [`Handle`]s, plain indices into those tables. A module is
//! built once by the lowerer and never mutated afterwards; every downstream
//! pass is a read-only consumer, so separate compilations can run on
//! separate threads without any shared state.

pub mod arena;
pub mod expr;
pub mod module;
pub mod resolve;
pub mod stmt;
pub mod ty;
pub mod valid;

pub use arena::{Arena, Handle, Range};
pub use expr::{
    BinaryOperator, DerivativeAxis, DerivativeControl, Expression, ImageQuery, Literal,
    MathFunction, RelationalFunction, SampleLevel, SwizzleComponent, UnaryOperator,
};
pub use module::{
    Binding, BuiltIn, Constant, ConstantInner, EntryPoint, Function, FunctionArgument,
    FunctionResult, GlobalVariable, Interpolation, LocalVariable, Module, ResourceBinding,
    Sampling, ScalarValue, ShaderStage,
};
pub use resolve::{ResolveContext, ResolveError, TypeResolution};
pub use stmt::{AtomicFunction, Barrier, Block, Emitter, Statement, SwitchCase, SwitchValue};
pub use ty::{
    AddressSpace, ArraySize, Bytes, ImageClass, ImageDimension, Scalar, ScalarKind,
    StorageAccess, StorageFormat, StructMember, Type, TypeArena, TypeInner, VectorSize,
};
pub use valid::{ValidationError, ValidationFlags, Validator};

/// Hash map with a fast, non-cryptographic hasher, used for all interning
/// and lookup tables.
pub type FastHashMap<K, V> = fnv::FnvHashMap<K, V>;
/// Companion set type of [`FastHashMap`].
pub type FastHashSet<K> = fnv::FnvHashSet<K>;
