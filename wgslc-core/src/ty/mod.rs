//! Structured representations of shader types.

use std::fmt;

pub mod reg;

pub use self::reg::TypeArena;

use crate::arena::Handle;
use crate::module::Binding;

/// Width of a scalar in bytes.
pub type Bytes = u8;

/// Primitive scalar kind.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ScalarKind {
    /// Two's complement signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// IEEE 754 floating-point number.
    Float,
    /// Boolean value of either true or false. Booleans have no host-visible
    /// layout; they never appear inside uniform or storage buffers.
    Bool,
}

/// A scalar kind together with its width in bytes.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const F32: Scalar = Scalar {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const F16: Scalar = Scalar {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const I32: Scalar = Scalar {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Scalar = Scalar {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const BOOL: Scalar = Scalar {
        kind: ScalarKind::Bool,
        width: 1,
    };

    /// Whether the scalar is a signed or unsigned integer.
    pub fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ScalarKind::Sint => write!(f, "i{}", self.width as u32 * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width as u32 * 8),
            ScalarKind::Float => write!(f, "f{}", self.width as u32 * 8),
            ScalarKind::Bool => f.write_str("bool"),
        }
    }
}

/// Number of components in a vector, or of rows/columns in a matrix.
#[repr(u8)]
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum VectorSize {
    Bi = 2,
    Tri = 3,
    Quad = 4,
}

impl VectorSize {
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            2 => Some(Self::Bi),
            3 => Some(Self::Tri),
            4 => Some(Self::Quad),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// How a storage resource may be accessed.
    #[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Default)]
    pub struct StorageAccess: u32 {
        const LOAD = 0x1;
        const STORE = 0x2;
    }
}

/// Memory region a pointer or variable lives in.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum AddressSpace {
    /// Local to a function invocation.
    Function,
    /// Private to each shader invocation, module scope.
    Private,
    /// Shared across one compute workgroup.
    WorkGroup,
    /// Read-only host-visible buffer.
    Uniform,
    /// Host-visible buffer with the given access mask.
    Storage { access: StorageAccess },
    /// Push constant block.
    PushConstant,
    /// Opaque handles: images and samplers.
    Handle,
}

impl AddressSpace {
    /// Whether shader code may write through pointers in this space.
    pub fn writable(self) -> bool {
        match self {
            AddressSpace::Function | AddressSpace::Private | AddressSpace::WorkGroup => true,
            AddressSpace::Storage { access } => access.contains(StorageAccess::STORE),
            AddressSpace::Uniform | AddressSpace::PushConstant | AddressSpace::Handle => false,
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            AddressSpace::Function => "function",
            AddressSpace::Private => "private",
            AddressSpace::WorkGroup => "workgroup",
            AddressSpace::Uniform => "uniform",
            AddressSpace::Storage { .. } => "storage",
            AddressSpace::PushConstant => "push_constant",
            AddressSpace::Handle => "handle",
        };
        f.write_str(name)
    }
}

/// Length of an array type.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ArraySize {
    /// Fixed element count, known at module build time.
    Constant(std::num::NonZeroU32),
    /// Runtime-sized; only legal as a storage resource or the last member of
    /// a storage struct.
    Dynamic,
}

/// Dimensionality of an image.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ImageDimension {
    D1,
    D2,
    D3,
    Cube,
}

/// Texel format of a storage image.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum StorageFormat {
    R32Uint,
    R32Sint,
    R32Float,
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,
}

impl StorageFormat {
    /// Scalar kind of a texel loaded from an image in this format.
    pub fn scalar_kind(self) -> ScalarKind {
        use StorageFormat as Sf;
        match self {
            Sf::R32Uint | Sf::Rg32Uint | Sf::Rgba8Uint | Sf::Rgba16Uint | Sf::Rgba32Uint => {
                ScalarKind::Uint
            }
            Sf::R32Sint | Sf::Rg32Sint | Sf::Rgba8Sint | Sf::Rgba16Sint | Sf::Rgba32Sint => {
                ScalarKind::Sint
            }
            _ => ScalarKind::Float,
        }
    }
}

/// What an image stores and how it is accessed.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ImageClass {
    /// Color image sampled through a sampler.
    Sampled { kind: ScalarKind, multi: bool },
    /// Depth image, sampled with or without comparison.
    Depth { multi: bool },
    /// Storage image, loaded from and stored to directly.
    Storage {
        format: StorageFormat,
        access: StorageAccess,
    },
}

/// A member of a struct type.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct StructMember {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    /// Input/output interface binding, present only on structs used in
    /// entry-point signatures.
    pub binding: Option<Binding>,
    /// Offset from the start of the struct, in bytes.
    pub offset: u32,
}

/// A registered type: an optional name plus the structural description.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct Type {
    /// Debug/source name. Not part of the structural identity.
    pub name: Option<String>,
    pub inner: TypeInner,
}

/// The structural identity of a type. Two types with equal `TypeInner`
/// values share one handle in the [`TypeArena`].
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum TypeInner {
    Scalar(Scalar),
    Vector {
        size: VectorSize,
        scalar: Scalar,
    },
    /// `columns` vectors of `rows` components each. The scalar is always a
    /// float in well-formed modules.
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    Atomic(Scalar),
    Pointer {
        base: Handle<Type>,
        space: AddressSpace,
    },
    /// A pointer to a scalar or vector that never got a registered base
    /// type. Produced by expression type resolution only; see
    /// [`TypeResolution`](crate::TypeResolution).
    ValuePointer {
        size: Option<VectorSize>,
        scalar: Scalar,
        space: AddressSpace,
    },
    Array {
        base: Handle<Type>,
        size: ArraySize,
        /// Distance between consecutive elements, in bytes.
        stride: u32,
    },
    Struct {
        members: Vec<StructMember>,
        /// Total size of the struct, in bytes.
        span: u32,
    },
    Image {
        dim: ImageDimension,
        arrayed: bool,
        class: ImageClass,
    },
    Sampler {
        comparison: bool,
    },
}

macro_rules! declr_ty_accessor {
    ($($name:ident -> $pat:pat,)+) => {
        $(
            pub fn $name(&self) -> bool {
                matches!(self, $pat)
            }
        )+
    }
}

impl TypeInner {
    declr_ty_accessor! {
        is_scalar -> TypeInner::Scalar(_),
        is_pointer -> TypeInner::Pointer { .. } | TypeInner::ValuePointer { .. },
        is_struct -> TypeInner::Struct { .. },
        is_handle -> TypeInner::Image { .. } | TypeInner::Sampler { .. },
    }

    /// The scalar making up this type, if it is a scalar, vector, matrix, or
    /// atomic.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            TypeInner::Scalar(scalar)
            | TypeInner::Vector { scalar, .. }
            | TypeInner::Matrix { scalar, .. }
            | TypeInner::Atomic(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        self.scalar().map(|scalar| scalar.kind)
    }

    /// Vector size, or `None` for a scalar shape.
    pub fn vector_size(&self) -> Option<VectorSize> {
        match *self {
            TypeInner::Vector { size, .. } => Some(size),
            _ => None,
        }
    }

    /// Size of an instance of this type in bytes, if it has a layout.
    /// Runtime-sized arrays report the size of one element.
    pub fn size(&self, arena: &TypeArena) -> u32 {
        match *self {
            TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => scalar.width as u32,
            TypeInner::Vector { size, scalar } => size as u32 * scalar.width as u32,
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = align_up(rows as u32 * scalar.width as u32, 8);
                columns as u32 * column
            }
            TypeInner::Array { size, stride, .. } => match size {
                ArraySize::Constant(count) => stride * count.get(),
                ArraySize::Dynamic => stride,
            },
            TypeInner::Struct { span, .. } => span,
            TypeInner::Pointer { .. }
            | TypeInner::ValuePointer { .. }
            | TypeInner::Image { .. }
            | TypeInner::Sampler { .. } => 0,
        }
    }

    /// Look through a pointer to the type it refers to. Non-pointers resolve
    /// to themselves.
    pub fn pointer_base<'a>(&'a self, arena: &'a TypeArena) -> &'a TypeInner {
        match *self {
            TypeInner::Pointer { base, .. } => &arena[base].inner,
            _ => self,
        }
    }

    /// The address space of a pointer type.
    pub fn pointer_space(&self) -> Option<AddressSpace> {
        match *self {
            TypeInner::Pointer { space, .. } | TypeInner::ValuePointer { space, .. } => Some(space),
            _ => None,
        }
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Alignment requirement of a type under the std-layout rules used for
/// uniform and storage buffers.
pub fn type_alignment(inner: &TypeInner, arena: &TypeArena) -> u32 {
    match *inner {
        TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => scalar.width as u32,
        TypeInner::Vector { size, scalar } => {
            let count = match size {
                VectorSize::Bi => 2,
                // vec3 aligns like vec4.
                VectorSize::Tri | VectorSize::Quad => 4,
            };
            count * scalar.width as u32
        }
        TypeInner::Matrix { rows, scalar, .. } => {
            type_alignment(
                &TypeInner::Vector {
                    size: rows,
                    scalar,
                },
                arena,
            )
        }
        TypeInner::Array { base, .. } => type_alignment(&arena[base].inner, arena).max(16),
        TypeInner::Struct { ref members, .. } => members
            .iter()
            .map(|member| type_alignment(&arena[member.ty].inner, arena))
            .max()
            .unwrap_or(1)
            .max(16),
        _ => 1,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_display() {
        assert_eq!(Scalar::F32.to_string(), "f32");
        assert_eq!(Scalar::I32.to_string(), "i32");
        assert_eq!(Scalar::U32.to_string(), "u32");
        assert_eq!(Scalar::BOOL.to_string(), "bool");
    }

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(3, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(17, 16), 32);
    }
}
