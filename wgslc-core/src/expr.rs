//! Expression graph of a function.
//!
//! Expressions live in a per-function [`Arena`](crate::arena::Arena) and
//! refer to each other by handle, never by reference. The set of variants is
//! closed; downstream passes match exhaustively so that new variants cannot
//! slip through unnoticed.

use crate::arena::Handle;
use crate::module::{Constant, Function, GlobalVariable, LocalVariable};
use crate::ty::{Bytes, ScalarKind, Type, VectorSize};

/// A literal value spelled out in the source.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Literal {
    F32(f32),
    I32(i32),
    U32(u32),
    Bool(bool),
}

impl Literal {
    pub fn scalar(&self) -> crate::ty::Scalar {
        match *self {
            Literal::F32(_) => crate::ty::Scalar::F32,
            Literal::I32(_) => crate::ty::Scalar::I32,
            Literal::U32(_) => crate::ty::Scalar::U32,
            Literal::Bool(_) => crate::ty::Scalar::BOOL,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum UnaryOperator {
    Negate,
    LogicalNot,
    BitwiseNot,
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    ExclusiveOr,
    InclusiveOr,
    LogicalAnd,
    LogicalOr,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOperator {
    /// Whether the result is a boolean (or boolean vector) regardless of the
    /// operand types.
    pub fn is_comparison(self) -> bool {
        use BinaryOperator as Bo;
        matches!(
            self,
            Bo::Equal | Bo::NotEqual | Bo::Less | Bo::LessEqual | Bo::Greater | Bo::GreaterEqual
        )
    }
}

/// Built-in numeric functions.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum MathFunction {
    // comparison
    Abs,
    Min,
    Max,
    Clamp,
    // trigonometry
    Cos,
    Cosh,
    Sin,
    Sinh,
    Tan,
    Tanh,
    Acos,
    Asin,
    Atan,
    Atan2,
    // decomposition
    Ceil,
    Floor,
    Round,
    Fract,
    Trunc,
    Modf,
    Frexp,
    Ldexp,
    // exponent
    Exp,
    Exp2,
    Log,
    Log2,
    Pow,
    Sqrt,
    InverseSqrt,
    // geometry
    Dot,
    Cross,
    Distance,
    Length,
    Normalize,
    FaceForward,
    Reflect,
    Refract,
    // computational
    Sign,
    Fma,
    Mix,
    Step,
    SmoothStep,
    Transpose,
    Determinant,
    // bits
    CountOneBits,
    ReverseBits,
    ExtractBits,
    InsertBits,
    FirstTrailingBit,
    FirstLeadingBit,
}

impl MathFunction {
    /// Number of arguments the function takes.
    pub fn argument_count(self) -> usize {
        use MathFunction as Mf;
        match self {
            Mf::Abs
            | Mf::Cos
            | Mf::Cosh
            | Mf::Sin
            | Mf::Sinh
            | Mf::Tan
            | Mf::Tanh
            | Mf::Acos
            | Mf::Asin
            | Mf::Atan
            | Mf::Ceil
            | Mf::Floor
            | Mf::Round
            | Mf::Fract
            | Mf::Trunc
            | Mf::Modf
            | Mf::Frexp
            | Mf::Exp
            | Mf::Exp2
            | Mf::Log
            | Mf::Log2
            | Mf::Sqrt
            | Mf::InverseSqrt
            | Mf::Length
            | Mf::Normalize
            | Mf::Sign
            | Mf::Transpose
            | Mf::Determinant
            | Mf::CountOneBits
            | Mf::ReverseBits
            | Mf::FirstTrailingBit
            | Mf::FirstLeadingBit => 1,
            Mf::Min
            | Mf::Max
            | Mf::Atan2
            | Mf::Ldexp
            | Mf::Pow
            | Mf::Dot
            | Mf::Cross
            | Mf::Distance
            | Mf::Reflect
            | Mf::Step => 2,
            Mf::Clamp
            | Mf::FaceForward
            | Mf::Refract
            | Mf::Fma
            | Mf::Mix
            | Mf::SmoothStep
            | Mf::ExtractBits => 3,
            Mf::InsertBits => 4,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum RelationalFunction {
    All,
    Any,
    IsNan,
    IsInf,
}

/// Which axis a derivative is taken along.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum DerivativeAxis {
    X,
    Y,
    Width,
}

/// Precision hint for a derivative.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum DerivativeControl {
    Coarse,
    Fine,
    None,
}

/// One component selected by a swizzle.
#[repr(u8)]
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum SwizzleComponent {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl SwizzleComponent {
    pub const XYZW: [SwizzleComponent; 4] = [
        SwizzleComponent::X,
        SwizzleComponent::Y,
        SwizzleComponent::Z,
        SwizzleComponent::W,
    ];

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'x' | 'r' => Some(Self::X),
            'y' | 'g' => Some(Self::Y),
            'z' | 'b' => Some(Self::Z),
            'w' | 'a' => Some(Self::W),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::W => 'w',
        }
    }
}

/// Mip level selection for an image sample.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum SampleLevel {
    /// Implicit level of detail; fragment stage only.
    Auto,
    Zero,
    Exact(Handle<Expression>),
    Bias(Handle<Expression>),
    Gradient {
        x: Handle<Expression>,
        y: Handle<Expression>,
    },
}

/// A query about image storage, answered without accessing texels.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ImageQuery {
    /// Dimensions at the given mip level, or at level zero if `None`.
    Size { level: Option<Handle<Expression>> },
    NumLevels,
    NumLayers,
    NumSamples,
}

#[derive(PartialEq, Clone, Debug)]
pub enum Expression {
    /// A literal spelled in the source.
    Literal(Literal),
    /// Reference to a module-scope constant.
    Constant(Handle<Constant>),
    /// The zero value of the given type.
    ZeroValue(Handle<Type>),
    /// Build a composite value out of components.
    Compose {
        ty: Handle<Type>,
        components: Vec<Handle<Expression>>,
    },
    /// Replicate a scalar into a vector.
    Splat {
        size: VectorSize,
        value: Handle<Expression>,
    },
    /// Index with a dynamically computed value.
    Access {
        base: Handle<Expression>,
        index: Handle<Expression>,
    },
    /// Index with a constant known at compile time. Also selects struct
    /// members.
    AccessIndex {
        base: Handle<Expression>,
        index: u32,
    },
    /// Reorder vector components. `pattern` entries beyond `size` are
    /// ignored.
    Swizzle {
        size: VectorSize,
        vector: Handle<Expression>,
        pattern: [SwizzleComponent; 4],
    },
    /// The value of the function argument at the given index.
    FunctionArgument(u32),
    /// A pointer to a module-scope variable, or the handle value itself for
    /// images and samplers.
    GlobalVariable(Handle<GlobalVariable>),
    /// A pointer to a function-local variable.
    LocalVariable(Handle<LocalVariable>),
    /// Read through a pointer.
    Load { pointer: Handle<Expression> },
    Unary {
        op: UnaryOperator,
        expr: Handle<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Handle<Expression>,
        right: Handle<Expression>,
    },
    /// A call to one of the built-in numeric functions. Unused trailing
    /// arguments are `None`.
    Math {
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
        arg2: Option<Handle<Expression>>,
        arg3: Option<Handle<Expression>>,
    },
    Relational {
        fun: RelationalFunction,
        argument: Handle<Expression>,
    },
    /// Component-wise three-way choice: `condition ? accept : reject`.
    Select {
        condition: Handle<Expression>,
        accept: Handle<Expression>,
        reject: Handle<Expression>,
    },
    /// Scalar conversion (`convert` holds the target width) or bitcast
    /// (`convert` is `None`), applied at the expression's shape.
    As {
        expr: Handle<Expression>,
        kind: ScalarKind,
        convert: Option<Bytes>,
    },
    Derivative {
        axis: DerivativeAxis,
        ctrl: DerivativeControl,
        expr: Handle<Expression>,
    },
    /// Sample a texel through a sampler.
    ImageSample {
        image: Handle<Expression>,
        sampler: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        /// Constant texel offset.
        offset: Option<Handle<Constant>>,
        level: SampleLevel,
        /// Comparison reference for depth sampling. Present iff the result is
        /// a scalar.
        depth_ref: Option<Handle<Expression>>,
        /// Component selection for a textureGather.
        gather: Option<SwizzleComponent>,
    },
    /// Read a texel directly, without filtering.
    ImageLoad {
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        sample: Option<Handle<Expression>>,
        level: Option<Handle<Expression>>,
    },
    ImageQuery {
        image: Handle<Expression>,
        query: ImageQuery,
    },
    /// The value returned by the most recent `Statement::Call` of this
    /// function.
    CallResult(Handle<Function>),
    /// The value produced by a `Statement::Atomic`.
    AtomicResult {
        ty: Handle<Type>,
        comparison: bool,
    },
    /// The element count of a runtime-sized array behind the pointer.
    ArrayLength(Handle<Expression>),
}

impl Expression {
    /// Whether the expression is a name or constant that backends may
    /// reference without it ever appearing in an `Emit` range.
    pub fn needs_pre_emit(&self) -> bool {
        match *self {
            Expression::Literal(_)
            | Expression::Constant(_)
            | Expression::ZeroValue(_)
            | Expression::FunctionArgument(_)
            | Expression::GlobalVariable(_)
            | Expression::LocalVariable(_)
            | Expression::CallResult(_)
            | Expression::AtomicResult { .. } => true,
            _ => false,
        }
    }
}
