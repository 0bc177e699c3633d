//! Abstract syntax tree produced by the parser.
//!
//! The tree stays close to the source: names are unresolved strings, types
//! are syntactic descriptions, and attributes are already folded into
//! structured fields. Lowering turns all of this into the IR.

use crate::lex::Span;
use wgslc_core::{
    AddressSpace, BinaryOperator, ImageDimension, Interpolation, Sampling, Scalar, ShaderStage,
    StorageFormat, UnaryOperator, VectorSize,
};

/// An identifier with its source location.
#[derive(Clone, Debug, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// A syntactic type expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    /// A struct or alias name, resolved during lowering.
    Named(String),
    Scalar(Scalar),
    Vector {
        size: VectorSize,
        inner: Box<Type>,
    },
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        inner: Box<Type>,
    },
    Atomic {
        inner: Box<Type>,
    },
    Pointer {
        space: AddressSpace,
        inner: Box<Type>,
    },
    Array {
        inner: Box<Type>,
        /// `None` for a runtime-sized array.
        size: Option<Box<Expr>>,
    },
    Sampled {
        dim: ImageDimension,
        arrayed: bool,
        multi: bool,
        inner: Box<Type>,
    },
    Depth {
        dim: ImageDimension,
        arrayed: bool,
        multi: bool,
    },
    StorageTexture {
        dim: ImageDimension,
        arrayed: bool,
        format: StorageFormat,
        access: wgslc_core::StorageAccess,
    },
    Sampler {
        comparison: bool,
    },
}

/// A literal as spelled in the source. Unsuffixed numerics commit to their
/// default concrete type at lowering time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    UInt(u64),
    /// An unsuffixed integer literal.
    AbstractInt(i64),
    Float(f64),
    /// An unsuffixed float literal.
    AbstractFloat(f64),
    Bool(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    /// `&expr`
    AddrOf(Box<Expr>),
    /// `*expr`
    Deref(Box<Expr>),
    /// A call whose callee is a plain name: user function, type constructor,
    /// or builtin. Disambiguated during lowering.
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
    /// A call whose callee is a generic type: `vec3<f32>(...)`,
    /// `array<u32, 4>(...)`.
    Construct {
        ty: Type,
        args: Vec<Expr>,
    },
    /// `bitcast<T>(expr)`
    Bitcast {
        ty: Type,
        expr: Box<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: Ident,
    },
}

/// The declaration kind of a local binding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VarDeclKind {
    /// Immutable value binding.
    Let,
    /// Mutable function-space variable.
    Var,
    /// Function-scope constant.
    Const,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

pub type Block = Vec<Stmt>;

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    /// `None` marks the `default` selector.
    pub selectors: Vec<Option<Expr>>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    VarDecl {
        decl: VarDeclKind,
        name: Ident,
        ty: Option<Type>,
        init: Option<Expr>,
    },
    Assign {
        lhs: Expr,
        /// `Some(op)` for compound assignment like `+=`.
        op: Option<BinaryOperator>,
        value: Expr,
    },
    Increment(Expr),
    Decrement(Expr),
    /// An expression evaluated for its effects; always a call.
    Call(Expr),
    If {
        condition: Expr,
        accept: Block,
        reject: Block,
    },
    Switch {
        selector: Expr,
        cases: Vec<SwitchCase>,
    },
    Loop {
        body: Block,
        continuing: Block,
        break_if: Option<Expr>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Block,
    },
    Break,
    /// `break if`; only legal as the final statement of a continuing block.
    BreakIf(Expr),
    Continue,
    Return(Option<Expr>),
    Discard,
    Block(Block),
}

/// An entry-point input/output binding attribute set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IoAttributes {
    pub builtin: Option<wgslc_core::BuiltIn>,
    pub location: Option<u32>,
    pub interpolation: Option<Interpolation>,
    pub sampling: Option<Sampling>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructMember {
    pub name: Ident,
    pub ty: Type,
    pub io: IoAttributes,
    pub size: Option<u32>,
    pub align: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDecl {
    pub name: Ident,
    pub members: Vec<StructMember>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AliasDecl {
    pub name: Ident,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstDecl {
    pub name: Ident,
    pub ty: Option<Type>,
    pub init: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalVarDecl {
    pub name: Ident,
    /// The `<space>` or `<space, access>` template list on `var`.
    pub space: Option<AddressSpace>,
    pub ty: Type,
    pub init: Option<Expr>,
    pub group: Option<u32>,
    pub binding: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub ty: Type,
    pub io: IoAttributes,
}

/// Stage attributes on a function declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct StageAttribute {
    pub stage: ShaderStage,
    /// Arguments of `@workgroup_size(...)`, if present.
    pub workgroup_size: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Param>,
    pub result: Option<(Type, IoAttributes)>,
    pub body: Block,
    pub stage: Option<StageAttribute>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GlobalDecl {
    Struct(StructDecl),
    Alias(AliasDecl),
    Const(ConstDecl),
    Var(GlobalVarDecl),
    Fn(FunctionDecl),
}

/// The parser's output: a flat list of module-scope declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranslationUnit {
    pub decls: Vec<GlobalDecl>,
}
