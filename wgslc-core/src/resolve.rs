//! Expression type resolution.
//!
//! Every expression in a lowered function carries a [`TypeResolution`]:
//! either a handle into the module's type arena, or an inline [`TypeInner`]
//! for the transient pointer types synthesized while lowering, which never
//! get registered. Backends must handle both uniformly, which
//! [`TypeResolution::inner_with`] makes cheap.

use thiserror::Error;

use crate::arena::{Arena, Handle};
use crate::expr::{Expression, Literal, MathFunction, RelationalFunction};
use crate::module::{
    Constant, ConstantInner, Function, FunctionArgument, GlobalVariable, LocalVariable,
    ScalarValue,
};
use crate::ty::{
    AddressSpace, ImageClass, ImageDimension, Scalar, ScalarKind, Type, TypeArena, TypeInner,
    VectorSize,
};

/// The type of one expression: a registered handle or an inline value.
#[derive(PartialEq, Clone, Debug)]
pub enum TypeResolution {
    Handle(Handle<Type>),
    Value(TypeInner),
}

impl TypeResolution {
    pub fn handle(&self) -> Option<Handle<Type>> {
        match *self {
            TypeResolution::Handle(handle) => Some(handle),
            TypeResolution::Value(_) => None,
        }
    }

    /// The structural description, looking through the arena if needed.
    pub fn inner_with<'a>(&'a self, types: &'a TypeArena) -> &'a TypeInner {
        match *self {
            TypeResolution::Handle(handle) => &types[handle].inner,
            TypeResolution::Value(ref inner) => inner,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("expression {0:?} is referenced before it is evaluated")]
    ExpressionForwardDependency(Handle<Expression>),
    #[error("type {0:?} cannot be indexed")]
    InvalidAccess(TypeInner),
    #[error("index {index} is out of bounds for type {ty:?}")]
    IndexOutOfBounds { ty: TypeInner, index: u32 },
    #[error("cannot swizzle type {0:?}")]
    InvalidSwizzle(TypeInner),
    #[error("cannot load through type {0:?}")]
    InvalidLoad(TypeInner),
    #[error("operands of {op} have incompatible types {left:?} and {right:?}")]
    IncompatibleOperands {
        op: &'static str,
        left: TypeInner,
        right: TypeInner,
    },
    #[error("argument of {0:?} has an unexpected type")]
    InvalidMathArgument(MathFunction),
    #[error("{0:?} produces a predeclared result struct; its resolution is supplied at lowering time")]
    SpecialMathResult(MathFunction),
    #[error("image expression has non-image type {0:?}")]
    InvalidImage(TypeInner),
    #[error("function argument index {0} is out of bounds")]
    FunctionArgumentOutOfBounds(u32),
    #[error("called function returns no value")]
    CallToVoidFunction,
}

/// Everything needed to resolve the expressions of one function.
pub struct ResolveContext<'a> {
    pub types: &'a TypeArena,
    pub constants: &'a Arena<Constant>,
    pub global_variables: &'a Arena<GlobalVariable>,
    pub functions: &'a Arena<Function>,
    pub arguments: &'a [FunctionArgument],
    pub local_variables: &'a Arena<LocalVariable>,
}

impl<'a> ResolveContext<'a> {
    /// Compute the resolution of `expr`. `past` supplies the resolutions of
    /// expressions created earlier in the same arena.
    pub fn resolve<'r>(
        &self,
        expr: &Expression,
        past: impl Fn(Handle<Expression>) -> Result<&'r TypeResolution, ResolveError>,
    ) -> Result<TypeResolution, ResolveError> {
        use TypeResolution as Tr;
        let types = self.types;
        Ok(match *expr {
            Expression::Literal(literal) => Tr::Value(TypeInner::Scalar(literal.scalar())),
            Expression::Constant(handle) => match self.constants[handle].inner {
                ConstantInner::Scalar { width, value } => {
                    let kind = match value {
                        ScalarValue::Sint(_) => ScalarKind::Sint,
                        ScalarValue::Uint(_) => ScalarKind::Uint,
                        ScalarValue::Float(_) => ScalarKind::Float,
                        ScalarValue::Bool(_) => ScalarKind::Bool,
                    };
                    Tr::Value(TypeInner::Scalar(Scalar { kind, width }))
                }
                ConstantInner::Composite { ty, .. } => Tr::Handle(ty),
            },
            Expression::ZeroValue(ty) | Expression::Compose { ty, .. } => Tr::Handle(ty),
            Expression::Splat { size, value } => {
                let inner = past(value)?.inner_with(types);
                match *inner {
                    TypeInner::Scalar(scalar) => Tr::Value(TypeInner::Vector { size, scalar }),
                    ref other => return Err(ResolveError::InvalidAccess(other.clone())),
                }
            }
            Expression::Access { base, index: _ } => {
                let inner = past(base)?.inner_with(types);
                self.access_result(inner, None)?
            }
            Expression::AccessIndex { base, index } => {
                let inner = past(base)?.inner_with(types);
                self.access_result(inner, Some(index))?
            }
            Expression::Swizzle { size, vector, .. } => {
                let inner = past(vector)?.inner_with(types);
                match *inner {
                    TypeInner::Vector { scalar, .. } => {
                        Tr::Value(TypeInner::Vector { size, scalar })
                    }
                    ref other => return Err(ResolveError::InvalidSwizzle(other.clone())),
                }
            }
            Expression::FunctionArgument(index) => {
                let arg = self
                    .arguments
                    .get(index as usize)
                    .ok_or(ResolveError::FunctionArgumentOutOfBounds(index))?;
                Tr::Handle(arg.ty)
            }
            Expression::GlobalVariable(handle) => {
                let var = &self.global_variables[handle];
                if var.space == AddressSpace::Handle {
                    Tr::Handle(var.ty)
                } else {
                    Tr::Value(TypeInner::Pointer {
                        base: var.ty,
                        space: var.space,
                    })
                }
            }
            Expression::LocalVariable(handle) => {
                let var = &self.local_variables[handle];
                Tr::Value(TypeInner::Pointer {
                    base: var.ty,
                    space: AddressSpace::Function,
                })
            }
            Expression::Load { pointer } => {
                let inner = past(pointer)?.inner_with(types);
                match *inner {
                    TypeInner::Pointer { base, .. } => match types[base].inner {
                        // Loading an atomic observes the underlying scalar.
                        TypeInner::Atomic(scalar) => Tr::Value(TypeInner::Scalar(scalar)),
                        _ => Tr::Handle(base),
                    },
                    TypeInner::ValuePointer { size, scalar, .. } => Tr::Value(match size {
                        Some(size) => TypeInner::Vector { size, scalar },
                        None => TypeInner::Scalar(scalar),
                    }),
                    ref other => return Err(ResolveError::InvalidLoad(other.clone())),
                }
            }
            Expression::Unary { op, expr } => {
                let res = past(expr)?.clone();
                match op {
                    crate::expr::UnaryOperator::LogicalNot => {
                        bool_shaped(res.inner_with(types))
                    }
                    _ => res,
                }
            }
            Expression::Binary { op, left, right } => {
                let left_res = past(left)?;
                let right_res = past(right)?;
                self.binary_result(op, left_res, right_res)?
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2: _,
                arg3: _,
            } => {
                let arg_res = past(arg)?;
                let inner = arg_res.inner_with(types);
                use MathFunction as Mf;
                match fun {
                    Mf::Dot => match *inner {
                        TypeInner::Vector { scalar, .. } => {
                            Tr::Value(TypeInner::Scalar(scalar))
                        }
                        ref other => return Err(ResolveError::InvalidAccess(other.clone())),
                    },
                    Mf::Distance | Mf::Length => {
                        let scalar = inner
                            .scalar()
                            .ok_or(ResolveError::InvalidMathArgument(fun))?;
                        Tr::Value(TypeInner::Scalar(scalar))
                    }
                    Mf::Determinant => match *inner {
                        TypeInner::Matrix { scalar, .. } => {
                            Tr::Value(TypeInner::Scalar(scalar))
                        }
                        ref other => return Err(ResolveError::InvalidAccess(other.clone())),
                    },
                    Mf::Transpose => match *inner {
                        TypeInner::Matrix {
                            columns,
                            rows,
                            scalar,
                        } => Tr::Value(TypeInner::Matrix {
                            columns: rows,
                            rows: columns,
                            scalar,
                        }),
                        ref other => return Err(ResolveError::InvalidAccess(other.clone())),
                    },
                    Mf::Modf | Mf::Frexp => {
                        return Err(ResolveError::SpecialMathResult(fun))
                    }
                    // `ldexp` and `step` take mixed shapes; the first
                    // argument fixes the result except for scalar `step`.
                    Mf::Step => match arg1 {
                        Some(edge) => {
                            let full = past(edge)?;
                            match *full.inner_with(types) {
                                TypeInner::Vector { .. } => full.clone(),
                                _ => arg_res.clone(),
                            }
                        }
                        None => arg_res.clone(),
                    },
                    _ => arg_res.clone(),
                }
            }
            Expression::Relational { fun, argument } => match fun {
                RelationalFunction::All | RelationalFunction::Any => {
                    Tr::Value(TypeInner::Scalar(Scalar::BOOL))
                }
                RelationalFunction::IsNan | RelationalFunction::IsInf => {
                    bool_shaped(past(argument)?.inner_with(types))
                }
            },
            Expression::Select { accept, .. } => past(accept)?.clone(),
            Expression::As {
                expr,
                kind,
                convert,
            } => {
                let mut inner = past(expr)?.inner_with(types).clone();
                match inner {
                    TypeInner::Scalar(ref mut scalar)
                    | TypeInner::Vector { ref mut scalar, .. } => {
                        scalar.kind = kind;
                        if let Some(width) = convert {
                            scalar.width = width;
                        }
                    }
                    ref other => return Err(ResolveError::InvalidAccess(other.clone())),
                }
                Tr::Value(inner)
            }
            Expression::Derivative { expr, .. } => past(expr)?.clone(),
            Expression::ImageSample {
                image,
                depth_ref,
                gather,
                ..
            } => {
                let inner = past(image)?.inner_with(types);
                let class = match *inner {
                    TypeInner::Image { class, .. } => class,
                    ref other => return Err(ResolveError::InvalidImage(other.clone())),
                };
                let kind = match class {
                    ImageClass::Sampled { kind, .. } => kind,
                    ImageClass::Depth { .. } => ScalarKind::Float,
                    ImageClass::Storage { format, .. } => format.scalar_kind(),
                };
                let scalar = Scalar { kind, width: 4 };
                if gather.is_some() {
                    Tr::Value(TypeInner::Vector {
                        size: VectorSize::Quad,
                        scalar,
                    })
                } else if depth_ref.is_some() || matches!(class, ImageClass::Depth { .. }) {
                    Tr::Value(TypeInner::Scalar(scalar))
                } else {
                    Tr::Value(TypeInner::Vector {
                        size: VectorSize::Quad,
                        scalar,
                    })
                }
            }
            Expression::ImageLoad { image, .. } => {
                let inner = past(image)?.inner_with(types);
                let class = match *inner {
                    TypeInner::Image { class, .. } => class,
                    ref other => return Err(ResolveError::InvalidImage(other.clone())),
                };
                match class {
                    ImageClass::Depth { .. } => Tr::Value(TypeInner::Scalar(Scalar::F32)),
                    ImageClass::Sampled { kind, .. } => Tr::Value(TypeInner::Vector {
                        size: VectorSize::Quad,
                        scalar: Scalar { kind, width: 4 },
                    }),
                    ImageClass::Storage { format, .. } => Tr::Value(TypeInner::Vector {
                        size: VectorSize::Quad,
                        scalar: Scalar {
                            kind: format.scalar_kind(),
                            width: 4,
                        },
                    }),
                }
            }
            Expression::ImageQuery { image, query } => {
                let inner = past(image)?.inner_with(types);
                let dim = match *inner {
                    TypeInner::Image { dim, .. } => dim,
                    ref other => return Err(ResolveError::InvalidImage(other.clone())),
                };
                match query {
                    crate::expr::ImageQuery::Size { .. } => match dim {
                        ImageDimension::D1 => Tr::Value(TypeInner::Scalar(Scalar::U32)),
                        ImageDimension::D2 | ImageDimension::Cube => {
                            Tr::Value(TypeInner::Vector {
                                size: VectorSize::Bi,
                                scalar: Scalar::U32,
                            })
                        }
                        ImageDimension::D3 => Tr::Value(TypeInner::Vector {
                            size: VectorSize::Tri,
                            scalar: Scalar::U32,
                        }),
                    },
                    _ => Tr::Value(TypeInner::Scalar(Scalar::U32)),
                }
            }
            Expression::CallResult(function) => {
                let result = self.functions[function]
                    .result
                    .as_ref()
                    .ok_or(ResolveError::CallToVoidFunction)?;
                Tr::Handle(result.ty)
            }
            Expression::AtomicResult { ty, .. } => Tr::Handle(ty),
            Expression::ArrayLength(_) => Tr::Value(TypeInner::Scalar(Scalar::U32)),
        })
    }

    /// The type produced by indexing `inner`. `index` is present for
    /// `AccessIndex`.
    fn access_result(
        &self,
        inner: &TypeInner,
        index: Option<u32>,
    ) -> Result<TypeResolution, ResolveError> {
        use TypeResolution as Tr;
        let types = self.types;
        Ok(match *inner {
            TypeInner::Vector { scalar, .. } => Tr::Value(TypeInner::Scalar(scalar)),
            TypeInner::Matrix { rows, scalar, .. } => Tr::Value(TypeInner::Vector {
                size: rows,
                scalar,
            }),
            TypeInner::Array { base, .. } => Tr::Handle(base),
            TypeInner::Struct { ref members, .. } => {
                let index = index.ok_or_else(|| ResolveError::InvalidAccess(inner.clone()))?;
                let member = members.get(index as usize).ok_or_else(|| {
                    ResolveError::IndexOutOfBounds {
                        ty: inner.clone(),
                        index,
                    }
                })?;
                Tr::Handle(member.ty)
            }
            TypeInner::ValuePointer {
                size: Some(_),
                scalar,
                space,
            } => Tr::Value(TypeInner::ValuePointer {
                size: None,
                scalar,
                space,
            }),
            TypeInner::Pointer { base, space } => match types[base].inner {
                TypeInner::Vector { scalar, .. } => Tr::Value(TypeInner::ValuePointer {
                    size: None,
                    scalar,
                    space,
                }),
                TypeInner::Matrix { rows, scalar, .. } => Tr::Value(TypeInner::ValuePointer {
                    size: Some(rows),
                    scalar,
                    space,
                }),
                TypeInner::Array { base, .. } => Tr::Value(TypeInner::Pointer { base, space }),
                TypeInner::Struct { ref members, .. } => {
                    let index =
                        index.ok_or_else(|| ResolveError::InvalidAccess(inner.clone()))?;
                    let member = members.get(index as usize).ok_or_else(|| {
                        ResolveError::IndexOutOfBounds {
                            ty: types[base].inner.clone(),
                            index,
                        }
                    })?;
                    Tr::Value(TypeInner::Pointer {
                        base: member.ty,
                        space,
                    })
                }
                ref other => return Err(ResolveError::InvalidAccess(other.clone())),
            },
            ref other => return Err(ResolveError::InvalidAccess(other.clone())),
        })
    }

    fn binary_result(
        &self,
        op: crate::expr::BinaryOperator,
        left: &TypeResolution,
        right: &TypeResolution,
    ) -> Result<TypeResolution, ResolveError> {
        use crate::expr::BinaryOperator as Bo;
        use TypeResolution as Tr;
        let types = self.types;
        let left_inner = left.inner_with(types);
        let right_inner = right.inner_with(types);

        if op.is_comparison() {
            return Ok(bool_shaped(left_inner));
        }
        Ok(match op {
            Bo::LogicalAnd | Bo::LogicalOr => Tr::Value(TypeInner::Scalar(Scalar::BOOL)),
            // Shifts preserve the left operand's type.
            Bo::ShiftLeft | Bo::ShiftRight => left.clone(),
            _ => match (left_inner, right_inner) {
                (&TypeInner::Scalar(_), &TypeInner::Vector { .. }) => right.clone(),
                (&TypeInner::Vector { .. }, &TypeInner::Scalar(_)) => left.clone(),
                (&TypeInner::Matrix { .. }, &TypeInner::Scalar(_)) => left.clone(),
                (&TypeInner::Scalar(_), &TypeInner::Matrix { .. }) => right.clone(),
                (
                    &TypeInner::Matrix { rows, scalar, .. },
                    &TypeInner::Vector { .. },
                ) => Tr::Value(TypeInner::Vector { size: rows, scalar }),
                (
                    &TypeInner::Vector { scalar, .. },
                    &TypeInner::Matrix { columns, .. },
                ) => Tr::Value(TypeInner::Vector {
                    size: columns,
                    scalar,
                }),
                (
                    &TypeInner::Matrix { rows, scalar, .. },
                    &TypeInner::Matrix { columns, .. },
                ) => Tr::Value(TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                }),
                (a, b) if a == b => left.clone(),
                (a, b) => {
                    return Err(ResolveError::IncompatibleOperands {
                        op: binary_op_name(op),
                        left: a.clone(),
                        right: b.clone(),
                    })
                }
            },
        })
    }
}

/// A boolean with the same scalar-or-vector shape as `inner`.
fn bool_shaped(inner: &TypeInner) -> TypeResolution {
    match *inner {
        TypeInner::Vector { size, .. } => TypeResolution::Value(TypeInner::Vector {
            size,
            scalar: Scalar::BOOL,
        }),
        _ => TypeResolution::Value(TypeInner::Scalar(Scalar::BOOL)),
    }
}

fn binary_op_name(op: crate::expr::BinaryOperator) -> &'static str {
    use crate::expr::BinaryOperator as Bo;
    match op {
        Bo::Add => "+",
        Bo::Subtract => "-",
        Bo::Multiply => "*",
        Bo::Divide => "/",
        Bo::Modulo => "%",
        Bo::Equal => "==",
        Bo::NotEqual => "!=",
        Bo::Less => "<",
        Bo::LessEqual => "<=",
        Bo::Greater => ">",
        Bo::GreaterEqual => ">=",
        Bo::And => "&",
        Bo::ExclusiveOr => "^",
        Bo::InclusiveOr => "|",
        Bo::LogicalAnd => "&&",
        Bo::LogicalOr => "||",
        Bo::ShiftLeft => "<<",
        Bo::ShiftRight => ">>",
    }
}

/// Helper for `Literal`-typed resolutions.
impl From<Literal> for TypeResolution {
    fn from(literal: Literal) -> Self {
        TypeResolution::Value(TypeInner::Scalar(literal.scalar()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::expr::BinaryOperator;

    fn context<'a>(
        types: &'a TypeArena,
        constants: &'a Arena<Constant>,
        globals: &'a Arena<GlobalVariable>,
        functions: &'a Arena<Function>,
        locals: &'a Arena<LocalVariable>,
    ) -> ResolveContext<'a> {
        ResolveContext {
            types,
            constants,
            global_variables: globals,
            functions,
            arguments: &[],
            local_variables: locals,
        }
    }

    #[test]
    fn comparison_of_vectors_is_a_bool_vector() {
        let mut types = TypeArena::new();
        let vec3f = TypeInner::Vector {
            size: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        types.insert(Type {
            name: None,
            inner: vec3f.clone(),
        });
        let constants = Arena::new();
        let globals = Arena::new();
        let functions = Arena::new();
        let locals = Arena::new();
        let ctx = context(&types, &constants, &globals, &functions, &locals);

        let left = TypeResolution::Value(vec3f.clone());
        let right = TypeResolution::Value(vec3f);
        let res = ctx
            .binary_result(BinaryOperator::Less, &left, &right)
            .unwrap();
        assert_eq!(
            res,
            TypeResolution::Value(TypeInner::Vector {
                size: VectorSize::Tri,
                scalar: Scalar::BOOL,
            })
        );
    }

    #[test]
    fn shift_preserves_left_type() {
        let types = TypeArena::new();
        let constants = Arena::new();
        let globals = Arena::new();
        let functions = Arena::new();
        let locals = Arena::new();
        let ctx = context(&types, &constants, &globals, &functions, &locals);

        let left = TypeResolution::Value(TypeInner::Scalar(Scalar::I32));
        let right = TypeResolution::Value(TypeInner::Scalar(Scalar::U32));
        let res = ctx
            .binary_result(BinaryOperator::ShiftLeft, &left, &right)
            .unwrap();
        assert_eq!(res, left);
    }
}
