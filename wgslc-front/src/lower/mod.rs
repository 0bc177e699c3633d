//! Lowering: AST → IR.
//!
//! The lowerer resolves names, registers types, infers a type for every
//! expression it creates, and checks the semantic rules that the grammar
//! alone cannot express. It is the only writer of the [`Module`]; everything
//! downstream treats the module as immutable.
//!
//! Module-scope lowering runs in two passes: function names are registered
//! first so call sites may reference functions declared later, then every
//! declaration is lowered in order.

use std::num::NonZeroU32;

use thiserror::Error;

use crate::ast;
use crate::lex::Span;
use wgslc_core::{
    AddressSpace, ArraySize, AtomicFunction, Barrier, Binding, Block, Constant, ConstantInner,
    DerivativeAxis, DerivativeControl, Emitter, EntryPoint, Expression, FastHashMap, Function,
    FunctionArgument, FunctionResult, GlobalVariable, Handle, ImageClass, ImageQuery, Literal,
    LocalVariable, MathFunction, Module, RelationalFunction, ResolveError, ResourceBinding,
    SampleLevel, Scalar, ScalarKind, ScalarValue, ShaderStage, Statement, StructMember,
    SwitchCase, SwitchValue, SwizzleComponent, Type, TypeInner, TypeResolution, VectorSize,
};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LowerError {
    #[error("no declaration named `{name}` in scope")]
    UnknownIdent { name: String, span: Span },
    #[error("unknown type `{name}`")]
    UnknownType { name: String, span: Span },
    #[error("no function or type constructor named `{name}`")]
    UnknownFunction { name: String, span: Span },
    #[error("no member `{name}` on this type")]
    UnknownField { name: String, span: Span },
    #[error("{0}")]
    Resolve(ResolveError, Span),
    #[error("this expression is not a compile-time constant")]
    NotConstant { span: Span },
    #[error("cannot assign through `{name}`: it is not a mutable reference")]
    AssignToImmutable { name: String, span: Span },
    #[error("cannot take the address of this expression")]
    NotAPointer { span: Span },
    #[error("`{name}` expects {expected} arguments, found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("resource variables require both @group and @binding")]
    IncompleteBinding { span: Span },
    #[error("entry-point IO of `{name}` needs a @builtin or @location annotation")]
    MissingIoBinding { name: String, span: Span },
    #[error("variables in the {0} address space cannot be declared at module scope here")]
    InvalidAddressSpace(AddressSpace, Span),
    #[error("array size must be a positive constant integer")]
    BadArraySize { span: Span },
    #[error("@workgroup_size takes one to three constant integers")]
    BadWorkgroupSize { span: Span },
    #[error("switch selectors must be constant integers")]
    BadSwitchSelector { span: Span },
    #[error("`break if` is only allowed at the end of a continuing block")]
    MisplacedBreakIf { span: Span },
    #[error("the name `{name}` is declared twice at module scope")]
    DuplicateDecl { name: String, span: Span },
    #[error("integer literal does not fit in 32 bits")]
    LiteralOutOfRange { span: Span },
    #[error("a value of this expression's type cannot be used here")]
    InvalidOperand { span: Span },
    #[error("this call does not produce a value")]
    VoidCallAsValue { span: Span },
}

impl LowerError {
    pub fn span(&self) -> Span {
        match *self {
            LowerError::UnknownIdent { span, .. }
            | LowerError::UnknownType { span, .. }
            | LowerError::UnknownFunction { span, .. }
            | LowerError::UnknownField { span, .. }
            | LowerError::Resolve(_, span)
            | LowerError::NotConstant { span }
            | LowerError::AssignToImmutable { span, .. }
            | LowerError::NotAPointer { span }
            | LowerError::ArgumentCount { span, .. }
            | LowerError::IncompleteBinding { span }
            | LowerError::MissingIoBinding { span, .. }
            | LowerError::InvalidAddressSpace(_, span)
            | LowerError::BadArraySize { span }
            | LowerError::BadWorkgroupSize { span }
            | LowerError::BadSwitchSelector { span }
            | LowerError::MisplacedBreakIf { span }
            | LowerError::DuplicateDecl { span, .. }
            | LowerError::LiteralOutOfRange { span }
            | LowerError::InvalidOperand { span }
            | LowerError::VoidCallAsValue { span } => span,
        }
    }
}

/// A non-fatal finding. Warnings never block compilation.
#[derive(Clone, Debug, PartialEq)]
pub struct Warning {
    pub kind: WarningKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WarningKind {
    /// A local binding that is never read. Names starting with `_` opt out.
    UnusedLocal { name: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.kind {
            WarningKind::UnusedLocal { ref name } => {
                write!(f, "unused variable `{}`", name)
            }
        }
    }
}

type Result<T, E = LowerError> = std::result::Result<T, E>;

/// What a name in local scope refers to.
#[derive(Clone, Copy, Debug)]
enum LocalRef {
    /// A value: `let` binding, parameter, or pointer-valued binding.
    Value(Handle<Expression>),
    /// A mutable reference: `var` binding, lowered to a pointer expression.
    Pointer(Handle<Expression>),
}

#[derive(Clone, Copy)]
struct ScopeEntry {
    local: LocalRef,
    /// Index into `FunctionLowerer::declared` for unused-binding tracking.
    decl: Option<usize>,
}

struct LocalDecl {
    name: String,
    span: Span,
    used: bool,
}

#[derive(Default)]
pub struct Lowerer {
    module: Module,
    type_names: FastHashMap<String, Handle<Type>>,
    const_names: FastHashMap<String, Handle<Constant>>,
    global_names: FastHashMap<String, Handle<GlobalVariable>>,
    fn_names: FastHashMap<String, Handle<Function>>,
    warnings: Vec<Warning>,
}

/// Lower a parsed translation unit into an IR module, collecting non-fatal
/// warnings along the way.
pub fn lower(tu: &ast::TranslationUnit) -> Result<(Module, Vec<Warning>)> {
    let mut lowerer = Lowerer::default();
    lowerer.lower_tu(tu)?;
    Ok((lowerer.module, lowerer.warnings))
}

impl Lowerer {
    fn lower_tu(&mut self, tu: &ast::TranslationUnit) -> Result<()> {
        // Pre-register function names so forward references resolve.
        for decl in &tu.decls {
            if let ast::GlobalDecl::Fn(ref f) = *decl {
                if self.fn_names.contains_key(&f.name.name) {
                    return Err(LowerError::DuplicateDecl {
                        name: f.name.name.clone(),
                        span: f.name.span,
                    });
                }
                let handle = self.module.functions.append(Function::default());
                self.fn_names.insert(f.name.name.clone(), handle);
            }
        }

        for decl in &tu.decls {
            match *decl {
                ast::GlobalDecl::Struct(ref decl) => self.lower_struct(decl)?,
                ast::GlobalDecl::Alias(ref decl) => {
                    let handle = self.resolve_ast_type(&decl.ty)?;
                    self.type_names.insert(decl.name.name.clone(), handle);
                }
                ast::GlobalDecl::Const(ref decl) => self.lower_const(decl)?,
                ast::GlobalDecl::Var(ref decl) => self.lower_global_var(decl)?,
                ast::GlobalDecl::Fn(ref decl) => {
                    let handle = self.fn_names[&decl.name.name];
                    let function = FunctionLowerer::new(self).lower_fn(decl)?;
                    self.module.functions[handle] = function;
                }
            }
        }

        for decl in &tu.decls {
            if let ast::GlobalDecl::Fn(ref f) = *decl {
                if let Some(ref stage) = f.stage {
                    self.lower_entry_point(f, stage)?;
                }
            }
        }
        log::trace!(
            "lowered module: {} functions, {} globals, {} warnings",
            self.module.functions.len(),
            self.module.global_variables.len(),
            self.warnings.len()
        );
        Ok(())
    }

    fn lower_struct(&mut self, decl: &ast::StructDecl) -> Result<()> {
        let mut members = Vec::with_capacity(decl.members.len());
        let mut offset = 0u32;
        let mut struct_align = 1u32;
        for member in &decl.members {
            let ty = self.resolve_ast_type(&member.ty)?;
            let natural_align =
                wgslc_core::ty::type_alignment(&self.module.types[ty].inner, &self.module.types);
            let align = member.align.unwrap_or(natural_align).max(1);
            offset = wgslc_core::ty::align_up(offset, align);
            struct_align = struct_align.max(align);
            let size = self.module.types[ty]
                .inner
                .size(&self.module.types)
                .max(member.size.unwrap_or(0));
            members.push(StructMember {
                name: Some(member.name.name.clone()),
                ty,
                binding: io_binding(&member.io),
                offset,
            });
            offset += size;
        }
        let span = wgslc_core::ty::align_up(offset.max(1), struct_align);
        let handle = self.module.types.insert(Type {
            name: Some(decl.name.name.clone()),
            inner: TypeInner::Struct { members, span },
        });
        self.type_names.insert(decl.name.name.clone(), handle);
        Ok(())
    }

    fn lower_const(&mut self, decl: &ast::ConstDecl) -> Result<()> {
        let hint = match decl.ty {
            Some(ref ty) => {
                let handle = self.resolve_ast_type(ty)?;
                self.module.types[handle].inner.scalar()
            }
            None => None,
        };
        let handle = self.const_eval(&decl.init, hint)?;
        // Attach the declared name to anonymous evaluation results.
        if self.module.constants[handle].name.is_none() {
            self.module.constants[handle].name = Some(decl.name.name.clone());
        }
        self.const_names.insert(decl.name.name.clone(), handle);
        Ok(())
    }

    fn lower_global_var(&mut self, decl: &ast::GlobalVarDecl) -> Result<()> {
        let ty = self.resolve_ast_type(&decl.ty)?;
        let inner = &self.module.types[ty].inner;
        let space = match decl.space {
            Some(space) => {
                if space == AddressSpace::Function {
                    return Err(LowerError::InvalidAddressSpace(space, decl.name.span));
                }
                space
            }
            None if inner.is_handle() => AddressSpace::Handle,
            None => AddressSpace::Private,
        };
        let binding = match (decl.group, decl.binding) {
            (Some(group), Some(binding)) => Some(ResourceBinding { group, binding }),
            (None, None) => None,
            _ => return Err(LowerError::IncompleteBinding {
                span: decl.name.span,
            }),
        };
        let needs_binding = matches!(
            space,
            AddressSpace::Uniform | AddressSpace::Storage { .. } | AddressSpace::Handle
        );
        if needs_binding && binding.is_none() {
            return Err(LowerError::IncompleteBinding {
                span: decl.name.span,
            });
        }
        let init = match decl.init {
            Some(ref expr) => {
                let hint = self.module.types[ty].inner.scalar();
                Some(self.const_eval(expr, hint)?)
            }
            None => None,
        };
        let handle = self.module.global_variables.append(GlobalVariable {
            name: Some(decl.name.name.clone()),
            space,
            binding,
            ty,
            init,
        });
        self.global_names.insert(decl.name.name.clone(), handle);
        Ok(())
    }

    fn lower_entry_point(
        &mut self,
        decl: &ast::FunctionDecl,
        stage: &ast::StageAttribute,
    ) -> Result<()> {
        let function = self.fn_names[&decl.name.name];
        let workgroup_size = match stage.stage {
            ShaderStage::Compute => {
                if stage.workgroup_size.is_empty() || stage.workgroup_size.len() > 3 {
                    return Err(LowerError::BadWorkgroupSize {
                        span: decl.name.span,
                    });
                }
                let mut size = [1u32; 3];
                for (slot, expr) in size.iter_mut().zip(&stage.workgroup_size) {
                    *slot = self.const_eval_u32(expr)?;
                }
                size
            }
            _ => [0; 3],
        };
        self.check_entry_point_io(function, &decl.name)?;
        self.module.entry_points.push(EntryPoint {
            name: decl.name.name.clone(),
            stage: stage.stage,
            workgroup_size,
            function,
        });
        Ok(())
    }

    /// Entry-point IO must be fully annotated; struct IO needs a binding on
    /// every member. Locations are never synthesized.
    fn check_entry_point_io(
        &self,
        function: Handle<Function>,
        name: &ast::Ident,
    ) -> Result<()> {
        let function = &self.module.functions[function];
        for arg in &function.arguments {
            if arg.binding.is_none() && !self.struct_fully_bound(arg.ty) {
                return Err(LowerError::MissingIoBinding {
                    name: arg.name.clone().unwrap_or_default(),
                    span: name.span,
                });
            }
        }
        if let Some(ref result) = function.result {
            if result.binding.is_none() && !self.struct_fully_bound(result.ty) {
                return Err(LowerError::MissingIoBinding {
                    name: name.name.clone(),
                    span: name.span,
                });
            }
        }
        Ok(())
    }

    fn struct_fully_bound(&self, ty: Handle<Type>) -> bool {
        match self.module.types[ty].inner {
            TypeInner::Struct { ref members, .. } => {
                members.iter().all(|member| member.binding.is_some())
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Types

    fn resolve_ast_type(&mut self, ty: &ast::Type) -> Result<Handle<Type>> {
        let inner = match ty.kind {
            ast::TypeKind::Named(ref name) => {
                return self.type_names.get(name).copied().ok_or_else(|| {
                    LowerError::UnknownType {
                        name: name.clone(),
                        span: ty.span,
                    }
                })
            }
            ast::TypeKind::Scalar(scalar) => TypeInner::Scalar(scalar),
            ast::TypeKind::Vector { size, ref inner } => {
                let inner = self.resolve_ast_type(inner)?;
                let scalar = self.expect_scalar(inner, ty.span)?;
                TypeInner::Vector { size, scalar }
            }
            ast::TypeKind::Matrix {
                columns,
                rows,
                ref inner,
            } => {
                let inner = self.resolve_ast_type(inner)?;
                let scalar = self.expect_scalar(inner, ty.span)?;
                TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                }
            }
            ast::TypeKind::Atomic { ref inner } => {
                let inner = self.resolve_ast_type(inner)?;
                let scalar = self.expect_scalar(inner, ty.span)?;
                TypeInner::Atomic(scalar)
            }
            ast::TypeKind::Pointer { space, ref inner } => {
                let base = self.resolve_ast_type(inner)?;
                TypeInner::Pointer { base, space }
            }
            ast::TypeKind::Array {
                ref inner,
                ref size,
            } => {
                let base = self.resolve_ast_type(inner)?;
                let base_inner = &self.module.types[base].inner;
                let stride = wgslc_core::ty::align_up(
                    base_inner.size(&self.module.types).max(1),
                    wgslc_core::ty::type_alignment(base_inner, &self.module.types),
                );
                let size = match *size {
                    Some(ref expr) => {
                        let count = self.const_eval_u32(expr)?;
                        let count = NonZeroU32::new(count)
                            .ok_or(LowerError::BadArraySize { span: expr.span })?;
                        ArraySize::Constant(count)
                    }
                    None => ArraySize::Dynamic,
                };
                TypeInner::Array { base, size, stride }
            }
            ast::TypeKind::Sampled {
                dim,
                arrayed,
                multi,
                ref inner,
            } => {
                let inner = self.resolve_ast_type(inner)?;
                let scalar = self.expect_scalar(inner, ty.span)?;
                TypeInner::Image {
                    dim,
                    arrayed,
                    class: ImageClass::Sampled {
                        kind: scalar.kind,
                        multi,
                    },
                }
            }
            ast::TypeKind::Depth { dim, arrayed, multi } => TypeInner::Image {
                dim,
                arrayed,
                class: ImageClass::Depth { multi },
            },
            ast::TypeKind::StorageTexture {
                dim,
                arrayed,
                format,
                access,
            } => TypeInner::Image {
                dim,
                arrayed,
                class: ImageClass::Storage { format, access },
            },
            ast::TypeKind::Sampler { comparison } => TypeInner::Sampler { comparison },
        };
        Ok(self.module.types.insert(Type { name: None, inner }))
    }

    fn expect_scalar(&self, handle: Handle<Type>, span: Span) -> Result<Scalar> {
        match self.module.types[handle].inner {
            TypeInner::Scalar(scalar) => Ok(scalar),
            _ => Err(LowerError::InvalidOperand { span }),
        }
    }

    // ------------------------------------------------------------------
    // Constant evaluation

    /// Evaluate a compile-time constant expression into the constant table.
    fn const_eval(&mut self, expr: &ast::Expr, hint: Option<Scalar>) -> Result<Handle<Constant>> {
        match expr.kind {
            ast::ExprKind::Literal(literal) => {
                let value = literal_scalar_value(literal, hint, expr.span)?;
                Ok(self.module.constants.append(Constant {
                    name: None,
                    inner: ConstantInner::Scalar { width: 4, value },
                }))
            }
            ast::ExprKind::Ident(ref name) => self.const_names.get(name).copied().ok_or_else(
                || LowerError::NotConstant { span: expr.span },
            ),
            ast::ExprKind::Unary {
                op: wgslc_core::UnaryOperator::Negate,
                expr: ref inner,
            } => {
                let handle = self.const_eval(inner, hint)?;
                match self.module.constants[handle].inner {
                    ConstantInner::Scalar { width, value } => {
                        let value = match value {
                            ScalarValue::Sint(v) => ScalarValue::Sint(-v),
                            ScalarValue::Float(v) => ScalarValue::Float(-v),
                            _ => return Err(LowerError::NotConstant { span: expr.span }),
                        };
                        Ok(self.module.constants.append(Constant {
                            name: None,
                            inner: ConstantInner::Scalar { width, value },
                        }))
                    }
                    _ => Err(LowerError::NotConstant { span: expr.span }),
                }
            }
            ast::ExprKind::Construct { ref ty, ref args } => {
                let ty = self.resolve_ast_type(ty)?;
                let hint = self.module.types[ty].inner.scalar();
                let components = args
                    .iter()
                    .map(|arg| self.const_eval(arg, hint))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.module.constants.append(Constant {
                    name: None,
                    inner: ConstantInner::Composite { ty, components },
                }))
            }
            _ => Err(LowerError::NotConstant { span: expr.span }),
        }
    }

    fn const_eval_u32(&mut self, expr: &ast::Expr) -> Result<u32> {
        let handle = self.const_eval(expr, Some(Scalar::U32))?;
        match self.module.constants[handle].inner {
            ConstantInner::Scalar { value, .. } => match value {
                ScalarValue::Sint(v) if v >= 0 => Ok(v as u32),
                ScalarValue::Uint(v) => Ok(v as u32),
                _ => Err(LowerError::NotConstant { span: expr.span }),
            },
            _ => Err(LowerError::NotConstant { span: expr.span }),
        }
    }
}

fn io_binding(io: &ast::IoAttributes) -> Option<Binding> {
    if let Some(builtin) = io.builtin {
        Some(Binding::BuiltIn(builtin))
    } else {
        io.location.map(|location| Binding::Location {
            location,
            interpolation: io.interpolation,
            sampling: io.sampling,
        })
    }
}

fn literal_scalar_value(
    literal: ast::Literal,
    hint: Option<Scalar>,
    span: Span,
) -> Result<ScalarValue> {
    Ok(match literal {
        ast::Literal::Int(v) => ScalarValue::Sint(check_i32(v, span)? as i64),
        ast::Literal::UInt(v) => ScalarValue::Uint(v),
        ast::Literal::Bool(v) => ScalarValue::Bool(v),
        ast::Literal::Float(v) | ast::Literal::AbstractFloat(v) => ScalarValue::Float(v),
        ast::Literal::AbstractInt(v) => match hint.map(|scalar| scalar.kind) {
            Some(ScalarKind::Uint) => ScalarValue::Uint(v as u64),
            Some(ScalarKind::Float) => ScalarValue::Float(v as f64),
            _ => ScalarValue::Sint(check_i32(v, span)? as i64),
        },
    })
}

fn check_i32(value: i64, span: Span) -> Result<i32> {
    i32::try_from(value).map_err(|_| LowerError::LiteralOutOfRange { span })
}

/// An unsuffixed literal committed to a concrete IR literal. The default is
/// `i32` for integers and `f32` for floats; a hint from the surrounding
/// declaration or constructor overrides the default at the moment the
/// binding is lowered.
fn concretize_literal(
    literal: ast::Literal,
    hint: Option<Scalar>,
    span: Span,
) -> Result<Literal> {
    Ok(match literal {
        ast::Literal::Bool(v) => Literal::Bool(v),
        ast::Literal::Int(v) => Literal::I32(check_i32(v, span)?),
        ast::Literal::UInt(v) => Literal::U32(v as u32),
        ast::Literal::Float(v) | ast::Literal::AbstractFloat(v) => Literal::F32(v as f32),
        ast::Literal::AbstractInt(v) => match hint {
            Some(Scalar {
                kind: ScalarKind::Uint,
                ..
            }) => Literal::U32(
                u32::try_from(v).map_err(|_| LowerError::LiteralOutOfRange { span })?,
            ),
            Some(Scalar {
                kind: ScalarKind::Float,
                ..
            }) => Literal::F32(v as f32),
            _ => Literal::I32(check_i32(v, span)?),
        },
    })
}

// ----------------------------------------------------------------------
// Function lowering

struct FunctionLowerer<'a> {
    l: &'a mut Lowerer,
    fun: Function,
    scopes: Vec<FastHashMap<String, ScopeEntry>>,
    declared: Vec<LocalDecl>,
    emitter: Emitter,
}

impl<'a> FunctionLowerer<'a> {
    fn new(l: &'a mut Lowerer) -> Self {
        FunctionLowerer {
            l,
            fun: Function::default(),
            scopes: Vec::new(),
            declared: Vec::new(),
            emitter: Emitter::default(),
        }
    }

    fn lower_fn(mut self, decl: &ast::FunctionDecl) -> Result<Function> {
        self.fun.name = Some(decl.name.name.clone());
        self.scopes.push(FastHashMap::default());
        for (index, param) in decl.params.iter().enumerate() {
            let ty = self.l.resolve_ast_type(&param.ty)?;
            self.fun.arguments.push(FunctionArgument {
                name: Some(param.name.name.clone()),
                ty,
                binding: io_binding(&param.io),
            });
            let handle = self.append_expr(
                Expression::FunctionArgument(index as u32),
                param.name.span,
            )?;
            self.scopes.last_mut().unwrap().insert(
                param.name.name.clone(),
                ScopeEntry {
                    local: LocalRef::Value(handle),
                    decl: None,
                },
            );
        }
        if let Some((ref ty, ref io)) = decl.result {
            let ty = self.l.resolve_ast_type(ty)?;
            self.fun.result = Some(FunctionResult {
                ty,
                binding: io_binding(io),
            });
        }
        let mut body = Block::new();
        self.lower_block(&decl.body, &mut body)?;
        self.fun.body = body;
        self.scopes.pop();

        for decl in &self.declared {
            if !decl.used && !decl.name.starts_with('_') {
                self.l.warnings.push(Warning {
                    kind: WarningKind::UnusedLocal {
                        name: decl.name.clone(),
                    },
                    span: decl.span,
                });
            }
        }
        Ok(self.fun)
    }

    // ------------------------------------------------------------------
    // Expression plumbing

    fn append_expr(&mut self, expr: Expression, span: Span) -> Result<Handle<Expression>> {
        let handle = self.fun.expressions.append(expr);
        let ctx = wgslc_core::ResolveContext {
            types: &self.l.module.types,
            constants: &self.l.module.constants,
            global_variables: &self.l.module.global_variables,
            functions: &self.l.module.functions,
            arguments: &self.fun.arguments,
            local_variables: &self.fun.local_variables,
        };
        let expr_types = &self.fun.expr_types;
        let resolution = ctx
            .resolve(&self.fun.expressions[handle], |h| {
                expr_types
                    .get(h.index())
                    .ok_or(ResolveError::ExpressionForwardDependency(h))
            })
            .map_err(|e| LowerError::Resolve(e, span))?;
        self.fun.expr_types.push(resolution);
        Ok(handle)
    }

    /// Append an expression whose resolution the caller supplies, for the
    /// few cases the generic rules cannot cover.
    fn append_resolved(
        &mut self,
        expr: Expression,
        resolution: TypeResolution,
    ) -> Handle<Expression> {
        let handle = self.fun.expressions.append(expr);
        self.fun.expr_types.push(resolution);
        handle
    }

    fn resolution(&self, handle: Handle<Expression>) -> &TypeResolution {
        &self.fun.expr_types[handle.index()]
    }

    fn inner_of(&self, handle: Handle<Expression>) -> &TypeInner {
        self.resolution(handle).inner_with(&self.l.module.types)
    }

    /// Register the resolved type of `handle` in the module type arena, for
    /// contexts that need a real handle.
    fn register_resolution(&mut self, handle: Handle<Expression>) -> Handle<Type> {
        match *self.resolution(handle) {
            TypeResolution::Handle(ty) => ty,
            TypeResolution::Value(ref inner) => {
                let inner = inner.clone();
                self.l.module.types.insert(Type { name: None, inner })
            }
        }
    }

    fn lookup(&mut self, name: &str, span: Span) -> Result<LocalRef> {
        for scope in self.scopes.iter().rev() {
            if let Some(entry) = scope.get(name) {
                let entry = *entry;
                if let Some(index) = entry.decl {
                    self.declared[index].used = true;
                }
                return Ok(entry.local);
            }
        }
        if let Some(&global) = self.l.global_names.get(name) {
            let space = self.l.module.global_variables[global].space;
            let handle = self.append_expr(Expression::GlobalVariable(global), span)?;
            return Ok(if space == AddressSpace::Handle {
                LocalRef::Value(handle)
            } else {
                LocalRef::Pointer(handle)
            });
        }
        if let Some(&constant) = self.l.const_names.get(name) {
            let handle = self.append_expr(Expression::Constant(constant), span)?;
            return Ok(LocalRef::Value(handle));
        }
        Err(LowerError::UnknownIdent {
            name: name.to_string(),
            span,
        })
    }

    /// Lower an expression without the final load: the result may be a
    /// pointer, suitable as an assignment target or `&` operand.
    fn lower_ref(&mut self, expr: &ast::Expr, block: &mut Block) -> Result<Handle<Expression>> {
        self.lower_ref_hinted(expr, block, None)
    }

    fn lower_ref_hinted(
        &mut self,
        expr: &ast::Expr,
        block: &mut Block,
        hint: Option<Scalar>,
    ) -> Result<Handle<Expression>> {
        let span = expr.span;
        match expr.kind {
            ast::ExprKind::Literal(literal) => {
                let literal = concretize_literal(literal, hint, span)?;
                self.append_expr(Expression::Literal(literal), span)
            }
            ast::ExprKind::Ident(ref name) => match self.lookup(name, span)? {
                LocalRef::Value(handle) | LocalRef::Pointer(handle) => Ok(handle),
            },
            ast::ExprKind::Unary { op, ref expr } => {
                let operand = self.lower_value(expr, block)?;
                self.append_expr(Expression::Unary { op, expr: operand }, span)
            }
            ast::ExprKind::Binary {
                op,
                ref left,
                ref right,
            } => {
                let left = self.lower_value(left, block)?;
                let right = self.lower_value(right, block)?;
                self.append_expr(Expression::Binary { op, left, right }, span)
            }
            // Taking the address of a reference is a no-op in the IR: the
            // lowered expression already is the pointer.
            ast::ExprKind::AddrOf(ref inner) => {
                let handle = self.lower_ref(inner, block)?;
                if !self.inner_of(handle).is_pointer() {
                    return Err(LowerError::NotAPointer { span });
                }
                Ok(handle)
            }
            // Dereferencing keeps the pointer; the value path inserts the
            // load.
            ast::ExprKind::Deref(ref inner) => {
                let handle = self.lower_value(inner, block)?;
                if !self.inner_of(handle).is_pointer() {
                    return Err(LowerError::NotAPointer { span });
                }
                Ok(handle)
            }
            ast::ExprKind::Index {
                ref base,
                ref index,
            } => {
                let base = self.lower_ref(base, block)?;
                match const_index(index) {
                    Some(value) => {
                        self.append_expr(Expression::AccessIndex { base, index: value }, span)
                    }
                    None => {
                        let index = self.lower_value(index, block)?;
                        self.append_expr(Expression::Access { base, index }, span)
                    }
                }
            }
            ast::ExprKind::Member {
                ref base,
                ref field,
            } => self.lower_member(base, field, block),
            ast::ExprKind::Call { ref callee, ref args } => {
                match self.lower_call(callee, args, block, span)? {
                    Some(handle) => Ok(handle),
                    None => Err(LowerError::VoidCallAsValue { span }),
                }
            }
            ast::ExprKind::Construct { ref ty, ref args } => {
                self.lower_construct(ty, args, block, span)
            }
            ast::ExprKind::Bitcast { ref ty, ref expr } => {
                let ty = self.l.resolve_ast_type(ty)?;
                let kind = self
                    .l
                    .module
                    .types[ty]
                    .inner
                    .scalar_kind()
                    .ok_or(LowerError::InvalidOperand { span })?;
                let value = self.lower_value(expr, block)?;
                self.append_expr(
                    Expression::As {
                        expr: value,
                        kind,
                        convert: None,
                    },
                    span,
                )
            }
        }
    }

    /// Lower an expression to a value, inserting a load when the lowered
    /// form is a pointer.
    fn lower_value(&mut self, expr: &ast::Expr, block: &mut Block) -> Result<Handle<Expression>> {
        self.lower_value_hinted(expr, block, None)
    }

    fn lower_value_hinted(
        &mut self,
        expr: &ast::Expr,
        block: &mut Block,
        hint: Option<Scalar>,
    ) -> Result<Handle<Expression>> {
        // `&expr` produces a pointer value; don't load through it.
        if let ast::ExprKind::AddrOf(_) = expr.kind {
            return self.lower_ref_hinted(expr, block, hint);
        }
        let handle = self.lower_ref_hinted(expr, block, hint)?;
        if self.inner_of(handle).is_pointer() {
            self.append_expr(Expression::Load { pointer: handle }, expr.span)
        } else {
            Ok(handle)
        }
    }

    fn lower_member(
        &mut self,
        base: &ast::Expr,
        field: &ast::Ident,
        block: &mut Block,
    ) -> Result<Handle<Expression>> {
        enum Access {
            Member(u32),
            Swizzle(Vec<SwizzleComponent>),
        }
        let span = field.span;
        let base_handle = self.lower_ref(base, block)?;
        let access = {
            let types = &self.l.module.types;
            let inner = self.resolution(base_handle).inner_with(types);
            // Look through one level of pointer to find the aggregate.
            let aggregate = match *inner {
                TypeInner::Pointer { base, .. } => &types[base].inner,
                ref other => other,
            };
            match *aggregate {
                TypeInner::Struct { ref members, .. } => {
                    let index = members
                        .iter()
                        .position(|m| m.name.as_deref() == Some(field.name.as_str()))
                        .ok_or_else(|| LowerError::UnknownField {
                            name: field.name.clone(),
                            span,
                        })?;
                    Access::Member(index as u32)
                }
                TypeInner::Vector { size, .. }
                | TypeInner::ValuePointer {
                    size: Some(size), ..
                } => {
                    let pattern = swizzle_pattern(&field.name).ok_or_else(|| {
                        LowerError::UnknownField {
                            name: field.name.clone(),
                            span,
                        }
                    })?;
                    if pattern.iter().any(|&c| c as u32 >= size as u32) {
                        return Err(LowerError::UnknownField {
                            name: field.name.clone(),
                            span,
                        });
                    }
                    Access::Swizzle(pattern)
                }
                ref other => {
                    return Err(LowerError::Resolve(
                        ResolveError::InvalidAccess(other.clone()),
                        span,
                    ))
                }
            }
        };
        match access {
            Access::Member(index) => self.append_expr(
                Expression::AccessIndex {
                    base: base_handle,
                    index,
                },
                span,
            ),
            Access::Swizzle(pattern) if pattern.len() == 1 => self.append_expr(
                Expression::AccessIndex {
                    base: base_handle,
                    index: pattern[0] as u32,
                },
                span,
            ),
            Access::Swizzle(pattern) => {
                // Multi-component swizzles apply to values only.
                let vector = if self.inner_of(base_handle).is_pointer() {
                    self.append_expr(
                        Expression::Load {
                            pointer: base_handle,
                        },
                        span,
                    )?
                } else {
                    base_handle
                };
                let size = VectorSize::from_count(pattern.len() as u32).ok_or_else(|| {
                    LowerError::UnknownField {
                        name: field.name.clone(),
                        span,
                    }
                })?;
                let mut full = [SwizzleComponent::X; 4];
                full[..pattern.len()].copy_from_slice(&pattern);
                self.append_expr(
                    Expression::Swizzle {
                        size,
                        vector,
                        pattern: full,
                    },
                    span,
                )
            }
        }
    }

    fn lower_construct(
        &mut self,
        ty: &ast::Type,
        args: &[ast::Expr],
        block: &mut Block,
        span: Span,
    ) -> Result<Handle<Expression>> {
        let ty = self.l.resolve_ast_type(ty)?;
        let inner = self.l.module.types[ty].inner.clone();
        if args.is_empty() {
            return self.append_expr(Expression::ZeroValue(ty), span);
        }
        match inner {
            TypeInner::Scalar(scalar) => {
                // Scalar constructors are conversions.
                let value = self.lower_value_hinted(&args[0], block, Some(scalar))?;
                let from = self.inner_of(value).scalar();
                if from == Some(scalar) {
                    return Ok(value);
                }
                self.append_expr(
                    Expression::As {
                        expr: value,
                        kind: scalar.kind,
                        convert: Some(scalar.width),
                    },
                    span,
                )
            }
            TypeInner::Vector { size, scalar } => {
                let hint = Some(scalar);
                if args.len() == 1 {
                    let value = self.lower_value_hinted(&args[0], block, hint)?;
                    match *self.inner_of(value) {
                        TypeInner::Scalar(_) => {
                            return self
                                .append_expr(Expression::Splat { size, value }, span)
                        }
                        _ => {
                            let components = vec![value];
                            return self.append_expr(
                                Expression::Compose { ty, components },
                                span,
                            );
                        }
                    }
                }
                let components = args
                    .iter()
                    .map(|arg| self.lower_value_hinted(arg, block, hint))
                    .collect::<Result<Vec<_>>>()?;
                self.append_expr(Expression::Compose { ty, components }, span)
            }
            _ => {
                let hint = inner.scalar();
                let components = args
                    .iter()
                    .map(|arg| self.lower_value_hinted(arg, block, hint))
                    .collect::<Result<Vec<_>>>()?;
                self.append_expr(Expression::Compose { ty, components }, span)
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls

    /// Lower a call to a user function or builtin. Returns `None` when the
    /// call produces no value.
    fn lower_call(
        &mut self,
        callee: &ast::Ident,
        args: &[ast::Expr],
        block: &mut Block,
        span: Span,
    ) -> Result<Option<Handle<Expression>>> {
        // User-defined functions first; they shadow nothing since builtin
        // names are reserved in WGSL.
        if let Some(&function) = self.l.fn_names.get(&callee.name) {
            let arguments = args
                .iter()
                .map(|arg| self.lower_value(arg, block))
                .collect::<Result<Vec<_>>>()?;
            let expected = self.l.module.functions[function].arguments.len();
            if arguments.len() != expected {
                return Err(LowerError::ArgumentCount {
                    name: callee.name.clone(),
                    expected,
                    found: arguments.len(),
                    span,
                });
            }
            self.interrupt_emitter(block);
            let result = if self.l.module.functions[function].result.is_some() {
                Some(self.append_expr(Expression::CallResult(function), span)?)
            } else {
                None
            };
            block.push(Statement::Call {
                function,
                arguments,
                result,
            });
            self.emitter.start(&self.fun.expressions);
            return Ok(result);
        }

        // Struct constructors.
        if let Some(&ty) = self.l.type_names.get(&callee.name) {
            if args.is_empty() {
                return Ok(Some(self.append_expr(Expression::ZeroValue(ty), span)?));
            }
            let members: Vec<Option<Scalar>> = match self.l.module.types[ty].inner {
                TypeInner::Struct { ref members, .. } => members
                    .iter()
                    .map(|m| self.l.module.types[m.ty].inner.scalar())
                    .collect(),
                _ => vec![None; args.len()],
            };
            let components = args
                .iter()
                .zip(members.into_iter().chain(std::iter::repeat(None)))
                .map(|(arg, hint)| self.lower_value_hinted(arg, block, hint))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Some(
                self.append_expr(Expression::Compose { ty, components }, span)?,
            ));
        }

        self.lower_builtin_call(callee, args, block, span)
    }

    fn expect_args(
        &self,
        callee: &ast::Ident,
        args: &[ast::Expr],
        count: usize,
        span: Span,
    ) -> Result<()> {
        if args.len() != count {
            return Err(LowerError::ArgumentCount {
                name: callee.name.clone(),
                expected: count,
                found: args.len(),
                span,
            });
        }
        Ok(())
    }

    fn lower_builtin_call(
        &mut self,
        callee: &ast::Ident,
        args: &[ast::Expr],
        block: &mut Block,
        span: Span,
    ) -> Result<Option<Handle<Expression>>> {
        let name = callee.name.as_str();

        if let Some(fun) = math_function(name) {
            self.expect_args(callee, args, fun.argument_count(), span)?;
            let mut handles = args
                .iter()
                .map(|arg| self.lower_value(arg, block))
                .collect::<Result<Vec<_>>>()?;
            let arg3 = if handles.len() > 3 { handles.pop() } else { None };
            let arg2 = if handles.len() > 2 { handles.pop() } else { None };
            let arg1 = if handles.len() > 1 { handles.pop() } else { None };
            let arg = handles.pop().unwrap();
            let expr = Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            };
            // `modf`/`frexp` return predeclared result structs that the
            // generic resolver doesn't know about.
            let handle = match fun {
                MathFunction::Modf | MathFunction::Frexp => {
                    let ty = self.frexp_modf_result_type(fun, arg)?;
                    self.append_resolved(expr, TypeResolution::Handle(ty))
                }
                _ => self.append_expr(expr, span)?,
            };
            return Ok(Some(handle));
        }

        if let Some((axis, ctrl)) = derivative_function(name) {
            self.expect_args(callee, args, 1, span)?;
            let expr = self.lower_value(&args[0], block)?;
            return Ok(Some(self.append_expr(
                Expression::Derivative { axis, ctrl, expr },
                span,
            )?));
        }

        match name {
            "all" | "any" => {
                self.expect_args(callee, args, 1, span)?;
                let argument = self.lower_value(&args[0], block)?;
                let fun = if name == "all" {
                    RelationalFunction::All
                } else {
                    RelationalFunction::Any
                };
                Ok(Some(self.append_expr(
                    Expression::Relational { fun, argument },
                    span,
                )?))
            }
            "select" => {
                self.expect_args(callee, args, 3, span)?;
                let reject = self.lower_value(&args[0], block)?;
                let accept = self.lower_value(&args[1], block)?;
                let condition = self.lower_value(&args[2], block)?;
                Ok(Some(self.append_expr(
                    Expression::Select {
                        condition,
                        accept,
                        reject,
                    },
                    span,
                )?))
            }
            "arrayLength" => {
                self.expect_args(callee, args, 1, span)?;
                let pointer = self.lower_ref(&args[0], block)?;
                Ok(Some(
                    self.append_expr(Expression::ArrayLength(pointer), span)?,
                ))
            }
            "workgroupBarrier" => {
                self.expect_args(callee, args, 0, span)?;
                self.interrupt_emitter(block);
                block.push(Statement::Barrier(Barrier::WORK_GROUP));
                self.emitter.start(&self.fun.expressions);
                Ok(None)
            }
            "storageBarrier" => {
                self.expect_args(callee, args, 0, span)?;
                self.interrupt_emitter(block);
                block.push(Statement::Barrier(Barrier::STORAGE));
                self.emitter.start(&self.fun.expressions);
                Ok(None)
            }
            "textureBarrier" => {
                self.expect_args(callee, args, 0, span)?;
                self.interrupt_emitter(block);
                block.push(Statement::Barrier(Barrier::TEXTURE));
                self.emitter.start(&self.fun.expressions);
                Ok(None)
            }
            "workgroupUniformLoad" => {
                self.expect_args(callee, args, 1, span)?;
                let pointer = self.lower_ref(&args[0], block)?;
                let ty = match *self.inner_of(pointer) {
                    TypeInner::Pointer { base, .. } => base,
                    _ => return Err(LowerError::NotAPointer { span }),
                };
                self.interrupt_emitter(block);
                let result = self.append_resolved(
                    Expression::AtomicResult {
                        ty,
                        comparison: false,
                    },
                    TypeResolution::Handle(ty),
                );
                block.push(Statement::WorkGroupUniformLoad { pointer, result });
                self.emitter.start(&self.fun.expressions);
                Ok(Some(result))
            }
            "atomicLoad" => {
                self.expect_args(callee, args, 1, span)?;
                let pointer = self.lower_ref(&args[0], block)?;
                Ok(Some(
                    self.append_expr(Expression::Load { pointer }, span)?,
                ))
            }
            "atomicStore" => {
                self.expect_args(callee, args, 2, span)?;
                let pointer = self.lower_ref(&args[0], block)?;
                let hint = self.atomic_hint(pointer);
                let value = self.lower_value_hinted(&args[1], block, hint)?;
                self.interrupt_emitter(block);
                block.push(Statement::Store { pointer, value });
                self.emitter.start(&self.fun.expressions);
                Ok(None)
            }
            _ => {
                if let Some(fun) = atomic_function(name) {
                    return self.lower_atomic(callee, args, fun, block, span);
                }
                if name.starts_with("texture") {
                    return self.lower_texture_call(callee, args, block, span);
                }
                Err(LowerError::UnknownFunction {
                    name: callee.name.clone(),
                    span,
                })
            }
        }
    }

    fn atomic_hint(&self, pointer: Handle<Expression>) -> Option<Scalar> {
        match *self.inner_of(pointer) {
            TypeInner::Pointer { base, .. } => match self.l.module.types[base].inner {
                TypeInner::Atomic(scalar) => Some(scalar),
                _ => None,
            },
            _ => None,
        }
    }

    fn lower_atomic(
        &mut self,
        callee: &ast::Ident,
        args: &[ast::Expr],
        fun: AtomicFunction,
        block: &mut Block,
        span: Span,
    ) -> Result<Option<Handle<Expression>>> {
        let is_cmpxchg = matches!(fun, AtomicFunction::Exchange { compare: Some(_) });
        self.expect_args(callee, args, if is_cmpxchg { 3 } else { 2 }, span)?;
        let pointer = self.lower_ref(&args[0], block)?;
        let hint = self.atomic_hint(pointer);
        let scalar = hint.ok_or(LowerError::NotAPointer { span })?;
        let (fun, value) = if is_cmpxchg {
            let compare = self.lower_value_hinted(&args[1], block, hint)?;
            let value = self.lower_value_hinted(&args[2], block, hint)?;
            (
                AtomicFunction::Exchange {
                    compare: Some(compare),
                },
                value,
            )
        } else {
            (fun, self.lower_value_hinted(&args[1], block, hint)?)
        };
        let ty = self
            .l
            .module
            .types
            .insert(Type {
                name: None,
                inner: TypeInner::Scalar(scalar),
            });
        self.interrupt_emitter(block);
        let result = self.append_resolved(
            Expression::AtomicResult {
                ty,
                comparison: is_cmpxchg,
            },
            TypeResolution::Handle(ty),
        );
        block.push(Statement::Atomic {
            pointer,
            fun,
            value,
            result,
        });
        self.emitter.start(&self.fun.expressions);
        Ok(Some(result))
    }

    fn frexp_modf_result_type(
        &mut self,
        fun: MathFunction,
        arg: Handle<Expression>,
    ) -> Result<Handle<Type>> {
        let arg_inner = self.inner_of(arg).clone();
        let float_ty = self.l.module.types.insert(Type {
            name: None,
            inner: arg_inner.clone(),
        });
        let shape = match arg_inner {
            TypeInner::Vector { size, .. } => format!("vec{}_f32", size as u32),
            _ => "f32".to_string(),
        };
        let (name, second_name, second_inner) = match fun {
            MathFunction::Modf => (format!("__modf_result_{}", shape), "whole", arg_inner),
            _ => {
                let exp_inner = match arg_inner {
                    TypeInner::Vector { size, .. } => TypeInner::Vector {
                        size,
                        scalar: Scalar::I32,
                    },
                    _ => TypeInner::Scalar(Scalar::I32),
                };
                (format!("__frexp_result_{}", shape), "exp", exp_inner)
            }
        };
        let size = arg_inner_size(&self.l.module.types[float_ty].inner);
        let second_ty = self.l.module.types.insert(Type {
            name: None,
            inner: second_inner,
        });
        Ok(self.l.module.types.insert(Type {
            name: Some(name),
            inner: TypeInner::Struct {
                members: vec![
                    StructMember {
                        name: Some("fract".to_string()),
                        ty: float_ty,
                        binding: None,
                        offset: 0,
                    },
                    StructMember {
                        name: Some(second_name.to_string()),
                        ty: second_ty,
                        binding: None,
                        offset: size,
                    },
                ],
                span: size * 2,
            },
        }))
    }

    fn lower_texture_call(
        &mut self,
        callee: &ast::Ident,
        args: &[ast::Expr],
        block: &mut Block,
        span: Span,
    ) -> Result<Option<Handle<Expression>>> {
        let name = callee.name.as_str();
        let min_args = match name {
            "textureDimensions" | "textureNumLevels" | "textureNumLayers"
            | "textureNumSamples" => 1,
            "textureLoad" => 2,
            "textureStore" => 3,
            "textureGather" => 4,
            _ => 3,
        };
        if args.len() < min_args {
            return Err(LowerError::ArgumentCount {
                name: callee.name.clone(),
                expected: min_args,
                found: args.len(),
                span,
            });
        }

        match name {
            "textureDimensions" => {
                let image = self.lower_value(&args[0], block)?;
                let level = match args.get(1) {
                    Some(expr) => Some(self.lower_value(expr, block)?),
                    None => None,
                };
                let query = ImageQuery::Size { level };
                return Ok(Some(self.append_expr(
                    Expression::ImageQuery { image, query },
                    span,
                )?));
            }
            "textureNumLevels" | "textureNumLayers" | "textureNumSamples" => {
                let image = self.lower_value(&args[0], block)?;
                let query = match name {
                    "textureNumLevels" => ImageQuery::NumLevels,
                    "textureNumLayers" => ImageQuery::NumLayers,
                    _ => ImageQuery::NumSamples,
                };
                return Ok(Some(self.append_expr(
                    Expression::ImageQuery { image, query },
                    span,
                )?));
            }
            _ => {}
        }

        // The gather channel leads the argument list.
        let (gather, args) = if name == "textureGather" {
            let component = match const_index(&args[0]) {
                Some(i) if i < 4 => SwizzleComponent::XYZW[i as usize],
                _ => return Err(LowerError::BadSwitchSelector { span: args[0].span }),
            };
            (Some(component), &args[1..])
        } else {
            (None, args)
        };

        let image = self.lower_value(&args[0], block)?;
        let (arrayed, class) = match *self.inner_of(image) {
            TypeInner::Image { arrayed, class, .. } => (arrayed, class),
            ref other => {
                return Err(LowerError::Resolve(
                    ResolveError::InvalidImage(other.clone()),
                    span,
                ))
            }
        };

        match name {
            "textureLoad" => {
                let coordinate = self.lower_value(&args[1], block)?;
                let mut rest = 2;
                let array_index = if arrayed {
                    let h = self.lower_value(&args[rest], block)?;
                    rest += 1;
                    Some(h)
                } else {
                    None
                };
                let (sample, level) = match class {
                    ImageClass::Sampled { multi: true, .. } | ImageClass::Depth { multi: true } => {
                        let h = args
                            .get(rest)
                            .map(|a| self.lower_value(a, block))
                            .transpose()?;
                        (h, None)
                    }
                    ImageClass::Storage { .. } => (None, None),
                    _ => {
                        let h = args
                            .get(rest)
                            .map(|a| self.lower_value(a, block))
                            .transpose()?;
                        (None, h)
                    }
                };
                Ok(Some(self.append_expr(
                    Expression::ImageLoad {
                        image,
                        coordinate,
                        array_index,
                        sample,
                        level,
                    },
                    span,
                )?))
            }
            "textureStore" => {
                let coordinate = self.lower_value(&args[1], block)?;
                let mut rest = 2;
                let array_index = if arrayed {
                    let h = self.lower_value(&args[rest], block)?;
                    rest += 1;
                    Some(h)
                } else {
                    None
                };
                let value = self.lower_value(
                    args.get(rest).ok_or(LowerError::ArgumentCount {
                        name: callee.name.clone(),
                        expected: rest + 1,
                        found: args.len(),
                        span,
                    })?,
                    block,
                )?;
                self.interrupt_emitter(block);
                block.push(Statement::ImageStore {
                    image,
                    coordinate,
                    array_index,
                    value,
                });
                self.emitter.start(&self.fun.expressions);
                Ok(None)
            }
            // The sampling family: texture, sampler, coordinates, then the
            // per-variant extras, with an optional trailing constant offset.
            _ => {
                let sampler = self.lower_value(&args[1], block)?;
                let coordinate = self.lower_value(&args[2], block)?;
                let mut rest = 3;
                let array_index = if arrayed {
                    let h = self.lower_value(&args[rest], block)?;
                    rest += 1;
                    Some(h)
                } else {
                    None
                };
                let mut depth_ref = None;
                let level = match name {
                    "textureSample" => SampleLevel::Auto,
                    "textureSampleLevel" => {
                        let h = self.lower_value(&args[rest], block)?;
                        rest += 1;
                        SampleLevel::Exact(h)
                    }
                    "textureSampleBias" => {
                        let h = self.lower_value(&args[rest], block)?;
                        rest += 1;
                        SampleLevel::Bias(h)
                    }
                    "textureSampleGrad" => {
                        let x = self.lower_value(&args[rest], block)?;
                        let y = self.lower_value(&args[rest + 1], block)?;
                        rest += 2;
                        SampleLevel::Gradient { x, y }
                    }
                    "textureSampleCompare" => {
                        depth_ref = Some(self.lower_value(&args[rest], block)?);
                        rest += 1;
                        SampleLevel::Auto
                    }
                    "textureSampleCompareLevel" => {
                        depth_ref = Some(self.lower_value(&args[rest], block)?);
                        rest += 1;
                        SampleLevel::Zero
                    }
                    "textureGather" => SampleLevel::Zero,
                    _ => {
                        return Err(LowerError::UnknownFunction {
                            name: callee.name.clone(),
                            span,
                        })
                    }
                };
                let offset = match args.get(rest) {
                    Some(expr) => Some(self.l.const_eval(expr, Some(Scalar::I32))?),
                    None => None,
                };
                Ok(Some(self.append_expr(
                    Expression::ImageSample {
                        image,
                        sampler,
                        coordinate,
                        array_index,
                        offset,
                        level,
                        depth_ref,
                        gather,
                    },
                    span,
                )?))
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements

    /// Close the current emit range and push it, so that a statement can be
    /// inserted mid-expression (calls, atomics, barriers).
    fn interrupt_emitter(&mut self, block: &mut Block) {
        if let Some(stmt) = self.emitter.finish(&self.fun.expressions) {
            block.push(stmt);
        }
    }

    fn lower_block(&mut self, stmts: &[ast::Stmt], block: &mut Block) -> Result<()> {
        self.scopes.push(FastHashMap::default());
        for stmt in stmts {
            self.lower_stmt(stmt, block)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn declare(&mut self, name: &str, span: Span, local: LocalRef) {
        let index = self.declared.len();
        self.declared.push(LocalDecl {
            name: name.to_string(),
            span,
            used: false,
        });
        self.scopes.last_mut().unwrap().insert(
            name.to_string(),
            ScopeEntry {
                local,
                decl: Some(index),
            },
        );
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt, block: &mut Block) -> Result<()> {
        match stmt.kind {
            ast::StmtKind::VarDecl {
                decl,
                ref name,
                ref ty,
                ref init,
            } => self.lower_var_decl(decl, name, ty.as_ref(), init.as_ref(), block),
            ast::StmtKind::Assign {
                ref lhs,
                op,
                ref value,
            } => self.lower_assign(lhs, op, value, block),
            ast::StmtKind::Increment(ref lhs) => self.lower_crement(lhs, true, block),
            ast::StmtKind::Decrement(ref lhs) => self.lower_crement(lhs, false, block),
            ast::StmtKind::Call(ref expr) => {
                self.emitter.start(&self.fun.expressions);
                match expr.kind {
                    ast::ExprKind::Call { ref callee, ref args } => {
                        self.lower_call(callee, args, block, expr.span)?;
                    }
                    _ => unreachable!("statement calls are always calls"),
                }
                self.interrupt_emitter(block);
                Ok(())
            }
            ast::StmtKind::If {
                ref condition,
                ref accept,
                ref reject,
            } => {
                self.emitter.start(&self.fun.expressions);
                let condition = self.lower_value(condition, block)?;
                self.interrupt_emitter(block);
                let mut accept_block = Block::new();
                self.lower_block(accept, &mut accept_block)?;
                let mut reject_block = Block::new();
                self.lower_block(reject, &mut reject_block)?;
                block.push(Statement::If {
                    condition,
                    accept: accept_block,
                    reject: reject_block,
                });
                Ok(())
            }
            ast::StmtKind::Switch {
                ref selector,
                ref cases,
            } => self.lower_switch(selector, cases, block),
            ast::StmtKind::Loop {
                ref body,
                ref continuing,
                ref break_if,
            } => {
                let mut body_block = Block::new();
                self.lower_block(body, &mut body_block)?;
                let mut continuing_block = Block::new();
                self.lower_block(continuing, &mut continuing_block)?;
                let break_if = match *break_if {
                    Some(ref condition) => {
                        self.emitter.start(&self.fun.expressions);
                        let handle = self.lower_value(condition, &mut continuing_block)?;
                        self.interrupt_emitter(&mut continuing_block);
                        Some(handle)
                    }
                    None => None,
                };
                block.push(Statement::Loop {
                    body: body_block,
                    continuing: continuing_block,
                    break_if,
                });
                Ok(())
            }
            ast::StmtKind::While {
                ref condition,
                ref body,
            } => {
                let mut body_block = Block::new();
                self.emitter.start(&self.fun.expressions);
                let condition = self.lower_value(condition, &mut body_block)?;
                self.interrupt_emitter(&mut body_block);
                body_block.push(Statement::If {
                    condition,
                    accept: Block::new(),
                    reject: vec![Statement::Break],
                });
                self.lower_block(body, &mut body_block)?;
                block.push(Statement::Loop {
                    body: body_block,
                    continuing: Block::new(),
                    break_if: None,
                });
                Ok(())
            }
            ast::StmtKind::For {
                ref init,
                ref condition,
                ref update,
                ref body,
            } => {
                // The init declaration scopes over the whole construct.
                self.scopes.push(FastHashMap::default());
                let mut outer = Block::new();
                if let Some(ref init) = *init {
                    self.lower_stmt(init, &mut outer)?;
                }
                let mut body_block = Block::new();
                if let Some(ref condition) = *condition {
                    self.emitter.start(&self.fun.expressions);
                    let condition = self.lower_value(condition, &mut body_block)?;
                    self.interrupt_emitter(&mut body_block);
                    body_block.push(Statement::If {
                        condition,
                        accept: Block::new(),
                        reject: vec![Statement::Break],
                    });
                }
                self.lower_block(body, &mut body_block)?;
                let mut continuing_block = Block::new();
                if let Some(ref update) = *update {
                    self.lower_stmt(update, &mut continuing_block)?;
                }
                outer.push(Statement::Loop {
                    body: body_block,
                    continuing: continuing_block,
                    break_if: None,
                });
                self.scopes.pop();
                block.push(Statement::Block(outer));
                Ok(())
            }
            ast::StmtKind::Break => {
                block.push(Statement::Break);
                Ok(())
            }
            ast::StmtKind::BreakIf(_) => Err(LowerError::MisplacedBreakIf { span: stmt.span }),
            ast::StmtKind::Continue => {
                block.push(Statement::Continue);
                Ok(())
            }
            ast::StmtKind::Return(ref value) => {
                self.emitter.start(&self.fun.expressions);
                let hint = self
                    .fun
                    .result
                    .as_ref()
                    .and_then(|r| self.l.module.types[r.ty].inner.scalar());
                let value = match *value {
                    Some(ref expr) => Some(self.lower_value_hinted(expr, block, hint)?),
                    None => None,
                };
                self.interrupt_emitter(block);
                block.push(Statement::Return { value });
                Ok(())
            }
            ast::StmtKind::Discard => {
                block.push(Statement::Kill);
                Ok(())
            }
            ast::StmtKind::Block(ref stmts) => {
                let mut inner = Block::new();
                self.lower_block(stmts, &mut inner)?;
                block.push(Statement::Block(inner));
                Ok(())
            }
        }
    }

    fn lower_var_decl(
        &mut self,
        decl: ast::VarDeclKind,
        name: &ast::Ident,
        ty: Option<&ast::Type>,
        init: Option<&ast::Expr>,
        block: &mut Block,
    ) -> Result<()> {
        let explicit_ty = ty.map(|ty| self.l.resolve_ast_type(ty)).transpose()?;
        let hint = explicit_ty.and_then(|ty| self.l.module.types[ty].inner.scalar());
        match decl {
            ast::VarDeclKind::Let | ast::VarDeclKind::Const => {
                let init = init.expect("the grammar requires an initializer");
                self.emitter.start(&self.fun.expressions);
                let handle = self.lower_value_hinted(init, block, hint)?;
                self.interrupt_emitter(block);
                self.fun
                    .named_expressions
                    .insert(handle, name.name.clone());
                self.declare(&name.name, name.span, LocalRef::Value(handle));
                Ok(())
            }
            ast::VarDeclKind::Var => {
                self.emitter.start(&self.fun.expressions);
                let init_handle = match init {
                    Some(expr) => Some(self.lower_value_hinted(expr, block, hint)?),
                    None => None,
                };
                self.interrupt_emitter(block);
                let ty = match explicit_ty {
                    Some(ty) => ty,
                    None => {
                        let handle = init_handle.ok_or(LowerError::InvalidOperand {
                            span: name.span,
                        })?;
                        self.register_resolution(handle)
                    }
                };
                // Literal initializers ride on the variable itself;
                // anything computed becomes an explicit store.
                let const_init = init_handle.filter(|&h| {
                    matches!(self.fun.expressions[h], Expression::Literal(_))
                });
                let local = self.fun.local_variables.append(LocalVariable {
                    name: Some(name.name.clone()),
                    ty,
                    init: const_init,
                });
                let pointer =
                    self.append_expr(Expression::LocalVariable(local), name.span)?;
                if let (Some(value), None) = (init_handle, const_init) {
                    block.push(Statement::Store { pointer, value });
                }
                self.declare(&name.name, name.span, LocalRef::Pointer(pointer));
                Ok(())
            }
        }
    }

    fn lower_assign(
        &mut self,
        lhs: &ast::Expr,
        op: Option<wgslc_core::BinaryOperator>,
        value: &ast::Expr,
        block: &mut Block,
    ) -> Result<()> {
        // `_ = expr;` evaluates and discards.
        if let ast::ExprKind::Ident(ref name) = lhs.kind {
            if name == "_" {
                self.emitter.start(&self.fun.expressions);
                self.lower_value(value, block)?;
                self.interrupt_emitter(block);
                return Ok(());
            }
        }
        self.emitter.start(&self.fun.expressions);
        let pointer = self.lower_ref(lhs, block)?;
        if !self.inner_of(pointer).is_pointer() {
            return Err(LowerError::AssignToImmutable {
                name: assign_target_name(lhs),
                span: lhs.span,
            });
        }
        let hint = pointee_scalar(self.inner_of(pointer), &self.l.module.types);
        let value_handle = match op {
            Some(op) => {
                let left = self.append_expr(Expression::Load { pointer }, lhs.span)?;
                let right = self.lower_value_hinted(value, block, hint)?;
                self.append_expr(Expression::Binary { op, left, right }, value.span)?
            }
            None => self.lower_value_hinted(value, block, hint)?,
        };
        self.interrupt_emitter(block);
        block.push(Statement::Store {
            pointer,
            value: value_handle,
        });
        Ok(())
    }

    fn lower_crement(
        &mut self,
        lhs: &ast::Expr,
        increment: bool,
        block: &mut Block,
    ) -> Result<()> {
        self.emitter.start(&self.fun.expressions);
        let pointer = self.lower_ref(lhs, block)?;
        if !self.inner_of(pointer).is_pointer() {
            return Err(LowerError::AssignToImmutable {
                name: assign_target_name(lhs),
                span: lhs.span,
            });
        }
        let scalar = pointee_scalar(self.inner_of(pointer), &self.l.module.types)
            .ok_or(LowerError::InvalidOperand { span: lhs.span })?;
        let one = match scalar.kind {
            ScalarKind::Uint => Literal::U32(1),
            _ => Literal::I32(1),
        };
        let left = self.append_expr(Expression::Load { pointer }, lhs.span)?;
        let right = self.append_expr(Expression::Literal(one), lhs.span)?;
        let op = if increment {
            wgslc_core::BinaryOperator::Add
        } else {
            wgslc_core::BinaryOperator::Subtract
        };
        let value = self.append_expr(Expression::Binary { op, left, right }, lhs.span)?;
        self.interrupt_emitter(block);
        block.push(Statement::Store { pointer, value });
        Ok(())
    }

    fn lower_switch(
        &mut self,
        selector: &ast::Expr,
        cases: &[ast::SwitchCase],
        block: &mut Block,
    ) -> Result<()> {
        self.emitter.start(&self.fun.expressions);
        let selector_handle = self.lower_value(selector, block)?;
        self.interrupt_emitter(block);
        let unsigned = matches!(
            self.inner_of(selector_handle).scalar_kind(),
            Some(ScalarKind::Uint)
        );
        let mut lowered_cases = Vec::with_capacity(cases.len());
        for case in cases {
            let mut values = Vec::with_capacity(case.selectors.len());
            for selector in &case.selectors {
                values.push(match *selector {
                    None => SwitchValue::Default,
                    Some(ref expr) => {
                        let value = const_switch_value(expr, unsigned)
                            .ok_or(LowerError::BadSwitchSelector { span: expr.span })?;
                        value
                    }
                });
            }
            let mut body = Block::new();
            self.lower_block(&case.body, &mut body)?;
            lowered_cases.push(SwitchCase { values, body });
        }
        block.push(Statement::Switch {
            selector: selector_handle,
            cases: lowered_cases,
        });
        Ok(())
    }
}

fn assign_target_name(expr: &ast::Expr) -> String {
    match expr.kind {
        ast::ExprKind::Ident(ref name) => name.clone(),
        _ => "<expression>".to_string(),
    }
}

fn pointee_scalar(inner: &TypeInner, types: &wgslc_core::TypeArena) -> Option<Scalar> {
    match *inner {
        TypeInner::Pointer { base, .. } => types[base].inner.scalar(),
        TypeInner::ValuePointer { scalar, .. } => Some(scalar),
        _ => None,
    }
}

fn arg_inner_size(inner: &TypeInner) -> u32 {
    match *inner {
        TypeInner::Vector { size, scalar } => size as u32 * scalar.width as u32,
        TypeInner::Scalar(scalar) => scalar.width as u32,
        _ => 4,
    }
}

fn const_index(expr: &ast::Expr) -> Option<u32> {
    match expr.kind {
        ast::ExprKind::Literal(ast::Literal::AbstractInt(v))
        | ast::ExprKind::Literal(ast::Literal::Int(v)) => u32::try_from(v).ok(),
        ast::ExprKind::Literal(ast::Literal::UInt(v)) => u32::try_from(v).ok(),
        _ => None,
    }
}

fn const_switch_value(expr: &ast::Expr, unsigned: bool) -> Option<SwitchValue> {
    let (value, negative) = match expr.kind {
        ast::ExprKind::Literal(ast::Literal::AbstractInt(v))
        | ast::ExprKind::Literal(ast::Literal::Int(v)) => (v, false),
        ast::ExprKind::Literal(ast::Literal::UInt(v)) => (v as i64, false),
        ast::ExprKind::Unary {
            op: wgslc_core::UnaryOperator::Negate,
            ref expr,
        } => match expr.kind {
            ast::ExprKind::Literal(ast::Literal::AbstractInt(v))
            | ast::ExprKind::Literal(ast::Literal::Int(v)) => (v, true),
            _ => return None,
        },
        _ => return None,
    };
    let value = if negative { -value } else { value };
    Some(if unsigned {
        SwitchValue::U32(u32::try_from(value).ok()?)
    } else {
        SwitchValue::I32(i32::try_from(value).ok()?)
    })
}

fn math_function(name: &str) -> Option<MathFunction> {
    use MathFunction as Mf;
    Some(match name {
        "abs" => Mf::Abs,
        "min" => Mf::Min,
        "max" => Mf::Max,
        "clamp" => Mf::Clamp,
        "cos" => Mf::Cos,
        "cosh" => Mf::Cosh,
        "sin" => Mf::Sin,
        "sinh" => Mf::Sinh,
        "tan" => Mf::Tan,
        "tanh" => Mf::Tanh,
        "acos" => Mf::Acos,
        "asin" => Mf::Asin,
        "atan" => Mf::Atan,
        "atan2" => Mf::Atan2,
        "ceil" => Mf::Ceil,
        "floor" => Mf::Floor,
        "round" => Mf::Round,
        "fract" => Mf::Fract,
        "trunc" => Mf::Trunc,
        "modf" => Mf::Modf,
        "frexp" => Mf::Frexp,
        "ldexp" => Mf::Ldexp,
        "exp" => Mf::Exp,
        "exp2" => Mf::Exp2,
        "log" => Mf::Log,
        "log2" => Mf::Log2,
        "pow" => Mf::Pow,
        "sqrt" => Mf::Sqrt,
        "inverseSqrt" => Mf::InverseSqrt,
        "dot" => Mf::Dot,
        "cross" => Mf::Cross,
        "distance" => Mf::Distance,
        "length" => Mf::Length,
        "normalize" => Mf::Normalize,
        "faceForward" => Mf::FaceForward,
        "reflect" => Mf::Reflect,
        "refract" => Mf::Refract,
        "sign" => Mf::Sign,
        "fma" => Mf::Fma,
        "mix" => Mf::Mix,
        "step" => Mf::Step,
        "smoothstep" => Mf::SmoothStep,
        "transpose" => Mf::Transpose,
        "determinant" => Mf::Determinant,
        "countOneBits" => Mf::CountOneBits,
        "reverseBits" => Mf::ReverseBits,
        "extractBits" => Mf::ExtractBits,
        "insertBits" => Mf::InsertBits,
        "firstTrailingBit" => Mf::FirstTrailingBit,
        "firstLeadingBit" => Mf::FirstLeadingBit,
        _ => return None,
    })
}

fn derivative_function(name: &str) -> Option<(DerivativeAxis, DerivativeControl)> {
    use DerivativeAxis as Axis;
    use DerivativeControl as Ctrl;
    Some(match name {
        "dpdx" => (Axis::X, Ctrl::None),
        "dpdxCoarse" => (Axis::X, Ctrl::Coarse),
        "dpdxFine" => (Axis::X, Ctrl::Fine),
        "dpdy" => (Axis::Y, Ctrl::None),
        "dpdyCoarse" => (Axis::Y, Ctrl::Coarse),
        "dpdyFine" => (Axis::Y, Ctrl::Fine),
        "fwidth" => (Axis::Width, Ctrl::None),
        "fwidthCoarse" => (Axis::Width, Ctrl::Coarse),
        "fwidthFine" => (Axis::Width, Ctrl::Fine),
        _ => return None,
    })
}

fn atomic_function(name: &str) -> Option<AtomicFunction> {
    use AtomicFunction as Af;
    Some(match name {
        "atomicAdd" => Af::Add,
        "atomicSub" => Af::Subtract,
        "atomicAnd" => Af::And,
        "atomicXor" => Af::ExclusiveOr,
        "atomicOr" => Af::InclusiveOr,
        "atomicMin" => Af::Min,
        "atomicMax" => Af::Max,
        "atomicExchange" => Af::Exchange { compare: None },
        // Placeholder handle; `lower_atomic` substitutes the real compare
        // operand once the arguments are lowered.
        "atomicCompareExchangeWeak" => Af::Exchange {
            compare: Some(Handle::from_usize(0)),
        },
        _ => return None,
    })
}

fn swizzle_pattern(name: &str) -> Option<Vec<SwizzleComponent>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    name.chars().map(SwizzleComponent::from_letter).collect()
}
