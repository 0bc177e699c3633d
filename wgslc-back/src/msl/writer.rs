//! MSL text emission.

use std::fmt::Write;

use wgslc_core::{
    AddressSpace, ArraySize, AtomicFunction, Barrier, Binding, Block, BuiltIn, ConstantInner,
    Expression, Function, Handle, ImageClass, ImageDimension, Literal, MathFunction, Module,
    RelationalFunction, SampleLevel, Scalar, ScalarKind, ScalarValue, ShaderStage, Statement,
    StorageAccess, SwitchValue, Type, TypeInner, TypeResolution, UnaryOperator,
};

use super::{keywords::RESERVED, Error, Options};
use crate::namer::{process_names, NameKey, Namer};
use crate::{BoundsCheckPolicy, Level, TranslationInfo};

const SIZES_BUFFER_SLOT: u8 = 30;

struct FunCtx<'m> {
    handle: Handle<Function>,
    fun: &'m Function,
}

impl<'m> FunCtx<'m> {
    fn inner_of<'a>(
        &'a self,
        module: &'a Module,
        handle: Handle<Expression>,
    ) -> &'a TypeInner {
        self.fun.expr_types[handle.index()].inner_with(&module.types)
    }
}

pub(super) struct Writer<'a> {
    out: String,
    module: &'a Module,
    options: &'a Options,
    names: wgslc_core::FastHashMap<NameKey, String>,
    namer: Namer,
    /// Wrapper struct name per fixed-size array type.
    array_names: wgslc_core::FastHashMap<Handle<Type>, String>,
    /// Polyfill name per modf/frexp result type.
    math_helpers: wgslc_core::FastHashMap<Handle<Type>, String>,
    /// Expressions bound to a name in the current function.
    baked: wgslc_core::FastHashMap<Handle<Expression>, String>,
    /// Per-function: does it (transitively) query a runtime array length?
    needs_sizes: Vec<bool>,
    uses_int_div: bool,
    uses_int_mod: bool,
    loop_counter: u32,
}

impl<'a> Writer<'a> {
    pub(super) fn new(module: &'a Module, options: &'a Options) -> Self {
        let mut namer = Namer::new(RESERVED, false);
        namer.reserve("_wgsl_div");
        namer.reserve("_wgsl_mod");
        namer.reserve("_buffer_sizes");
        namer.reserve("_mslBufferSizes");
        namer.reserve("varyings");
        let names = process_names(module, &mut namer);
        Writer {
            out: String::new(),
            module,
            options,
            names,
            namer,
            array_names: Default::default(),
            math_helpers: Default::default(),
            baked: Default::default(),
            needs_sizes: Vec::new(),
            uses_int_div: false,
            uses_int_mod: false,
            loop_counter: 0,
        }
    }

    pub(super) fn finish(self) -> String {
        self.out
    }

    pub(super) fn write(&mut self) -> Result<TranslationInfo, Error> {
        self.scan_module();
        writeln!(self.out, "#include <metal_stdlib>")?;
        writeln!(self.out, "#include <simd/simd.h>")?;
        writeln!(self.out)?;
        writeln!(self.out, "using metal::uint;")?;
        writeln!(self.out)?;

        let requires_sizes_buffer = self.needs_sizes.iter().any(|&n| n);
        if requires_sizes_buffer {
            writeln!(self.out, "struct _mslBufferSizes {{")?;
            for (handle, _) in self.module.global_variables.iter() {
                if self.global_runtime_stride(handle).is_some() {
                    writeln!(self.out, "{}uint size{};", Level(1), handle.index())?;
                }
            }
            writeln!(self.out, "}};")?;
            writeln!(self.out)?;
        }

        self.write_type_definitions()?;
        self.write_polyfills()?;
        self.write_module_constants()?;

        for (handle, fun) in self.module.functions.iter() {
            self.write_function(handle, fun)?;
        }

        let mut info = TranslationInfo {
            entry_point_names: Vec::new(),
            requires_sizes_buffer,
        };
        for (index, ep) in self.module.entry_points.iter().enumerate() {
            let name = self.names[&NameKey::EntryPoint(index as u32)].clone();
            self.write_entry_point(index as u32, ep)?;
            info.entry_point_names.push(name);
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Scanning

    fn scan_module(&mut self) {
        // Direct uses per function first, then propagate through calls.
        let mut direct = vec![false; self.module.functions.len()];
        for (handle, fun) in self.module.functions.iter() {
            for (_, expr) in fun.expressions.iter() {
                match *expr {
                    Expression::ArrayLength(_) => direct[handle.index()] = true,
                    Expression::Binary { op, left, .. } => {
                        let is_int = matches!(
                            fun.expr_types[left.index()]
                                .inner_with(&self.module.types)
                                .scalar_kind(),
                            Some(ScalarKind::Sint | ScalarKind::Uint)
                        );
                        match op {
                            wgslc_core::BinaryOperator::Divide if is_int => {
                                self.uses_int_div = true
                            }
                            wgslc_core::BinaryOperator::Modulo if is_int => {
                                self.uses_int_mod = true
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
        }
        // A call to a function that needs the sizes buffer makes the caller
        // need it too; iterate to a fixed point.
        let mut changed = true;
        while changed {
            changed = false;
            for (handle, fun) in self.module.functions.iter() {
                if direct[handle.index()] {
                    continue;
                }
                if self.block_calls_needy(&fun.body, &direct) {
                    direct[handle.index()] = true;
                    changed = true;
                }
            }
        }
        self.needs_sizes = direct;
    }

    fn block_calls_needy(&self, block: &Block, needy: &[bool]) -> bool {
        block.iter().any(|stmt| match *stmt {
            Statement::Call { function, .. } => needy[function.index()],
            Statement::Block(ref b) => self.block_calls_needy(b, needy),
            Statement::If {
                ref accept,
                ref reject,
                ..
            } => self.block_calls_needy(accept, needy) || self.block_calls_needy(reject, needy),
            Statement::Switch { ref cases, .. } => cases
                .iter()
                .any(|case| self.block_calls_needy(&case.body, needy)),
            Statement::Loop {
                ref body,
                ref continuing,
                ..
            } => self.block_calls_needy(body, needy) || self.block_calls_needy(continuing, needy),
            _ => false,
        })
    }

    /// Stride of the runtime array behind a storage global, if there is one.
    fn global_runtime_stride(&self, handle: Handle<wgslc_core::GlobalVariable>) -> Option<u32> {
        let var = &self.module.global_variables[handle];
        match self.module.types[var.ty].inner {
            TypeInner::Array {
                size: ArraySize::Dynamic,
                stride,
                ..
            } => Some(stride),
            TypeInner::Struct { ref members, .. } => match members.last() {
                Some(member) => match self.module.types[member.ty].inner {
                    TypeInner::Array {
                        size: ArraySize::Dynamic,
                        stride,
                        ..
                    } => Some(stride),
                    _ => None,
                },
                None => None,
            },
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Types

    fn scalar_name(scalar: Scalar) -> &'static str {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Float, 2) => "half",
            (ScalarKind::Float, _) => "float",
            (ScalarKind::Sint, _) => "int",
            (ScalarKind::Uint, _) => "uint",
            (ScalarKind::Bool, _) => "bool",
        }
    }

    fn type_name(&self, handle: Handle<Type>) -> Result<String, Error> {
        self.inner_type_name(&self.module.types[handle].inner, Some(handle))
    }

    fn inner_type_name(
        &self,
        inner: &TypeInner,
        handle: Option<Handle<Type>>,
    ) -> Result<String, Error> {
        Ok(match *inner {
            TypeInner::Scalar(scalar) => Self::scalar_name(scalar).to_string(),
            TypeInner::Vector { size, scalar } => {
                format!("metal::{}{}", Self::scalar_name(scalar), size as u8)
            }
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => format!(
                "metal::{}{}x{}",
                Self::scalar_name(scalar),
                columns as u8,
                rows as u8
            ),
            TypeInner::Atomic(scalar) => match scalar.kind {
                ScalarKind::Sint => "metal::atomic_int".to_string(),
                _ => "metal::atomic_uint".to_string(),
            },
            TypeInner::Pointer { base, space } => {
                let base = self.type_name(base)?;
                format!("{} {}*", address_space_name(space), base)
            }
            TypeInner::ValuePointer {
                size,
                scalar,
                space,
            } => {
                let base = match size {
                    Some(size) => {
                        format!("metal::{}{}", Self::scalar_name(scalar), size as u8)
                    }
                    None => Self::scalar_name(scalar).to_string(),
                };
                format!("{} {}*", address_space_name(space), base)
            }
            TypeInner::Array {
                size: ArraySize::Constant(_),
                ..
            } => match handle.and_then(|handle| self.array_names.get(&handle)) {
                Some(name) => name.clone(),
                None => return Err(Error::Validation("array type without a wrapper")),
            },
            TypeInner::Array { base, .. } => {
                format!("device {}*", self.type_name(base)?)
            }
            TypeInner::Struct { .. } => match handle {
                Some(handle) => self.names[&NameKey::Type(handle)].clone(),
                None => return Err(Error::Validation("anonymous struct type")),
            },
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => {
                let dim_name = match dim {
                    ImageDimension::D1 => "1d",
                    ImageDimension::D2 => "2d",
                    ImageDimension::D3 => "3d",
                    ImageDimension::Cube => "cube",
                };
                match class {
                    ImageClass::Depth { multi } => format!(
                        "metal::depth{}{}{}<float>",
                        dim_name,
                        if multi { "_ms" } else { "" },
                        if arrayed { "_array" } else { "" },
                    ),
                    ImageClass::Sampled { kind, multi } => format!(
                        "metal::texture{}{}{}<{}>",
                        dim_name,
                        if multi { "_ms" } else { "" },
                        if arrayed { "_array" } else { "" },
                        Self::scalar_name(Scalar { kind, width: 4 }),
                    ),
                    ImageClass::Storage { format, access } => {
                        let access_name = if access.contains(StorageAccess::LOAD)
                            && access.contains(StorageAccess::STORE)
                        {
                            "read_write"
                        } else if access.contains(StorageAccess::STORE) {
                            "write"
                        } else {
                            "read"
                        };
                        format!(
                            "metal::texture{}{}<{}, metal::access::{}>",
                            dim_name,
                            if arrayed { "_array" } else { "" },
                            Self::scalar_name(Scalar {
                                kind: format.scalar_kind(),
                                width: 4
                            }),
                            access_name,
                        )
                    }
                }
            }
            TypeInner::Sampler { .. } => "metal::sampler".to_string(),
        })
    }

    fn resolution_type_name(&self, resolution: &TypeResolution) -> Result<String, Error> {
        match *resolution {
            TypeResolution::Handle(handle) => self.type_name(handle),
            TypeResolution::Value(ref inner) => match self.module.types.find(inner) {
                Some(handle) => self.type_name(handle),
                None => self.inner_type_name(inner, None),
            },
        }
    }

    fn write_type_definitions(&mut self) -> Result<(), Error> {
        for (handle, ty) in self.module.types.iter() {
            match ty.inner {
                TypeInner::Array {
                    base,
                    size: ArraySize::Constant(count),
                    ..
                } => {
                    let name = self.namer.call(&format!("_array_{}", handle.index()));
                    let base_name = self.type_name(base)?;
                    writeln!(self.out, "struct {} {{", name)?;
                    writeln!(self.out, "{}{} inner[{}];", Level(1), base_name, count)?;
                    writeln!(self.out, "}};")?;
                    writeln!(self.out)?;
                    self.array_names.insert(handle, name);
                }
                TypeInner::Struct { ref members, .. } => {
                    let name = self.names[&NameKey::Type(handle)].clone();
                    writeln!(self.out, "struct {} {{", name)?;
                    for (index, member) in members.iter().enumerate() {
                        let member_name =
                            self.names[&NameKey::StructMember(handle, index as u32)].clone();
                        match self.module.types[member.ty].inner {
                            // Runtime arrays tail a storage struct as a
                            // one-element array.
                            TypeInner::Array {
                                base,
                                size: ArraySize::Dynamic,
                                ..
                            } => {
                                let base_name = self.type_name(base)?;
                                writeln!(
                                    self.out,
                                    "{}{} {}[1];",
                                    Level(1),
                                    base_name,
                                    member_name
                                )?;
                            }
                            _ => {
                                let type_name = self.type_name(member.ty)?;
                                writeln!(
                                    self.out,
                                    "{}{} {};",
                                    Level(1),
                                    type_name,
                                    member_name
                                )?;
                            }
                        }
                    }
                    writeln!(self.out, "}};")?;
                    writeln!(self.out)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn write_polyfills(&mut self) -> Result<(), Error> {
        if self.uses_int_div {
            writeln!(self.out, "template <typename T>")?;
            writeln!(self.out, "inline T _wgsl_div(T lhs, T rhs) {{")?;
            // Division by zero yields the left operand.
            writeln!(
                self.out,
                "{}return metal::select(lhs / metal::select(rhs, T(1), rhs == T(0)), lhs, rhs == T(0));",
                Level(1)
            )?;
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
        }
        if self.uses_int_mod {
            writeln!(self.out, "template <typename T>")?;
            writeln!(self.out, "inline T _wgsl_mod(T lhs, T rhs) {{")?;
            writeln!(
                self.out,
                "{}return metal::select(lhs % metal::select(rhs, T(1), rhs == T(0)), T(0), rhs == T(0));",
                Level(1)
            )?;
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
        }

        // modf/frexp return result structs; wrap the out-parameter forms.
        let mut helpers: Vec<(MathFunction, Handle<Type>)> = Vec::new();
        for (_, fun) in self.module.functions.iter() {
            for (handle, expr) in fun.expressions.iter() {
                if let Expression::Math {
                    fun: math_fun @ (MathFunction::Modf | MathFunction::Frexp),
                    ..
                } = *expr
                {
                    if let TypeResolution::Handle(ty) = fun.expr_types[handle.index()] {
                        if !helpers.iter().any(|&(_, t)| t == ty) {
                            helpers.push((math_fun, ty));
                        }
                    }
                }
            }
        }
        for (math_fun, ty) in helpers {
            let struct_name = self.names[&NameKey::Type(ty)].clone();
            let (arg_ty, second_ty) = match self.module.types[ty].inner {
                TypeInner::Struct { ref members, .. } if members.len() == 2 => (
                    self.type_name(members[0].ty)?,
                    self.type_name(members[1].ty)?,
                ),
                _ => return Err(Error::Validation("malformed math result struct")),
            };
            let helper_name = self.namer.call(match math_fun {
                MathFunction::Modf => "_wgsl_modf",
                _ => "_wgsl_frexp",
            });
            writeln!(
                self.out,
                "inline {} {}({} arg) {{",
                struct_name, helper_name, arg_ty
            )?;
            match math_fun {
                MathFunction::Modf => {
                    writeln!(self.out, "{}{} whole;", Level(1), second_ty)?;
                    writeln!(
                        self.out,
                        "{}{} fract = metal::modf(arg, whole);",
                        Level(1),
                        arg_ty
                    )?;
                    writeln!(
                        self.out,
                        "{}return {} {{ fract, whole }};",
                        Level(1),
                        struct_name
                    )?;
                }
                _ => {
                    writeln!(self.out, "{}{} exp;", Level(1), second_ty)?;
                    writeln!(
                        self.out,
                        "{}{} fract = metal::frexp(arg, exp);",
                        Level(1),
                        arg_ty
                    )?;
                    writeln!(
                        self.out,
                        "{}return {} {{ fract, exp }};",
                        Level(1),
                        struct_name
                    )?;
                }
            }
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
            self.math_helpers.insert(ty, helper_name);
        }
        Ok(())
    }

    fn write_module_constants(&mut self) -> Result<(), Error> {
        let mut wrote = false;
        for (handle, constant) in self.module.constants.iter() {
            if constant.name.is_none() {
                continue;
            }
            let name = self.names[&NameKey::Constant(handle)].clone();
            let (type_name, value) = match constant.inner {
                ConstantInner::Scalar { value, .. } => {
                    let scalar = scalar_of_value(value);
                    (Self::scalar_name(scalar).to_string(), self.scalar_text(value))
                }
                ConstantInner::Composite { ty, .. } => {
                    (self.type_name(ty)?, self.constant_text(handle)?)
                }
            };
            writeln!(self.out, "constant {} {} = {};", type_name, name, value)?;
            wrote = true;
        }
        if wrote {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn scalar_text(&self, value: ScalarValue) -> String {
        match value {
            ScalarValue::Sint(v) => format!("{}", v),
            ScalarValue::Uint(v) => format!("{}u", v),
            ScalarValue::Float(v) => float_text(v),
            ScalarValue::Bool(v) => format!("{}", v),
        }
    }

    fn constant_text(&self, handle: Handle<wgslc_core::Constant>) -> Result<String, Error> {
        let constant = &self.module.constants[handle];
        if let Some(name) = constant
            .name
            .as_ref()
            .and_then(|_| self.names.get(&NameKey::Constant(handle)))
        {
            return Ok(name.clone());
        }
        Ok(match constant.inner {
            ConstantInner::Scalar { value, .. } => self.scalar_text(value),
            ConstantInner::Composite { ty, ref components } => {
                let mut parts = Vec::with_capacity(components.len());
                for &component in components {
                    parts.push(self.constant_text(component)?);
                }
                match self.module.types[ty].inner {
                    TypeInner::Struct { .. } | TypeInner::Array { .. } => {
                        format!("{} {{ {} }}", self.type_name(ty)?, parts.join(", "))
                    }
                    _ => format!("{}({})", self.type_name(ty)?, parts.join(", ")),
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Globals as parameters

    fn global_param(
        &self,
        handle: Handle<wgslc_core::GlobalVariable>,
        stage: Option<ShaderStage>,
    ) -> Result<String, Error> {
        let var = &self.module.global_variables[handle];
        let name = self.names[&NameKey::GlobalVariable(handle)].clone();
        let attribute = match (stage, var.binding) {
            (Some(stage), Some(ref binding)) => {
                let target = self.options.resolve_resource_binding(stage, binding)?;
                match var.space {
                    AddressSpace::Handle => {
                        match self.module.types[var.ty].inner {
                            TypeInner::Sampler { .. } => format!(
                                " [[sampler({})]]",
                                target.sampler.ok_or(Error::Validation(
                                    "binding target has no sampler slot"
                                ))?
                            ),
                            _ => format!(
                                " [[texture({})]]",
                                target.texture.ok_or(Error::Validation(
                                    "binding target has no texture slot"
                                ))?
                            ),
                        }
                    }
                    _ => format!(
                        " [[buffer({})]]",
                        target
                            .buffer
                            .ok_or(Error::Validation("binding target has no buffer slot"))?
                    ),
                }
            }
            _ => String::new(),
        };
        let decl = match var.space {
            AddressSpace::Uniform | AddressSpace::PushConstant => {
                format!("constant {}& {}", self.type_name(var.ty)?, name)
            }
            AddressSpace::Storage { access } => {
                let qualifier = if access.contains(StorageAccess::STORE) {
                    ""
                } else {
                    "const "
                };
                match self.module.types[var.ty].inner {
                    TypeInner::Array { base, size: ArraySize::Dynamic, .. } => format!(
                        "{}device {}* {}",
                        qualifier,
                        self.type_name(base)?,
                        name
                    ),
                    _ => format!(
                        "{}device {}& {}",
                        qualifier,
                        self.type_name(var.ty)?,
                        name
                    ),
                }
            }
            AddressSpace::Handle => format!("{} {}", self.type_name(var.ty)?, name),
            AddressSpace::WorkGroup => {
                format!("threadgroup {}& {}", self.type_name(var.ty)?, name)
            }
            AddressSpace::Private => format!("thread {}& {}", self.type_name(var.ty)?, name),
            AddressSpace::Function => {
                return Err(Error::Validation("global in function space"))
            }
        };
        Ok(format!("{}{}", decl, attribute))
    }

    // ------------------------------------------------------------------
    // Functions

    fn write_function(&mut self, handle: Handle<Function>, fun: &Function) -> Result<(), Error> {
        self.baked.clear();
        let name = self.names[&NameKey::Function(handle)].clone();
        let return_name = match fun.result {
            Some(ref result) => self.type_name(result.ty)?,
            None => "void".to_string(),
        };
        let mut params = Vec::new();
        for (index, argument) in fun.arguments.iter().enumerate() {
            let arg_name = self.names[&NameKey::FunctionArgument(handle, index as u32)].clone();
            params.push(format!("{} {}", self.type_name(argument.ty)?, arg_name));
        }
        for global in self.module.used_globals(handle) {
            params.push(self.global_param(global, None)?);
        }
        if self.needs_sizes[handle.index()] {
            params.push("constant _mslBufferSizes& _buffer_sizes".to_string());
        }
        writeln!(self.out, "{} {}({}) {{", return_name, name, params.join(", "))?;

        let ctx = FunCtx { handle, fun };
        self.write_local_variables(&ctx, Level(1))?;
        self.put_block(&ctx, &fun.body, Level(1))?;
        writeln!(self.out, "}}")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn write_local_variables(&mut self, ctx: &FunCtx, level: Level) -> Result<(), Error> {
        for (local_handle, local) in ctx.fun.local_variables.iter() {
            let name = self.names[&NameKey::FunctionLocal(ctx.handle, local_handle)].clone();
            let type_name = self.type_name(local.ty)?;
            match local.init {
                Some(init) => {
                    write!(self.out, "{}{} {} = ", level, type_name, name)?;
                    self.put_expression(ctx, init)?;
                    writeln!(self.out, ";")?;
                }
                None => writeln!(self.out, "{}{} {} = {{}};", level, type_name, name)?,
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions

    fn put_expression(&mut self, ctx: &FunCtx, handle: Handle<Expression>) -> Result<(), Error> {
        if let Some(name) = self.baked.get(&handle) {
            let name = name.clone();
            write!(self.out, "{}", name)?;
            return Ok(());
        }
        self.put_expression_value(ctx, handle)
    }

    fn put_expression_value(
        &mut self,
        ctx: &FunCtx,
        handle: Handle<Expression>,
    ) -> Result<(), Error> {
        match ctx.fun.expressions[handle] {
            Expression::Literal(literal) => {
                let text = match literal {
                    Literal::F32(v) => float_text(v as f64),
                    Literal::I32(v) => format!("{}", v),
                    Literal::U32(v) => format!("{}u", v),
                    Literal::Bool(v) => format!("{}", v),
                };
                write!(self.out, "{}", text)?;
            }
            Expression::Constant(constant) => {
                let text = self.constant_text(constant)?;
                write!(self.out, "{}", text)?;
            }
            Expression::ZeroValue(ty) => {
                let name = self.type_name(ty)?;
                write!(self.out, "{} {{}}", name)?;
            }
            Expression::Compose { ty, ref components } => {
                let name = self.type_name(ty)?;
                let braces = matches!(
                    self.module.types[ty].inner,
                    TypeInner::Struct { .. } | TypeInner::Array { .. }
                );
                write!(self.out, "{}{}", name, if braces { " {" } else { "(" })?;
                for (index, &component) in components.iter().enumerate() {
                    if index != 0 {
                        write!(self.out, ", ")?;
                    }
                    self.put_expression(ctx, component)?;
                }
                write!(self.out, "{}", if braces { "}" } else { ")" })?;
            }
            Expression::Splat { size, value } => {
                let scalar = ctx
                    .inner_of(self.module, value)
                    .scalar()
                    .unwrap_or(Scalar::F32);
                write!(
                    self.out,
                    "metal::{}{}(",
                    Self::scalar_name(scalar),
                    size as u8
                )?;
                self.put_expression(ctx, value)?;
                write!(self.out, ")")?;
            }
            Expression::Access { base, index } => {
                self.put_access_base(ctx, base)?;
                write!(self.out, "[")?;
                self.put_checked_index(ctx, base, index)?;
                write!(self.out, "]")?;
            }
            Expression::AccessIndex { base, index } => {
                let base_inner = ctx.inner_of(self.module, base);
                let aggregate = match *base_inner {
                    TypeInner::Pointer { base: ty, .. } => Some(&self.module.types[ty].inner),
                    _ => None,
                };
                let target = aggregate.unwrap_or(base_inner);
                match *target {
                    TypeInner::Struct { .. } => {
                        let ty = match *base_inner {
                            TypeInner::Pointer { base: ty, .. } => ty,
                            _ => match ctx.fun.expr_types[base.index()] {
                                TypeResolution::Handle(ty) => ty,
                                _ => {
                                    return Err(Error::Validation(
                                        "struct access through inline type",
                                    ))
                                }
                            },
                        };
                        let member_name =
                            self.names[&NameKey::StructMember(ty, index)].clone();
                        self.put_expression(ctx, base)?;
                        write!(self.out, ".{}", member_name)?;
                    }
                    TypeInner::Vector { .. } => {
                        self.put_expression(ctx, base)?;
                        let letters = ['x', 'y', 'z', 'w'];
                        write!(self.out, ".{}", letters[index as usize])?;
                    }
                    _ => {
                        self.put_access_base(ctx, base)?;
                        write!(self.out, "[{}]", index)?;
                    }
                }
            }
            Expression::Swizzle {
                size,
                vector,
                ref pattern,
            } => {
                self.put_expression(ctx, vector)?;
                write!(self.out, ".")?;
                for &component in pattern[..size as usize].iter() {
                    write!(self.out, "{}", component.letter())?;
                }
            }
            Expression::FunctionArgument(index) => {
                let name = self.names[&NameKey::FunctionArgument(ctx.handle, index)].clone();
                write!(self.out, "{}", name)?;
            }
            Expression::GlobalVariable(global) => {
                let name = self.names[&NameKey::GlobalVariable(global)].clone();
                write!(self.out, "{}", name)?;
            }
            Expression::LocalVariable(local) => {
                let name = self.names[&NameKey::FunctionLocal(ctx.handle, local)].clone();
                write!(self.out, "{}", name)?;
            }
            Expression::Load { pointer } => {
                if self.pointee_is_atomic(ctx, pointer) {
                    write!(self.out, "metal::atomic_load_explicit(&")?;
                    self.put_expression(ctx, pointer)?;
                    write!(self.out, ", metal::memory_order_relaxed)")?;
                } else {
                    self.put_expression(ctx, pointer)?;
                }
            }
            Expression::Unary { op, expr } => {
                let symbol = match op {
                    UnaryOperator::Negate => "-",
                    UnaryOperator::LogicalNot => "!",
                    UnaryOperator::BitwiseNot => "~",
                };
                write!(self.out, "{}(", symbol)?;
                self.put_expression(ctx, expr)?;
                write!(self.out, ")")?;
            }
            Expression::Binary { op, left, right } => {
                use wgslc_core::BinaryOperator as Bo;
                let is_int = matches!(
                    ctx.inner_of(self.module, left).scalar_kind(),
                    Some(ScalarKind::Sint | ScalarKind::Uint)
                );
                if is_int && matches!(op, Bo::Divide | Bo::Modulo) {
                    let helper = if op == Bo::Divide {
                        "_wgsl_div"
                    } else {
                        "_wgsl_mod"
                    };
                    write!(self.out, "{}(", helper)?;
                    self.put_expression(ctx, left)?;
                    write!(self.out, ", ")?;
                    self.put_expression(ctx, right)?;
                    write!(self.out, ")")?;
                } else {
                    write!(self.out, "(")?;
                    self.put_expression(ctx, left)?;
                    write!(self.out, " {} ", binary_operator_text(op))?;
                    self.put_expression(ctx, right)?;
                    write!(self.out, ")")?;
                }
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => {
                self.put_math(ctx, handle, fun, arg, arg1, arg2, arg3)?;
            }
            Expression::Relational { fun, argument } => {
                let name = match fun {
                    RelationalFunction::All => "metal::all",
                    RelationalFunction::Any => "metal::any",
                    RelationalFunction::IsNan => "metal::isnan",
                    RelationalFunction::IsInf => "metal::isinf",
                };
                write!(self.out, "{}(", name)?;
                self.put_expression(ctx, argument)?;
                write!(self.out, ")")?;
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                write!(self.out, "metal::select(")?;
                self.put_expression(ctx, reject)?;
                write!(self.out, ", ")?;
                self.put_expression(ctx, accept)?;
                write!(self.out, ", ")?;
                self.put_expression(ctx, condition)?;
                write!(self.out, ")")?;
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => {
                let source = ctx.inner_of(self.module, expr);
                let target = cast_type_name(source, kind, convert);
                match convert {
                    Some(_) => {
                        write!(self.out, "{}(", target)?;
                        self.put_expression(ctx, expr)?;
                        write!(self.out, ")")?;
                    }
                    None => {
                        write!(self.out, "as_type<{}>(", target)?;
                        self.put_expression(ctx, expr)?;
                        write!(self.out, ")")?;
                    }
                }
            }
            Expression::Derivative { axis, expr, .. } => {
                use wgslc_core::DerivativeAxis as Axis;
                let name = match axis {
                    Axis::X => "metal::dfdx",
                    Axis::Y => "metal::dfdy",
                    Axis::Width => "metal::fwidth",
                };
                write!(self.out, "{}(", name)?;
                self.put_expression(ctx, expr)?;
                write!(self.out, ")")?;
            }
            Expression::ImageSample { .. } => self.put_image_sample(ctx, handle)?,
            Expression::ImageLoad {
                image,
                coordinate,
                array_index,
                sample,
                level,
            } => {
                self.put_expression(ctx, image)?;
                write!(self.out, ".read(")?;
                self.put_image_coordinate(ctx, coordinate)?;
                if let Some(array_index) = array_index {
                    write!(self.out, ", uint(")?;
                    self.put_expression(ctx, array_index)?;
                    write!(self.out, ")")?;
                }
                if let Some(extra) = sample.or(level) {
                    write!(self.out, ", uint(")?;
                    self.put_expression(ctx, extra)?;
                    write!(self.out, ")")?;
                }
                write!(self.out, ")")?;
            }
            Expression::ImageQuery { image, query } => {
                use wgslc_core::ImageQuery as Iq;
                match query {
                    Iq::Size { level } => {
                        let dim = match *ctx.inner_of(self.module, image) {
                            TypeInner::Image { dim, .. } => dim,
                            _ => return Err(Error::Validation("image query of a non-image")),
                        };
                        // Spell the getters out per dimension.
                        let getters: &[&str] = match dim {
                            ImageDimension::D1 => &["get_width"],
                            ImageDimension::D2 | ImageDimension::Cube => {
                                &["get_width", "get_height"]
                            }
                            ImageDimension::D3 => {
                                &["get_width", "get_height", "get_depth"]
                            }
                        };
                        if getters.len() > 1 {
                            write!(self.out, "metal::uint{}(", getters.len())?;
                        }
                        for (index, getter) in getters.iter().enumerate() {
                            if index != 0 {
                                write!(self.out, ", ")?;
                            }
                            self.put_expression(ctx, image)?;
                            write!(self.out, ".{}(", getter)?;
                            if let Some(level) = level {
                                self.put_expression(ctx, level)?;
                            }
                            write!(self.out, ")")?;
                        }
                        if getters.len() > 1 {
                            write!(self.out, ")")?;
                        }
                    }
                    Iq::NumLevels => {
                        self.put_expression(ctx, image)?;
                        write!(self.out, ".get_num_mip_levels()")?;
                    }
                    Iq::NumLayers => {
                        self.put_expression(ctx, image)?;
                        write!(self.out, ".get_array_size()")?;
                    }
                    Iq::NumSamples => {
                        self.put_expression(ctx, image)?;
                        write!(self.out, ".get_num_samples()")?;
                    }
                }
            }
            Expression::ArrayLength(pointer) => {
                let global = self.array_length_global(ctx, pointer)?;
                let stride = self
                    .global_runtime_stride(global)
                    .ok_or(Error::Validation("array length of a non-runtime array"))?;
                write!(
                    self.out,
                    "(_buffer_sizes.size{} / {}u)",
                    global.index(),
                    stride
                )?;
            }
            Expression::CallResult(_) | Expression::AtomicResult { .. } => {
                return Err(Error::Validation(
                    "call or atomic result used before its statement",
                ))
            }
        }
        Ok(())
    }

    /// Print the base of an index access; wrapped fixed arrays go through
    /// their `.inner` field.
    fn put_access_base(&mut self, ctx: &FunCtx, base: Handle<Expression>) -> Result<(), Error> {
        let base_inner = ctx.inner_of(self.module, base);
        let target = match *base_inner {
            TypeInner::Pointer { base: ty, .. } => &self.module.types[ty].inner,
            ref other => other,
        };
        let fixed_array = matches!(
            *target,
            TypeInner::Array {
                size: ArraySize::Constant(_),
                ..
            }
        );
        self.put_expression(ctx, base)?;
        if fixed_array {
            write!(self.out, ".inner")?;
        }
        Ok(())
    }

    /// Print an index expression, clamped when a bounds-check policy is in
    /// force and the target size is known.
    fn put_checked_index(
        &mut self,
        ctx: &FunCtx,
        base: Handle<Expression>,
        index: Handle<Expression>,
    ) -> Result<(), Error> {
        let policy = self.options.bounds_checks.index;
        let limit = if policy == BoundsCheckPolicy::Unchecked {
            None
        } else {
            let base_inner = ctx.inner_of(self.module, base);
            let target = match *base_inner {
                TypeInner::Pointer { base: ty, .. } => &self.module.types[ty].inner,
                ref other => other,
            };
            match *target {
                TypeInner::Array {
                    size: ArraySize::Constant(count),
                    ..
                } => Some(count.get()),
                TypeInner::Vector { size, .. } => Some(size as u32),
                _ => None,
            }
        };
        match limit {
            Some(limit) => {
                write!(self.out, "metal::min(uint(")?;
                self.put_expression(ctx, index)?;
                write!(self.out, "), {}u)", limit - 1)?;
            }
            None => self.put_expression(ctx, index)?,
        }
        Ok(())
    }

    fn array_length_global(
        &self,
        ctx: &FunCtx,
        pointer: Handle<Expression>,
    ) -> Result<Handle<wgslc_core::GlobalVariable>, Error> {
        match ctx.fun.expressions[pointer] {
            Expression::GlobalVariable(global) => Ok(global),
            Expression::AccessIndex { base, .. } => match ctx.fun.expressions[base] {
                Expression::GlobalVariable(global) => Ok(global),
                _ => Err(Error::FeatureNotImplemented(
                    "array length of a non-global pointer",
                )),
            },
            _ => Err(Error::FeatureNotImplemented(
                "array length of a non-global pointer",
            )),
        }
    }

    fn pointee_is_atomic(&self, ctx: &FunCtx, pointer: Handle<Expression>) -> bool {
        match *ctx.inner_of(self.module, pointer) {
            TypeInner::Pointer { base, .. } => {
                matches!(self.module.types[base].inner, TypeInner::Atomic(_))
            }
            _ => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn put_math(
        &mut self,
        ctx: &FunCtx,
        handle: Handle<Expression>,
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
        arg2: Option<Handle<Expression>>,
        arg3: Option<Handle<Expression>>,
    ) -> Result<(), Error> {
        use MathFunction as Mf;
        if let Mf::Modf | Mf::Frexp = fun {
            let ty = match ctx.fun.expr_types[handle.index()] {
                TypeResolution::Handle(ty) => ty,
                _ => return Err(Error::Validation("math result without a type handle")),
            };
            let helper = self.math_helpers[&ty].clone();
            write!(self.out, "{}(", helper)?;
            self.put_expression(ctx, arg)?;
            write!(self.out, ")")?;
            return Ok(());
        }
        let name = match fun {
            Mf::Abs => "metal::abs",
            Mf::Min => "metal::min",
            Mf::Max => "metal::max",
            Mf::Clamp => "metal::clamp",
            Mf::Cos => "metal::cos",
            Mf::Cosh => "metal::cosh",
            Mf::Sin => "metal::sin",
            Mf::Sinh => "metal::sinh",
            Mf::Tan => "metal::tan",
            Mf::Tanh => "metal::tanh",
            Mf::Acos => "metal::acos",
            Mf::Asin => "metal::asin",
            Mf::Atan => "metal::atan",
            Mf::Atan2 => "metal::atan2",
            Mf::Ceil => "metal::ceil",
            Mf::Floor => "metal::floor",
            Mf::Round => "metal::rint",
            Mf::Fract => "metal::fract",
            Mf::Trunc => "metal::trunc",
            Mf::Ldexp => "metal::ldexp",
            Mf::Exp => "metal::exp",
            Mf::Exp2 => "metal::exp2",
            Mf::Log => "metal::log",
            Mf::Log2 => "metal::log2",
            Mf::Pow => "metal::pow",
            Mf::Sqrt => "metal::sqrt",
            Mf::InverseSqrt => "metal::rsqrt",
            Mf::Dot => "metal::dot",
            Mf::Cross => "metal::cross",
            Mf::Distance => "metal::distance",
            Mf::Length => "metal::length",
            Mf::Normalize => "metal::normalize",
            Mf::FaceForward => "metal::faceforward",
            Mf::Reflect => "metal::reflect",
            Mf::Refract => "metal::refract",
            Mf::Sign => "metal::sign",
            Mf::Fma => "metal::fma",
            Mf::Mix => "metal::mix",
            Mf::Step => "metal::step",
            Mf::SmoothStep => "metal::smoothstep",
            Mf::Transpose => "metal::transpose",
            Mf::Determinant => "metal::determinant",
            Mf::CountOneBits => "metal::popcount",
            Mf::ReverseBits => "metal::reverse_bits",
            Mf::ExtractBits => "metal::extract_bits",
            Mf::InsertBits => "metal::insert_bits",
            Mf::FirstTrailingBit => "metal::ctz",
            Mf::FirstLeadingBit => "metal::clz",
            Mf::Modf | Mf::Frexp => unreachable!(),
        };
        write!(self.out, "{}(", name)?;
        self.put_expression(ctx, arg)?;
        for extra in [arg1, arg2, arg3].into_iter().flatten() {
            write!(self.out, ", ")?;
            self.put_expression(ctx, extra)?;
        }
        write!(self.out, ")")?;
        Ok(())
    }

    fn put_image_coordinate(
        &mut self,
        ctx: &FunCtx,
        coordinate: Handle<Expression>,
    ) -> Result<(), Error> {
        // Texel addressing is unsigned in MSL.
        let size = ctx.inner_of(self.module, coordinate).vector_size();
        match size {
            Some(size) => write!(self.out, "metal::uint{}(", size as u8)?,
            None => write!(self.out, "uint(")?,
        }
        self.put_expression(ctx, coordinate)?;
        write!(self.out, ")")?;
        Ok(())
    }

    fn put_image_sample(
        &mut self,
        ctx: &FunCtx,
        handle: Handle<Expression>,
    ) -> Result<(), Error> {
        let (image, sampler, coordinate, array_index, offset, level, depth_ref, gather) =
            match ctx.fun.expressions[handle] {
                Expression::ImageSample {
                    image,
                    sampler,
                    coordinate,
                    array_index,
                    offset,
                    ref level,
                    depth_ref,
                    gather,
                } => (
                    image, sampler, coordinate, array_index, offset, *level, depth_ref, gather,
                ),
                _ => unreachable!(),
            };
        self.put_expression(ctx, image)?;
        let method = if gather.is_some() {
            "gather"
        } else if depth_ref.is_some() {
            match level {
                SampleLevel::Zero | SampleLevel::Exact(_) => "sample_compare",
                _ => "sample_compare",
            }
        } else {
            "sample"
        };
        write!(self.out, ".{}(", method)?;
        self.put_expression(ctx, sampler)?;
        write!(self.out, ", ")?;
        self.put_expression(ctx, coordinate)?;
        if let Some(array_index) = array_index {
            write!(self.out, ", uint(")?;
            self.put_expression(ctx, array_index)?;
            write!(self.out, ")")?;
        }
        if let Some(depth_ref) = depth_ref {
            write!(self.out, ", ")?;
            self.put_expression(ctx, depth_ref)?;
        }
        match level {
            SampleLevel::Auto | SampleLevel::Zero if depth_ref.is_some() => {}
            SampleLevel::Auto => {}
            SampleLevel::Zero => {
                write!(self.out, ", metal::level(0.0)")?;
            }
            SampleLevel::Exact(expr) => {
                write!(self.out, ", metal::level(")?;
                self.put_expression(ctx, expr)?;
                write!(self.out, ")")?;
            }
            SampleLevel::Bias(expr) => {
                write!(self.out, ", metal::bias(")?;
                self.put_expression(ctx, expr)?;
                write!(self.out, ")")?;
            }
            SampleLevel::Gradient { x, y } => {
                let dim = match *ctx.inner_of(self.module, image) {
                    TypeInner::Image { dim, .. } => dim,
                    _ => ImageDimension::D2,
                };
                let gradient = match dim {
                    ImageDimension::Cube => "gradientcube",
                    ImageDimension::D3 => "gradient3d",
                    _ => "gradient2d",
                };
                write!(self.out, ", metal::{}(", gradient)?;
                self.put_expression(ctx, x)?;
                write!(self.out, ", ")?;
                self.put_expression(ctx, y)?;
                write!(self.out, ")")?;
            }
        }
        if let Some(offset) = offset {
            let text = self.constant_text(offset)?;
            write!(self.out, ", {}", text)?;
        }
        if let Some(component) = gather {
            write!(self.out, ", metal::component::{}", component.letter())?;
        }
        write!(self.out, ")")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements

    fn put_block(&mut self, ctx: &FunCtx, block: &Block, level: Level) -> Result<(), Error> {
        for statement in block {
            self.put_statement(ctx, statement, level)?;
        }
        Ok(())
    }

    fn put_statement(
        &mut self,
        ctx: &FunCtx,
        statement: &Statement,
        level: Level,
    ) -> Result<(), Error> {
        match *statement {
            Statement::Emit(ref range) => {
                for handle in range.clone() {
                    let name = match ctx.fun.named_expressions.get(&handle) {
                        Some(name) => name.clone(),
                        None => continue,
                    };
                    // Pointer-typed bindings have no first-class spelling;
                    // their uses re-expand the chain instead.
                    if ctx.inner_of(self.module, handle).is_pointer() {
                        continue;
                    }
                    let type_name =
                        self.resolution_type_name(&ctx.fun.expr_types[handle.index()])?;
                    let unique = self.namer.call(&name);
                    write!(self.out, "{}{} {} = ", level, type_name, unique)?;
                    self.put_expression_value(ctx, handle)?;
                    writeln!(self.out, ";")?;
                    self.baked.insert(handle, unique);
                }
            }
            Statement::Block(ref inner) => {
                writeln!(self.out, "{}{{", level)?;
                self.put_block(ctx, inner, level.next())?;
                writeln!(self.out, "{}}}", level)?;
            }
            Statement::If {
                condition,
                ref accept,
                ref reject,
            } => {
                write!(self.out, "{}if (", level)?;
                self.put_expression(ctx, condition)?;
                writeln!(self.out, ") {{")?;
                self.put_block(ctx, accept, level.next())?;
                if reject.is_empty() {
                    writeln!(self.out, "{}}}", level)?;
                } else {
                    writeln!(self.out, "{}}} else {{", level)?;
                    self.put_block(ctx, reject, level.next())?;
                    writeln!(self.out, "{}}}", level)?;
                }
            }
            Statement::Switch { selector, ref cases } => {
                write!(self.out, "{}switch (", level)?;
                self.put_expression(ctx, selector)?;
                writeln!(self.out, ") {{")?;
                let inner = level.next();
                for case in cases {
                    for value in &case.values {
                        match *value {
                            SwitchValue::I32(v) => writeln!(self.out, "{}case {}: {{", inner, v)?,
                            SwitchValue::U32(v) => {
                                writeln!(self.out, "{}case {}u: {{", inner, v)?
                            }
                            SwitchValue::Default => {
                                writeln!(self.out, "{}default: {{", inner)?
                            }
                        }
                    }
                    self.put_block(ctx, &case.body, inner.next())?;
                    writeln!(self.out, "{}break;", inner.next())?;
                    writeln!(self.out, "{}}}", inner)?;
                }
                writeln!(self.out, "{}}}", level)?;
            }
            Statement::Loop {
                ref body,
                ref continuing,
                break_if,
            } => {
                let has_continuing = !continuing.is_empty() || break_if.is_some();
                let init_name = if has_continuing {
                    let name = format!("loop_init_{}", self.loop_counter);
                    self.loop_counter += 1;
                    writeln!(self.out, "{}bool {} = true;", level, name)?;
                    Some(name)
                } else {
                    None
                };
                let guard_name = if self.options.force_loop_bounding {
                    let name = format!("loop_bound_{}", self.loop_counter);
                    self.loop_counter += 1;
                    writeln!(self.out, "{}uint {} = 0u;", level, name)?;
                    Some(name)
                } else {
                    None
                };
                writeln!(self.out, "{}while(true) {{", level)?;
                let inner = level.next();
                if let Some(ref guard) = guard_name {
                    writeln!(
                        self.out,
                        "{}if ({}++ > 4294967294u) {{ break; }}",
                        inner, guard
                    )?;
                }
                if let Some(ref init) = init_name {
                    writeln!(self.out, "{}if (!{}) {{", inner, init)?;
                    self.put_block(ctx, continuing, inner.next())?;
                    if let Some(condition) = break_if {
                        write!(self.out, "{}if (", inner.next())?;
                        self.put_expression(ctx, condition)?;
                        writeln!(self.out, ") {{ break; }}")?;
                    }
                    writeln!(self.out, "{}}}", inner)?;
                    writeln!(self.out, "{}{} = false;", inner, init)?;
                }
                self.put_block(ctx, body, inner)?;
                writeln!(self.out, "{}}}", level)?;
            }
            Statement::Break => writeln!(self.out, "{}break;", level)?,
            Statement::Continue => writeln!(self.out, "{}continue;", level)?,
            Statement::Return { value } => match value {
                Some(value) => {
                    write!(self.out, "{}return ", level)?;
                    self.put_expression(ctx, value)?;
                    writeln!(self.out, ";")?;
                }
                None => writeln!(self.out, "{}return;", level)?,
            },
            Statement::Kill => writeln!(self.out, "{}metal::discard_fragment();", level)?,
            Statement::Store { pointer, value } => {
                if self.pointee_is_atomic(ctx, pointer) {
                    write!(self.out, "{}metal::atomic_store_explicit(&", level)?;
                    self.put_expression(ctx, pointer)?;
                    write!(self.out, ", ")?;
                    self.put_expression(ctx, value)?;
                    writeln!(self.out, ", metal::memory_order_relaxed);")?;
                } else {
                    write!(self.out, "{}", level)?;
                    self.put_expression(ctx, pointer)?;
                    write!(self.out, " = ")?;
                    self.put_expression(ctx, value)?;
                    writeln!(self.out, ";")?;
                }
            }
            Statement::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            } => {
                write!(self.out, "{}", level)?;
                self.put_expression(ctx, image)?;
                write!(self.out, ".write(")?;
                self.put_expression(ctx, value)?;
                write!(self.out, ", ")?;
                self.put_image_coordinate(ctx, coordinate)?;
                if let Some(array_index) = array_index {
                    write!(self.out, ", uint(")?;
                    self.put_expression(ctx, array_index)?;
                    write!(self.out, ")")?;
                }
                writeln!(self.out, ");")?;
            }
            Statement::Atomic {
                pointer,
                ref fun,
                value,
                result,
            } => {
                let result_name = self.namer.call("_e");
                let type_name =
                    self.resolution_type_name(&ctx.fun.expr_types[result.index()])?;
                match *fun {
                    AtomicFunction::Exchange {
                        compare: Some(compare),
                    } => {
                        write!(self.out, "{}{} {} = ", level, type_name, result_name)?;
                        self.put_expression(ctx, compare)?;
                        writeln!(self.out, ";")?;
                        write!(
                            self.out,
                            "{}metal::atomic_compare_exchange_weak_explicit(&",
                            level
                        )?;
                        self.put_expression(ctx, pointer)?;
                        write!(self.out, ", &{}, ", result_name)?;
                        self.put_expression(ctx, value)?;
                        writeln!(
                            self.out,
                            ", metal::memory_order_relaxed, metal::memory_order_relaxed);"
                        )?;
                    }
                    _ => {
                        let op_name = match *fun {
                            AtomicFunction::Add => "add",
                            AtomicFunction::Subtract => "sub",
                            AtomicFunction::And => "and",
                            AtomicFunction::ExclusiveOr => "xor",
                            AtomicFunction::InclusiveOr => "or",
                            AtomicFunction::Min => "min",
                            AtomicFunction::Max => "max",
                            AtomicFunction::Exchange { .. } => "exchange",
                        };
                        write!(
                            self.out,
                            "{}{} {} = metal::atomic_fetch_{}_explicit(&",
                            level, type_name, result_name, op_name
                        )?;
                        self.put_expression(ctx, pointer)?;
                        write!(self.out, ", ")?;
                        self.put_expression(ctx, value)?;
                        writeln!(self.out, ", metal::memory_order_relaxed);")?;
                    }
                }
                self.baked.insert(result, result_name);
            }
            Statement::Barrier(barrier) => {
                let mut flags = Vec::new();
                if barrier.contains(Barrier::STORAGE) {
                    flags.push("metal::mem_flags::mem_device");
                }
                if barrier.contains(Barrier::WORK_GROUP) {
                    flags.push("metal::mem_flags::mem_threadgroup");
                }
                if barrier.contains(Barrier::TEXTURE) {
                    flags.push("metal::mem_flags::mem_texture");
                }
                if flags.is_empty() {
                    flags.push("metal::mem_flags::mem_none");
                }
                writeln!(
                    self.out,
                    "{}metal::threadgroup_barrier({});",
                    level,
                    flags.join(" | ")
                )?;
            }
            Statement::Call {
                function,
                ref arguments,
                result,
            } => {
                write!(self.out, "{}", level)?;
                let result_name = match result {
                    Some(result) => {
                        let name = self.namer.call("_e");
                        let type_name =
                            self.resolution_type_name(&ctx.fun.expr_types[result.index()])?;
                        write!(self.out, "{} {} = ", type_name, name)?;
                        Some((result, name))
                    }
                    None => None,
                };
                self.put_call(ctx, function, arguments)?;
                writeln!(self.out, ";")?;
                if let Some((result, name)) = result_name {
                    self.baked.insert(result, name);
                }
            }
            Statement::WorkGroupUniformLoad { pointer, result } => {
                writeln!(
                    self.out,
                    "{}metal::threadgroup_barrier(metal::mem_flags::mem_threadgroup);",
                    level
                )?;
                let name = self.namer.call("_e");
                let type_name =
                    self.resolution_type_name(&ctx.fun.expr_types[result.index()])?;
                write!(self.out, "{}{} {} = ", level, type_name, name)?;
                self.put_expression(ctx, pointer)?;
                writeln!(self.out, ";")?;
                writeln!(
                    self.out,
                    "{}metal::threadgroup_barrier(metal::mem_flags::mem_threadgroup);",
                    level
                )?;
                self.baked.insert(result, name);
            }
            Statement::RayQuery { .. } => {
                return Err(Error::FeatureNotImplemented("ray queries"))
            }
        }
        Ok(())
    }

    fn put_call(
        &mut self,
        ctx: &FunCtx,
        function: Handle<Function>,
        arguments: &[Handle<Expression>],
    ) -> Result<(), Error> {
        let name = self.names[&NameKey::Function(function)].clone();
        write!(self.out, "{}(", name)?;
        let mut first = true;
        for &argument in arguments {
            if !first {
                write!(self.out, ", ")?;
            }
            first = false;
            self.put_expression(ctx, argument)?;
        }
        for global in self.module.used_globals(function) {
            if !first {
                write!(self.out, ", ")?;
            }
            first = false;
            let global_name = self.names[&NameKey::GlobalVariable(global)].clone();
            write!(self.out, "{}", global_name)?;
        }
        if self.needs_sizes[function.index()] {
            if !first {
                write!(self.out, ", ")?;
            }
            write!(self.out, "_buffer_sizes")?;
        }
        write!(self.out, ")")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entry points

    fn write_entry_point(
        &mut self,
        index: u32,
        ep: &wgslc_core::EntryPoint,
    ) -> Result<(), Error> {
        self.baked.clear();
        let fun = &self.module.functions[ep.function];
        let ep_name = self.names[&NameKey::EntryPoint(index)].clone();
        let stage_keyword = match ep.stage {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "kernel",
        };

        // Flatten argument bindings: `(member name, type, binding)` triples
        // per IR argument.
        let mut flattened: Vec<Vec<(String, Handle<Type>, Binding)>> = Vec::new();
        for (arg_index, argument) in fun.arguments.iter().enumerate() {
            let mut parts = Vec::new();
            match argument.binding {
                Some(ref binding) => {
                    let name = self.names
                        [&NameKey::FunctionArgument(ep.function, arg_index as u32)]
                        .clone();
                    parts.push((name, argument.ty, binding.clone()));
                }
                None => match self.module.types[argument.ty].inner {
                    TypeInner::Struct { ref members, .. } => {
                        for member in members {
                            let binding = member
                                .binding
                                .clone()
                                .ok_or(Error::Validation("unbound entry point input"))?;
                            let base = member.name.as_deref().unwrap_or("member");
                            parts.push((self.namer.call(base), member.ty, binding));
                        }
                    }
                    _ => return Err(Error::Validation("unbound entry point input")),
                },
            }
            flattened.push(parts);
        }

        // The varyings struct holds every location-bound input.
        let input_struct_name = format!("{}Input", ep_name);
        let has_varyings = flattened
            .iter()
            .flatten()
            .any(|(_, _, binding)| matches!(*binding, Binding::Location { .. }));
        if has_varyings {
            writeln!(self.out, "struct {} {{", input_struct_name)?;
            for (name, ty, binding) in flattened.iter().flatten() {
                if let Binding::Location { location, .. } = *binding {
                    let attribute = match ep.stage {
                        ShaderStage::Vertex => format!("attribute({})", location),
                        _ => format!("user(loc{})", location),
                    };
                    writeln!(
                        self.out,
                        "{}{} {} [[{}]];",
                        Level(1),
                        self.type_name(*ty)?,
                        name,
                        attribute
                    )?;
                }
            }
            writeln!(self.out, "}};")?;
        }

        // The output struct mirrors the result bindings.
        let output_struct_name = format!("{}Output", ep_name);
        let mut outputs: Vec<(String, Handle<Type>, Binding, Option<u32>)> = Vec::new();
        if let Some(ref result) = fun.result {
            match result.binding {
                Some(ref binding) => {
                    outputs.push((self.namer.call("member"), result.ty, binding.clone(), None));
                }
                None => match self.module.types[result.ty].inner {
                    TypeInner::Struct { ref members, .. } => {
                        for (member_index, member) in members.iter().enumerate() {
                            let binding = member
                                .binding
                                .clone()
                                .ok_or(Error::Validation("unbound entry point output"))?;
                            let base = member.name.as_deref().unwrap_or("member");
                            outputs.push((
                                self.namer.call(base),
                                member.ty,
                                binding,
                                Some(member_index as u32),
                            ));
                        }
                    }
                    _ => return Err(Error::Validation("unbound entry point output")),
                },
            }
        }
        if !outputs.is_empty() {
            writeln!(self.out, "struct {} {{", output_struct_name)?;
            for (name, ty, binding, _) in &outputs {
                let attribute = match *binding {
                    Binding::BuiltIn(builtin) => {
                        output_builtin_attribute(builtin)?.to_string()
                    }
                    Binding::Location { location, .. } => match ep.stage {
                        ShaderStage::Fragment => format!("color({})", location),
                        _ => format!("user(loc{})", location),
                    },
                };
                writeln!(
                    self.out,
                    "{}{} {} [[{}]];",
                    Level(1),
                    self.type_name(*ty)?,
                    name,
                    attribute
                )?;
            }
            writeln!(self.out, "}};")?;
        }

        // Signature.
        let return_name = if outputs.is_empty() {
            "void".to_string()
        } else {
            output_struct_name.clone()
        };
        let mut params = Vec::new();
        if has_varyings {
            params.push(format!("{} varyings [[stage_in]]", input_struct_name));
        }
        for (name, ty, binding) in flattened.iter().flatten() {
            if let Binding::BuiltIn(builtin) = *binding {
                params.push(format!(
                    "{} {} [[{}]]",
                    self.type_name(*ty)?,
                    name,
                    input_builtin_attribute(builtin, ep.stage)?
                ));
            }
        }
        let used = self.module.used_globals(ep.function);
        let mut workgroup_vars = Vec::new();
        let mut private_vars = Vec::new();
        for &global in &used {
            let var = &self.module.global_variables[global];
            match var.space {
                AddressSpace::WorkGroup => workgroup_vars.push(global),
                AddressSpace::Private => private_vars.push(global),
                _ => params.push(self.global_param(global, Some(ep.stage))?),
            }
        }
        let zero_init =
            self.options.zero_initialize_workgroup_memory && !workgroup_vars.is_empty();
        let needs_lid = zero_init
            && !flattened.iter().flatten().any(|(_, _, binding)| {
                matches!(
                    *binding,
                    Binding::BuiltIn(BuiltIn::LocalInvocationIndex)
                )
            });
        if needs_lid {
            params.push("uint _lid [[thread_index_in_threadgroup]]".to_string());
        }
        if self.needs_sizes[ep.function.index()] {
            params.push(format!(
                "constant _mslBufferSizes& _buffer_sizes [[buffer({})]]",
                SIZES_BUFFER_SLOT
            ));
        }
        writeln!(
            self.out,
            "{} {} {}({}) {{",
            stage_keyword,
            return_name,
            ep_name,
            params.join(", ")
        )?;
        let level = Level(1);

        // Workgroup and private memory live in the entry point and are
        // passed to helpers by reference.
        for &global in workgroup_vars.iter().chain(&private_vars) {
            let var = &self.module.global_variables[global];
            let name = self.names[&NameKey::GlobalVariable(global)].clone();
            let qualifier = match var.space {
                AddressSpace::WorkGroup => "threadgroup ",
                _ => "",
            };
            match var.init {
                Some(init) => {
                    let text = self.constant_text(init)?;
                    writeln!(
                        self.out,
                        "{}{}{} {} = {};",
                        level,
                        qualifier,
                        self.type_name(var.ty)?,
                        name,
                        text
                    )?;
                }
                None if var.space == AddressSpace::Private => writeln!(
                    self.out,
                    "{}{} {} = {{}};",
                    level,
                    self.type_name(var.ty)?,
                    name
                )?,
                None => writeln!(
                    self.out,
                    "{}{}{} {};",
                    level,
                    qualifier,
                    self.type_name(var.ty)?,
                    name
                )?,
            }
        }
        if zero_init {
            let lid = if needs_lid {
                "_lid".to_string()
            } else {
                flattened
                    .iter()
                    .flatten()
                    .find(|(_, _, binding)| {
                        matches!(*binding, Binding::BuiltIn(BuiltIn::LocalInvocationIndex))
                    })
                    .map(|(name, _, _)| name.clone())
                    .unwrap_or_else(|| "_lid".to_string())
            };
            writeln!(self.out, "{}if ({} == 0u) {{", level, lid)?;
            for &global in &workgroup_vars {
                let var = &self.module.global_variables[global];
                // Atomic workgroup variables are initialized by the shader
                // itself; plain memory gets zeroed here.
                if matches!(self.module.types[var.ty].inner, TypeInner::Atomic(_)) {
                    continue;
                }
                let name = self.names[&NameKey::GlobalVariable(global)].clone();
                writeln!(self.out, "{}{} = {{}};", level.next(), name)?;
            }
            writeln!(self.out, "{}}}", level)?;
            writeln!(
                self.out,
                "{}metal::threadgroup_barrier(metal::mem_flags::mem_threadgroup);",
                level
            )?;
        }

        // Recompose the IR arguments from varyings and builtin parameters.
        let mut call_args = Vec::new();
        for (arg_index, (argument, parts)) in
            fun.arguments.iter().zip(&flattened).enumerate()
        {
            if argument.binding.is_some() {
                let (ref name, _, ref binding) = parts[0];
                call_args.push(match *binding {
                    Binding::Location { .. } => format!("varyings.{}", name),
                    Binding::BuiltIn(_) => name.clone(),
                });
            } else {
                let arg_name = self.names
                    [&NameKey::FunctionArgument(ep.function, arg_index as u32)]
                    .clone();
                let type_name = self.type_name(argument.ty)?;
                let members: Vec<String> = parts
                    .iter()
                    .map(|(name, _, binding)| match *binding {
                        Binding::Location { .. } => format!("varyings.{}", name),
                        Binding::BuiltIn(_) => name.clone(),
                    })
                    .collect();
                writeln!(
                    self.out,
                    "{}{} {} = {{ {} }};",
                    level,
                    type_name,
                    arg_name,
                    members.join(", ")
                )?;
                call_args.push(arg_name);
            }
        }
        for &global in &used {
            call_args.push(self.names[&NameKey::GlobalVariable(global)].clone());
        }
        if self.needs_sizes[ep.function.index()] {
            call_args.push("_buffer_sizes".to_string());
        }

        let inner_name = self.names[&NameKey::Function(ep.function)].clone();
        if outputs.is_empty() {
            writeln!(self.out, "{}{}({});", level, inner_name, call_args.join(", "))?;
        } else {
            let result_type = self.type_name(fun.result.as_ref().unwrap().ty)?;
            writeln!(
                self.out,
                "{}{} _result = {}({});",
                level,
                result_type,
                inner_name,
                call_args.join(", ")
            )?;
            writeln!(self.out, "{}{} _output;", level, output_struct_name)?;
            for (name, _, _, member_index) in &outputs {
                match *member_index {
                    Some(member_index) => {
                        let result_ty = fun.result.as_ref().unwrap().ty;
                        let member_name = self.names
                            [&NameKey::StructMember(result_ty, member_index)]
                            .clone();
                        writeln!(
                            self.out,
                            "{}_output.{} = _result.{};",
                            level, name, member_name
                        )?;
                    }
                    None => writeln!(self.out, "{}_output.{} = _result;", level, name)?,
                }
            }
            writeln!(self.out, "{}return _output;", level)?;
        }
        writeln!(self.out, "}}")?;
        writeln!(self.out)?;
        Ok(())
    }
}

fn address_space_name(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Function => "thread",
        AddressSpace::Private => "thread",
        AddressSpace::WorkGroup => "threadgroup",
        AddressSpace::Uniform | AddressSpace::PushConstant => "constant",
        AddressSpace::Storage { .. } => "device",
        AddressSpace::Handle => "thread",
    }
}

fn binary_operator_text(op: wgslc_core::BinaryOperator) -> &'static str {
    use wgslc_core::BinaryOperator as Bo;
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

fn float_text(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1.0e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn scalar_of_value(value: ScalarValue) -> Scalar {
    match value {
        ScalarValue::Sint(_) => Scalar::I32,
        ScalarValue::Uint(_) => Scalar::U32,
        ScalarValue::Float(_) => Scalar::F32,
        ScalarValue::Bool(_) => Scalar::BOOL,
    }
}

fn cast_type_name(
    source: &TypeInner,
    kind: ScalarKind,
    convert: Option<wgslc_core::Bytes>,
) -> String {
    let scalar = Scalar {
        kind,
        width: convert.unwrap_or(4),
    };
    match source.vector_size() {
        Some(size) => format!("metal::{}{}", Writer::scalar_name(scalar), size as u8),
        None => Writer::scalar_name(scalar).to_string(),
    }
}

fn input_builtin_attribute(
    builtin: BuiltIn,
    stage: ShaderStage,
) -> Result<&'static str, Error> {
    Ok(match builtin {
        BuiltIn::VertexIndex => "vertex_id",
        BuiltIn::InstanceIndex => "instance_id",
        BuiltIn::Position => match stage {
            ShaderStage::Fragment => "position",
            _ => return Err(Error::Validation("position is not an input here")),
        },
        BuiltIn::FrontFacing => "front_facing",
        BuiltIn::SampleIndex => "sample_id",
        BuiltIn::SampleMask => "sample_mask",
        BuiltIn::GlobalInvocationId => "thread_position_in_grid",
        BuiltIn::LocalInvocationId => "thread_position_in_threadgroup",
        BuiltIn::LocalInvocationIndex => "thread_index_in_threadgroup",
        BuiltIn::WorkGroupId => "threadgroup_position_in_grid",
        BuiltIn::NumWorkGroups => "threadgroups_per_grid",
        BuiltIn::FragDepth => {
            return Err(Error::Validation("frag_depth is not an input"))
        }
    })
}

fn output_builtin_attribute(builtin: BuiltIn) -> Result<&'static str, Error> {
    Ok(match builtin {
        BuiltIn::Position => "position",
        BuiltIn::FragDepth => "depth(any)",
        BuiltIn::SampleMask => "sample_mask",
        _ => return Err(Error::Validation("builtin is not an output")),
    })
}
