//! GLSL text emission.

use std::fmt::Write;

use wgslc_core::{
    AddressSpace, ArraySize, AtomicFunction, Barrier, Binding, Block, BuiltIn, ConstantInner,
    Expression, Function, Handle, ImageClass, ImageDimension, Literal, MathFunction, Module,
    RelationalFunction, SampleLevel, Scalar, ScalarKind, ScalarValue, ShaderStage, Statement,
    StorageAccess, SwitchValue, Type, TypeInner, TypeResolution, UnaryOperator, VectorSize,
};

use super::{keywords::RESERVED, Error, Options, Version};
use crate::namer::{process_names, NameKey, Namer};
use crate::{Level, TranslationInfo};

struct FunCtx<'m> {
    handle: Handle<Function>,
    fun: &'m Function,
}

impl<'m> FunCtx<'m> {
    fn inner_of<'a>(&'a self, module: &'a Module, handle: Handle<Expression>) -> &'a TypeInner {
        self.fun.expr_types[handle.index()].inner_with(&module.types)
    }
}

/// One flattened entry-point input.
struct EpInput {
    /// How the value is spelled inside `main`: an input variable name or a
    /// `gl_*` expression.
    expr: String,
}

pub(super) struct Writer<'a> {
    out: String,
    module: &'a Module,
    options: &'a Options,
    ep_index: u32,
    names: wgslc_core::FastHashMap<NameKey, String>,
    namer: Namer,
    baked: wgslc_core::FastHashMap<Handle<Expression>, String>,
    /// Globals whose block wraps the value in a single `inner` member.
    wrapped: Vec<bool>,
    math_helpers: wgslc_core::FastHashMap<Handle<Type>, String>,
    /// `(kind, size, is_division)` combinations needing a guarded helper.
    int_helpers: Vec<(ScalarKind, Option<VectorSize>, bool)>,
    needs_samplerless: bool,
    loop_counter: u32,
}

impl<'a> Writer<'a> {
    pub(super) fn new(module: &'a Module, options: &'a Options) -> Result<Self, Error> {
        let ep_index = module
            .entry_points
            .iter()
            .position(|ep| ep.name == options.entry_point)
            .ok_or_else(|| Error::EntryPointNotFound(options.entry_point.clone()))?;
        let ep = &module.entry_points[ep_index];
        if ep.stage == ShaderStage::Compute && !options.version.supports_compute() {
            return Err(Error::UnsupportedStage(options.version));
        }
        let mut namer = Namer::new(RESERVED, false);
        namer.reserve("_wgsl_div");
        namer.reserve("_wgsl_mod");
        let names = process_names(module, &mut namer);
        Ok(Writer {
            out: String::new(),
            module,
            options,
            ep_index: ep_index as u32,
            names,
            namer,
            baked: Default::default(),
            wrapped: vec![false; module.global_variables.len()],
            math_helpers: Default::default(),
            int_helpers: Vec::new(),
            needs_samplerless: false,
            loop_counter: 0,
        })
    }

    pub(super) fn finish(self) -> String {
        self.out
    }

    fn entry_point(&self) -> &'a wgslc_core::EntryPoint {
        &self.module.entry_points[self.ep_index as usize]
    }

    pub(super) fn write(&mut self) -> Result<TranslationInfo, Error> {
        self.scan_module();
        writeln!(self.out, "#version {}", self.options.version)?;
        if self.needs_samplerless {
            writeln!(
                self.out,
                "#extension GL_EXT_samplerless_texture_functions : require"
            )?;
        }
        if let Version::Embedded(_) = self.options.version {
            writeln!(self.out, "precision highp float;")?;
            writeln!(self.out, "precision highp int;")?;
        }
        writeln!(self.out)?;

        let ep = self.entry_point();
        if ep.stage == ShaderStage::Compute {
            writeln!(
                self.out,
                "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;",
                ep.workgroup_size[0], ep.workgroup_size[1], ep.workgroup_size[2]
            )?;
            writeln!(self.out)?;
        }

        self.write_struct_definitions()?;
        for (handle, _) in self.module.global_variables.iter() {
            self.write_global(handle)?;
        }
        writeln!(self.out)?;
        self.write_polyfills()?;
        self.write_module_constants()?;

        // Other entry points target other stages; their functions don't
        // belong in this compilation unit.
        let skip: Vec<Handle<Function>> = self
            .module
            .entry_points
            .iter()
            .enumerate()
            .filter(|&(index, _)| index != self.ep_index as usize)
            .map(|(_, ep)| ep.function)
            .collect();
        for (handle, fun) in self.module.functions.iter() {
            if skip.contains(&handle) {
                continue;
            }
            self.write_function(handle, fun)?;
        }
        self.write_entry_point()?;

        let mut info = TranslationInfo::default();
        for (index, _) in self.module.entry_points.iter().enumerate() {
            // Only the selected entry point exists in the output, under the
            // name the language dictates.
            info.entry_point_names.push(if index == self.ep_index as usize {
                "main".to_string()
            } else {
                String::new()
            });
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Scanning

    fn scan_module(&mut self) {
        for (_, fun) in self.module.functions.iter() {
            for (_, expr) in fun.expressions.iter() {
                match *expr {
                    Expression::Binary { op, left, .. } => {
                        let inner = fun.expr_types[left.index()].inner_with(&self.module.types);
                        let kind = inner.scalar_kind();
                        if let Some(kind @ (ScalarKind::Sint | ScalarKind::Uint)) = kind {
                            let entry = match op {
                                wgslc_core::BinaryOperator::Divide => {
                                    (kind, inner.vector_size(), true)
                                }
                                wgslc_core::BinaryOperator::Modulo => {
                                    (kind, inner.vector_size(), false)
                                }
                                _ => continue,
                            };
                            if !self.int_helpers.contains(&entry) {
                                self.int_helpers.push(entry);
                            }
                        }
                    }
                    Expression::ImageLoad { image, .. }
                    | Expression::ImageQuery { image, .. } => {
                        let inner = fun.expr_types[image.index()].inner_with(&self.module.types);
                        if let TypeInner::Image {
                            class: ImageClass::Sampled { .. } | ImageClass::Depth { .. },
                            ..
                        } = *inner
                        {
                            self.needs_samplerless = true;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Types

    fn scalar_name(scalar: Scalar) -> &'static str {
        match scalar.kind {
            ScalarKind::Float => "float",
            ScalarKind::Sint => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Bool => "bool",
        }
    }

    fn vector_name(size: VectorSize, scalar: Scalar) -> String {
        let prefix = match scalar.kind {
            ScalarKind::Float => "",
            ScalarKind::Sint => "i",
            ScalarKind::Uint => "u",
            ScalarKind::Bool => "b",
        };
        format!("{}vec{}", prefix, size as u8)
    }

    /// The type's spelling in expression position (constructors and casts).
    fn type_name(&self, handle: Handle<Type>) -> Result<String, Error> {
        self.inner_type_name(&self.module.types[handle].inner, Some(handle))
    }

    fn inner_type_name(
        &self,
        inner: &TypeInner,
        handle: Option<Handle<Type>>,
    ) -> Result<String, Error> {
        Ok(match *inner {
            TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => {
                Self::scalar_name(scalar).to_string()
            }
            TypeInner::Vector { size, scalar } => Self::vector_name(size, scalar),
            TypeInner::Matrix { columns, rows, .. } => {
                if columns == rows {
                    format!("mat{}", columns as u8)
                } else {
                    format!("mat{}x{}", columns as u8, rows as u8)
                }
            }
            TypeInner::Pointer { .. } | TypeInner::ValuePointer { .. } => {
                return Err(Error::FeatureNotImplemented("first-class pointer values"))
            }
            TypeInner::Array { base, size, .. } => {
                let base_name = self.type_name(base)?;
                match size {
                    ArraySize::Constant(count) => format!("{}[{}]", base_name, count),
                    ArraySize::Dynamic => format!("{}[]", base_name),
                }
            }
            TypeInner::Struct { .. } => match handle {
                Some(handle) => self.names[&NameKey::Type(handle)].clone(),
                None => return Err(Error::Validation("anonymous struct type")),
            },
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => match class {
                ImageClass::Storage { format, .. } => {
                    let prefix = match format.scalar_kind() {
                        ScalarKind::Sint => "i",
                        ScalarKind::Uint => "u",
                        _ => "",
                    };
                    format!(
                        "{}image{}{}",
                        prefix,
                        dim_text(dim),
                        if arrayed { "Array" } else { "" }
                    )
                }
                ImageClass::Sampled { kind, .. } => {
                    let prefix = match kind {
                        ScalarKind::Sint => "i",
                        ScalarKind::Uint => "u",
                        _ => "",
                    };
                    format!(
                        "{}texture{}{}",
                        prefix,
                        dim_text(dim),
                        if arrayed { "Array" } else { "" }
                    )
                }
                ImageClass::Depth { .. } => format!(
                    "texture{}{}",
                    dim_text(dim),
                    if arrayed { "Array" } else { "" }
                ),
            },
            TypeInner::Sampler { comparison } => {
                if comparison { "samplerShadow" } else { "sampler" }.to_string()
            }
        })
    }

    /// Write a declaration, with array brackets after the name as the
    /// grammar wants.
    fn decl_text(&self, ty: Handle<Type>, name: &str) -> Result<String, Error> {
        match self.module.types[ty].inner {
            TypeInner::Array { base, size, .. } => {
                let suffix = match size {
                    ArraySize::Constant(count) => format!("[{}]", count),
                    ArraySize::Dynamic => "[]".to_string(),
                };
                let inner = self.decl_text(base, name)?;
                Ok(format!("{}{}", inner, suffix))
            }
            _ => Ok(format!("{} {}", self.type_name(ty)?, name)),
        }
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

    fn write_struct_definitions(&mut self) -> Result<(), Error> {
        for (handle, ty) in self.module.types.iter() {
            if let TypeInner::Struct { ref members, .. } = ty.inner {
                // Structs tailing off in a runtime array only exist spliced
                // into their buffer block.
                let has_dynamic = members.iter().any(|member| {
                    matches!(
                        self.module.types[member.ty].inner,
                        TypeInner::Array {
                            size: ArraySize::Dynamic,
                            ..
                        }
                    )
                });
                if has_dynamic {
                    continue;
                }
                let name = self.names[&NameKey::Type(handle)].clone();
                writeln!(self.out, "struct {} {{", name)?;
                for (index, member) in members.iter().enumerate() {
                    let member_name =
                        self.names[&NameKey::StructMember(handle, index as u32)].clone();
                    let decl = self.decl_text(member.ty, &member_name)?;
                    writeln!(self.out, "{}{};", Level(1), decl)?;
                }
                writeln!(self.out, "}};")?;
                writeln!(self.out)?;
            }
        }
        Ok(())
    }

    fn write_global(&mut self, handle: Handle<wgslc_core::GlobalVariable>) -> Result<(), Error> {
        let var = &self.module.global_variables[handle];
        let name = self.names[&NameKey::GlobalVariable(handle)].clone();
        match var.space {
            AddressSpace::Uniform | AddressSpace::Storage { .. } | AddressSpace::PushConstant => {
                let block_name = self.namer.call(&format!("{}_block", name));
                let layout = match var.space {
                    AddressSpace::PushConstant => "layout(push_constant)".to_string(),
                    AddressSpace::Uniform => match var.binding {
                        Some(binding) => format!(
                            "layout(std140, set = {}, binding = {})",
                            binding.group, binding.binding
                        ),
                        None => "layout(std140)".to_string(),
                    },
                    _ => match var.binding {
                        Some(binding) => format!(
                            "layout(std430, set = {}, binding = {})",
                            binding.group, binding.binding
                        ),
                        None => "layout(std430)".to_string(),
                    },
                };
                let (keyword, qualifier) = match var.space {
                    AddressSpace::Storage { access } => (
                        "buffer",
                        if access.contains(StorageAccess::STORE) {
                            ""
                        } else {
                            "readonly "
                        },
                    ),
                    _ => ("uniform", ""),
                };
                writeln!(self.out, "{} {}{} {} {{", layout, qualifier, keyword, block_name)?;
                match self.module.types[var.ty].inner {
                    TypeInner::Struct { ref members, .. } => {
                        for (index, member) in members.iter().enumerate() {
                            let member_name = self.names
                                [&NameKey::StructMember(var.ty, index as u32)]
                                .clone();
                            let decl = self.decl_text(member.ty, &member_name)?;
                            writeln!(self.out, "{}{};", Level(1), decl)?;
                        }
                    }
                    _ => {
                        let decl = self.decl_text(var.ty, "inner")?;
                        writeln!(self.out, "{}{};", Level(1), decl)?;
                        self.wrapped[handle.index()] = true;
                    }
                }
                writeln!(self.out, "}} {};", name)?;
            }
            AddressSpace::Handle => {
                let layout = match (var.binding, &self.module.types[var.ty].inner) {
                    (
                        Some(binding),
                        &TypeInner::Image {
                            class: ImageClass::Storage { format, .. },
                            ..
                        },
                    ) => format!(
                        "layout(set = {}, binding = {}, {}) ",
                        binding.group,
                        binding.binding,
                        format_text(format)
                    ),
                    (Some(binding), _) => format!(
                        "layout(set = {}, binding = {}) ",
                        binding.group, binding.binding
                    ),
                    (None, _) => String::new(),
                };
                let access_qualifier = match self.module.types[var.ty].inner {
                    TypeInner::Image {
                        class: ImageClass::Storage { access, .. },
                        ..
                    } => {
                        if !access.contains(StorageAccess::LOAD) {
                            "writeonly "
                        } else if !access.contains(StorageAccess::STORE) {
                            "readonly "
                        } else {
                            ""
                        }
                    }
                    _ => "",
                };
                writeln!(
                    self.out,
                    "{}{}uniform {} {};",
                    layout,
                    access_qualifier,
                    self.type_name(var.ty)?,
                    name
                )?;
            }
            AddressSpace::WorkGroup => {
                let decl = self.decl_text(var.ty, &name)?;
                writeln!(self.out, "shared {};", decl)?;
            }
            AddressSpace::Private => {
                let decl = self.decl_text(var.ty, &name)?;
                match var.init {
                    Some(init) => {
                        let text = self.constant_text(init)?;
                        writeln!(self.out, "{} = {};", decl, text)?;
                    }
                    None => writeln!(self.out, "{};", decl)?,
                }
            }
            AddressSpace::Function => {
                return Err(Error::Validation("global in function space"))
            }
        }
        Ok(())
    }

    fn write_polyfills(&mut self) -> Result<(), Error> {
        for index in 0..self.int_helpers.len() {
            let (kind, size, is_div) = self.int_helpers[index];
            let scalar = Scalar { kind, width: 4 };
            let ty = match size {
                Some(size) => Self::vector_name(size, scalar),
                None => Self::scalar_name(scalar).to_string(),
            };
            let helper = if is_div { "_wgsl_div" } else { "_wgsl_mod" };
            writeln!(self.out, "{} {}({} a, {} b) {{", ty, helper, ty, ty)?;
            match size {
                None => {
                    // Division by zero yields the dividend; remainder by
                    // zero yields zero.
                    if is_div {
                        writeln!(
                            self.out,
                            "{}return b == {}(0) ? a : a / b;",
                            Level(1),
                            ty
                        )?;
                    } else {
                        writeln!(
                            self.out,
                            "{}return b == {}(0) ? {}(0) : a % b;",
                            Level(1),
                            ty,
                            ty
                        )?;
                    }
                }
                Some(_) => {
                    writeln!(
                        self.out,
                        "{}{} zero = {}(equal(b, {}(0)));",
                        Level(1),
                        ty,
                        ty,
                        ty
                    )?;
                    if is_div {
                        writeln!(
                            self.out,
                            "{}return (a / (b + zero)) * ({}(1) - zero) + a * zero;",
                            Level(1),
                            ty
                        )?;
                    } else {
                        writeln!(
                            self.out,
                            "{}return (a % (b + zero)) * ({}(1) - zero);",
                            Level(1),
                            ty
                        )?;
                    }
                }
            }
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
        }

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
                "{} {}({} arg) {{",
                struct_name, helper_name, arg_ty
            )?;
            writeln!(self.out, "{}{} other;", Level(1), second_ty)?;
            let call = match math_fun {
                MathFunction::Modf => "modf",
                _ => "frexp",
            };
            writeln!(
                self.out,
                "{}{} fract = {}(arg, other);",
                Level(1),
                arg_ty,
                call
            )?;
            writeln!(
                self.out,
                "{}return {}(fract, other);",
                Level(1),
                struct_name
            )?;
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
            let (decl, value) = match constant.inner {
                ConstantInner::Scalar { value, .. } => {
                    let scalar = scalar_of_value(value);
                    (
                        format!("{} {}", Self::scalar_name(scalar), name),
                        scalar_text(value),
                    )
                }
                ConstantInner::Composite { ty, .. } => {
                    (self.decl_text(ty, &name)?, self.constant_text(handle)?)
                }
            };
            writeln!(self.out, "const {} = {};", decl, value)?;
            wrote = true;
        }
        if wrote {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn constant_text(&self, handle: Handle<wgslc_core::Constant>) -> Result<String, Error> {
        let constant = &self.module.constants[handle];
        Ok(match constant.inner {
            ConstantInner::Scalar { value, .. } => scalar_text(value),
            ConstantInner::Composite { ty, ref components } => {
                let mut parts = Vec::with_capacity(components.len());
                for &component in components {
                    parts.push(self.constant_text(component)?);
                }
                format!("{}({})", self.type_name(ty)?, parts.join(", "))
            }
        })
    }

    fn zero_text(&self, ty: Handle<Type>) -> Result<String, Error> {
        Ok(match self.module.types[ty].inner {
            TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => match scalar.kind {
                ScalarKind::Float => "0.0".to_string(),
                ScalarKind::Uint => "0u".to_string(),
                ScalarKind::Sint => "0".to_string(),
                ScalarKind::Bool => "false".to_string(),
            },
            TypeInner::Vector { size, scalar } => {
                format!("{}(0)", Self::vector_name(size, scalar))
            }
            TypeInner::Matrix { columns, rows, .. } => {
                if columns == rows {
                    format!("mat{}(0.0)", columns as u8)
                } else {
                    format!("mat{}x{}(0.0)", columns as u8, rows as u8)
                }
            }
            TypeInner::Array {
                base,
                size: ArraySize::Constant(count),
                ..
            } => {
                let elem = self.zero_text(base)?;
                let parts = vec![elem; count.get() as usize];
                format!("{}({})", self.type_name(ty)?, parts.join(", "))
            }
            TypeInner::Struct { ref members, .. } => {
                let mut parts = Vec::with_capacity(members.len());
                for member in members {
                    parts.push(self.zero_text(member.ty)?);
                }
                format!("{}({})", self.type_name(ty)?, parts.join(", "))
            }
            _ => return Err(Error::Validation("type has no zero value")),
        })
    }

    // ------------------------------------------------------------------
    // Functions

    fn write_function(&mut self, handle: Handle<Function>, fun: &Function) -> Result<(), Error> {
        self.baked.clear();
        let name = self.names[&NameKey::Function(handle)].clone();
        let return_decl = match fun.result {
            Some(ref result) => self.type_name(result.ty)?,
            None => "void".to_string(),
        };
        let mut params = Vec::new();
        for (index, argument) in fun.arguments.iter().enumerate() {
            let arg_name = self.names[&NameKey::FunctionArgument(handle, index as u32)].clone();
            params.push(self.decl_text(argument.ty, &arg_name)?);
        }
        writeln!(self.out, "{} {}({}) {{", return_decl, name, params.join(", "))?;
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
            let decl = self.decl_text(local.ty, &name)?;
            match local.init {
                Some(init) => {
                    write!(self.out, "{}{} = ", level, decl)?;
                    self.put_expression(ctx, init)?;
                    writeln!(self.out, ";")?;
                }
                None => {
                    let zero = self.zero_text(local.ty)?;
                    writeln!(self.out, "{}{} = {};", level, decl, zero)?;
                }
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
                match self.names.get(&NameKey::Constant(constant)) {
                    Some(name) => {
                        let name = name.clone();
                        write!(self.out, "{}", name)?;
                    }
                    None => {
                        let text = self.constant_text(constant)?;
                        write!(self.out, "{}", text)?;
                    }
                }
            }
            Expression::ZeroValue(ty) => {
                let text = self.zero_text(ty)?;
                write!(self.out, "{}", text)?;
            }
            Expression::Compose { ty, ref components } => {
                let name = self.type_name(ty)?;
                write!(self.out, "{}(", name)?;
                for (index, &component) in components.iter().enumerate() {
                    if index != 0 {
                        write!(self.out, ", ")?;
                    }
                    self.put_expression(ctx, component)?;
                }
                write!(self.out, ")")?;
            }
            Expression::Splat { size, value } => {
                let scalar = ctx
                    .inner_of(self.module, value)
                    .scalar()
                    .unwrap_or(Scalar::F32);
                write!(self.out, "{}(", Self::vector_name(size, scalar))?;
                self.put_expression(ctx, value)?;
                write!(self.out, ")")?;
            }
            Expression::Access { base, index } => {
                self.put_expression(ctx, base)?;
                write!(self.out, "[")?;
                self.put_expression(ctx, index)?;
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
                        self.put_expression(ctx, base)?;
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
                if self.wrapped[global.index()] {
                    write!(self.out, ".inner")?;
                }
            }
            Expression::LocalVariable(local) => {
                let name = self.names[&NameKey::FunctionLocal(ctx.handle, local)].clone();
                write!(self.out, "{}", name)?;
            }
            Expression::Load { pointer } => {
                self.put_expression(ctx, pointer)?;
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
                } else if op.is_comparison()
                    && ctx.inner_of(self.module, left).vector_size().is_some()
                {
                    // Component-wise comparisons are functions in GLSL.
                    let name = match op {
                        Bo::Equal => "equal",
                        Bo::NotEqual => "notEqual",
                        Bo::Less => "lessThan",
                        Bo::LessEqual => "lessThanEqual",
                        Bo::Greater => "greaterThan",
                        Bo::GreaterEqual => "greaterThanEqual",
                        _ => unreachable!(),
                    };
                    write!(self.out, "{}(", name)?;
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
            } => self.put_math(ctx, handle, fun, arg, arg1, arg2, arg3)?,
            Expression::Relational { fun, argument } => {
                let name = match fun {
                    RelationalFunction::All => "all",
                    RelationalFunction::Any => "any",
                    RelationalFunction::IsNan => "isnan",
                    RelationalFunction::IsInf => "isinf",
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
                if ctx
                    .inner_of(self.module, condition)
                    .vector_size()
                    .is_some()
                {
                    write!(self.out, "mix(")?;
                    self.put_expression(ctx, reject)?;
                    write!(self.out, ", ")?;
                    self.put_expression(ctx, accept)?;
                    write!(self.out, ", ")?;
                    self.put_expression(ctx, condition)?;
                    write!(self.out, ")")?;
                } else {
                    write!(self.out, "(")?;
                    self.put_expression(ctx, condition)?;
                    write!(self.out, " ? ")?;
                    self.put_expression(ctx, accept)?;
                    write!(self.out, " : ")?;
                    self.put_expression(ctx, reject)?;
                    write!(self.out, ")")?;
                }
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => {
                if convert.is_none() {
                    let source_kind = ctx
                        .inner_of(self.module, expr)
                        .scalar_kind()
                        .unwrap_or(ScalarKind::Float);
                    let name = bitcast_function(source_kind, kind)?;
                    write!(self.out, "{}(", name)?;
                    self.put_expression(ctx, expr)?;
                    write!(self.out, ")")?;
                } else {
                    let source = ctx.inner_of(self.module, expr);
                    let scalar = Scalar {
                        kind,
                        width: convert.unwrap_or(4),
                    };
                    let target = match source.vector_size() {
                        Some(size) => Self::vector_name(size, scalar),
                        None => Self::scalar_name(scalar).to_string(),
                    };
                    write!(self.out, "{}(", target)?;
                    self.put_expression(ctx, expr)?;
                    write!(self.out, ")")?;
                }
            }
            Expression::Derivative { axis, ctrl, expr } => {
                use wgslc_core::{DerivativeAxis as Axis, DerivativeControl as Ctrl};
                let name = match (axis, ctrl) {
                    (Axis::X, Ctrl::Coarse) => "dFdxCoarse",
                    (Axis::X, Ctrl::Fine) => "dFdxFine",
                    (Axis::X, Ctrl::None) => "dFdx",
                    (Axis::Y, Ctrl::Coarse) => "dFdyCoarse",
                    (Axis::Y, Ctrl::Fine) => "dFdyFine",
                    (Axis::Y, Ctrl::None) => "dFdy",
                    (Axis::Width, _) => "fwidth",
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
                let class = image_class(ctx, self.module, image)?;
                match class {
                    ImageClass::Storage { .. } => {
                        write!(self.out, "imageLoad(")?;
                        self.put_expression(ctx, image)?;
                        write!(self.out, ", ")?;
                        self.put_texel_coordinate(ctx, coordinate, array_index)?;
                        write!(self.out, ")")?;
                    }
                    _ => {
                        write!(self.out, "texelFetch(")?;
                        self.put_expression(ctx, image)?;
                        write!(self.out, ", ")?;
                        self.put_texel_coordinate(ctx, coordinate, array_index)?;
                        if let Some(extra) = sample.or(level) {
                            write!(self.out, ", int(")?;
                            self.put_expression(ctx, extra)?;
                            write!(self.out, ")")?;
                        } else {
                            write!(self.out, ", 0")?;
                        }
                        write!(self.out, ")")?;
                    }
                }
            }
            Expression::ImageQuery { image, query } => {
                self.put_image_query(ctx, image, query)?
            }
            Expression::ArrayLength(pointer) => {
                write!(self.out, "uint(")?;
                self.put_expression(ctx, pointer)?;
                write!(self.out, ".length())")?;
            }
            Expression::CallResult(_) | Expression::AtomicResult { .. } => {
                return Err(Error::Validation(
                    "call or atomic result used before its statement",
                ))
            }
        }
        Ok(())
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
            Mf::Abs => "abs",
            Mf::Min => "min",
            Mf::Max => "max",
            Mf::Clamp => "clamp",
            Mf::Cos => "cos",
            Mf::Cosh => "cosh",
            Mf::Sin => "sin",
            Mf::Sinh => "sinh",
            Mf::Tan => "tan",
            Mf::Tanh => "tanh",
            Mf::Acos => "acos",
            Mf::Asin => "asin",
            Mf::Atan => "atan",
            Mf::Atan2 => "atan",
            Mf::Ceil => "ceil",
            Mf::Floor => "floor",
            Mf::Round => "roundEven",
            Mf::Fract => "fract",
            Mf::Trunc => "trunc",
            Mf::Ldexp => "ldexp",
            Mf::Exp => "exp",
            Mf::Exp2 => "exp2",
            Mf::Log => "log",
            Mf::Log2 => "log2",
            Mf::Pow => "pow",
            Mf::Sqrt => "sqrt",
            Mf::InverseSqrt => "inversesqrt",
            Mf::Dot => "dot",
            Mf::Cross => "cross",
            Mf::Distance => "distance",
            Mf::Length => "length",
            Mf::Normalize => "normalize",
            Mf::FaceForward => "faceforward",
            Mf::Reflect => "reflect",
            Mf::Refract => "refract",
            Mf::Sign => "sign",
            Mf::Fma => "fma",
            Mf::Mix => "mix",
            Mf::Step => "step",
            Mf::SmoothStep => "smoothstep",
            Mf::Transpose => "transpose",
            Mf::Determinant => "determinant",
            Mf::CountOneBits => "bitCount",
            Mf::ReverseBits => "bitfieldReverse",
            Mf::ExtractBits => "bitfieldExtract",
            Mf::InsertBits => "bitfieldInsert",
            Mf::FirstTrailingBit => "findLSB",
            Mf::FirstLeadingBit => "findMSB",
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

    /// Signed integer coordinates for texel addressing, with the array
    /// layer folded in.
    fn put_texel_coordinate(
        &mut self,
        ctx: &FunCtx,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
    ) -> Result<(), Error> {
        let size = ctx.inner_of(self.module, coordinate).vector_size();
        let components = size.map_or(1, |size| size as u8);
        match array_index {
            Some(array_index) => {
                write!(self.out, "ivec{}(", components + 1)?;
                self.put_expression(ctx, coordinate)?;
                write!(self.out, ", ")?;
                self.put_expression(ctx, array_index)?;
                write!(self.out, ")")?;
            }
            None => {
                if components == 1 {
                    write!(self.out, "int(")?;
                } else {
                    write!(self.out, "ivec{}(", components)?;
                }
                self.put_expression(ctx, coordinate)?;
                write!(self.out, ")")?;
            }
        }
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
        let (dim, arrayed, class) = match *ctx.inner_of(self.module, image) {
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => (dim, arrayed, class),
            _ => return Err(Error::Validation("sample of a non-image")),
        };
        let combined = combined_sampler_name(dim, arrayed, class, depth_ref.is_some())?;

        let function = if gather.is_some() {
            "textureGather"
        } else {
            match level {
                SampleLevel::Zero | SampleLevel::Exact(_) => "textureLod",
                SampleLevel::Gradient { .. } => "textureGrad",
                _ => "texture",
            }
        };
        let with_offset = offset.is_some() && !matches!(level, SampleLevel::Gradient { .. });
        write!(
            self.out,
            "{}{}({}(",
            function,
            if with_offset { "Offset" } else { "" },
            combined
        )?;
        self.put_expression(ctx, image)?;
        write!(self.out, ", ")?;
        self.put_expression(ctx, sampler)?;
        write!(self.out, "), ")?;

        // Coordinates gather up the layer and the comparison reference.
        let base_size = ctx
            .inner_of(self.module, coordinate)
            .vector_size()
            .map_or(1, |size| size as u8);
        let total = base_size + arrayed as u8 + depth_ref.is_some() as u8;
        if total > base_size {
            write!(self.out, "vec{}(", total)?;
        }
        self.put_expression(ctx, coordinate)?;
        if let Some(array_index) = array_index {
            write!(self.out, ", float(")?;
            self.put_expression(ctx, array_index)?;
            write!(self.out, ")")?;
        }
        if let Some(depth_ref) = depth_ref {
            write!(self.out, ", ")?;
            self.put_expression(ctx, depth_ref)?;
        }
        if total > base_size {
            write!(self.out, ")")?;
        }

        match level {
            SampleLevel::Auto => {}
            SampleLevel::Zero => write!(self.out, ", 0.0")?,
            SampleLevel::Exact(expr) => {
                write!(self.out, ", ")?;
                self.put_expression(ctx, expr)?;
            }
            SampleLevel::Bias(expr) => {
                write!(self.out, ", ")?;
                self.put_expression(ctx, expr)?;
            }
            SampleLevel::Gradient { x, y } => {
                write!(self.out, ", ")?;
                self.put_expression(ctx, x)?;
                write!(self.out, ", ")?;
                self.put_expression(ctx, y)?;
            }
        }
        if let Some(offset) = offset {
            let text = self.constant_text(offset)?;
            write!(self.out, ", {}", text)?;
        }
        if let Some(component) = gather {
            write!(self.out, ", {}", component as u8)?;
        }
        write!(self.out, ")")?;
        Ok(())
    }

    fn put_image_query(
        &mut self,
        ctx: &FunCtx,
        image: Handle<Expression>,
        query: wgslc_core::ImageQuery,
    ) -> Result<(), Error> {
        use wgslc_core::ImageQuery as Iq;
        let (dim, arrayed, class) = match *ctx.inner_of(self.module, image) {
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => (dim, arrayed, class),
            _ => return Err(Error::Validation("image query of a non-image")),
        };
        let is_storage = matches!(class, ImageClass::Storage { .. });
        let is_ms = matches!(
            class,
            ImageClass::Sampled { multi: true, .. } | ImageClass::Depth { multi: true }
        );
        let spatial = match dim {
            ImageDimension::D1 => 1u8,
            ImageDimension::D2 | ImageDimension::Cube => 2,
            ImageDimension::D3 => 3,
        };
        match query {
            Iq::Size { level } => {
                if spatial == 1 {
                    write!(self.out, "uint(")?;
                } else {
                    write!(self.out, "uvec{}(", spatial)?;
                }
                if is_storage {
                    write!(self.out, "imageSize(")?;
                    self.put_expression(ctx, image)?;
                    write!(self.out, ")")?;
                } else if is_ms {
                    write!(self.out, "textureSize(")?;
                    self.put_expression(ctx, image)?;
                    write!(self.out, ")")?;
                } else {
                    write!(self.out, "textureSize(")?;
                    self.put_expression(ctx, image)?;
                    write!(self.out, ", ")?;
                    match level {
                        Some(level) => {
                            write!(self.out, "int(")?;
                            self.put_expression(ctx, level)?;
                            write!(self.out, ")")?;
                        }
                        None => write!(self.out, "0")?,
                    }
                    write!(self.out, ")")?;
                }
                if arrayed && spatial > 1 {
                    write!(self.out, ".{}", &"xyz"[..spatial as usize])?;
                }
                write!(self.out, ")")?;
            }
            Iq::NumLevels => {
                write!(self.out, "uint(textureQueryLevels(")?;
                self.put_expression(ctx, image)?;
                write!(self.out, "))")?;
            }
            Iq::NumSamples => {
                write!(self.out, "uint(textureSamples(")?;
                self.put_expression(ctx, image)?;
                write!(self.out, "))")?;
            }
            Iq::NumLayers => {
                let lookup = if is_storage {
                    "imageSize"
                } else {
                    "textureSize"
                };
                write!(self.out, "uint({}(", lookup)?;
                self.put_expression(ctx, image)?;
                if !is_storage && !is_ms {
                    write!(self.out, ", 0")?;
                }
                let component = ['x', 'y', 'z', 'w'][spatial as usize];
                write!(self.out, ").{})", component)?;
            }
        }
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
                    if ctx.inner_of(self.module, handle).is_pointer() {
                        continue;
                    }
                    let resolution = &ctx.fun.expr_types[handle.index()];
                    let type_name = self.resolution_type_name(resolution)?;
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
                write!(self.out, "{}switch(", level)?;
                self.put_expression(ctx, selector)?;
                writeln!(self.out, ") {{")?;
                let inner = level.next();
                for case in cases {
                    for value in &case.values {
                        match *value {
                            SwitchValue::I32(v) => writeln!(self.out, "{}case {}:", inner, v)?,
                            SwitchValue::U32(v) => writeln!(self.out, "{}case {}u:", inner, v)?,
                            SwitchValue::Default => writeln!(self.out, "{}default:", inner)?,
                        }
                    }
                    writeln!(self.out, "{}{{", inner)?;
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
                writeln!(self.out, "{}while(true) {{", level)?;
                let inner = level.next();
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
            Statement::Kill => writeln!(self.out, "{}discard;", level)?,
            Statement::Store { pointer, value } => {
                write!(self.out, "{}", level)?;
                self.put_expression(ctx, pointer)?;
                write!(self.out, " = ")?;
                self.put_expression(ctx, value)?;
                writeln!(self.out, ";")?;
            }
            Statement::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            } => {
                write!(self.out, "{}imageStore(", level)?;
                self.put_expression(ctx, image)?;
                write!(self.out, ", ")?;
                self.put_texel_coordinate(ctx, coordinate, array_index)?;
                write!(self.out, ", ")?;
                self.put_expression(ctx, value)?;
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
                write!(self.out, "{}{} {} = ", level, type_name, result_name)?;
                match *fun {
                    AtomicFunction::Exchange {
                        compare: Some(compare),
                    } => {
                        write!(self.out, "atomicCompSwap(")?;
                        self.put_expression(ctx, pointer)?;
                        write!(self.out, ", ")?;
                        self.put_expression(ctx, compare)?;
                        write!(self.out, ", ")?;
                        self.put_expression(ctx, value)?;
                        writeln!(self.out, ");")?;
                    }
                    _ => {
                        let name = match *fun {
                            AtomicFunction::Add => "atomicAdd",
                            AtomicFunction::Subtract => "atomicAdd",
                            AtomicFunction::And => "atomicAnd",
                            AtomicFunction::ExclusiveOr => "atomicXor",
                            AtomicFunction::InclusiveOr => "atomicOr",
                            AtomicFunction::Min => "atomicMin",
                            AtomicFunction::Max => "atomicMax",
                            AtomicFunction::Exchange { .. } => "atomicExchange",
                        };
                        write!(self.out, "{}(", name)?;
                        self.put_expression(ctx, pointer)?;
                        write!(self.out, ", ")?;
                        if matches!(*fun, AtomicFunction::Subtract) {
                            write!(self.out, "-(")?;
                            self.put_expression(ctx, value)?;
                            write!(self.out, ")")?;
                        } else {
                            self.put_expression(ctx, value)?;
                        }
                        writeln!(self.out, ");")?;
                    }
                }
                self.baked.insert(result, result_name);
            }
            Statement::Barrier(barrier) => {
                if barrier.contains(Barrier::STORAGE) {
                    writeln!(self.out, "{}memoryBarrierBuffer();", level)?;
                }
                if barrier.contains(Barrier::WORK_GROUP) {
                    writeln!(self.out, "{}memoryBarrierShared();", level)?;
                }
                if barrier.contains(Barrier::TEXTURE) {
                    writeln!(self.out, "{}memoryBarrierImage();", level)?;
                }
                writeln!(self.out, "{}barrier();", level)?;
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
                let name = self.names[&NameKey::Function(function)].clone();
                write!(self.out, "{}(", name)?;
                for (index, &argument) in arguments.iter().enumerate() {
                    if index != 0 {
                        write!(self.out, ", ")?;
                    }
                    self.put_expression(ctx, argument)?;
                }
                writeln!(self.out, ");")?;
                if let Some((result, name)) = result_name {
                    self.baked.insert(result, name);
                }
            }
            Statement::WorkGroupUniformLoad { pointer, result } => {
                writeln!(self.out, "{}barrier();", level)?;
                let name = self.namer.call("_e");
                let type_name =
                    self.resolution_type_name(&ctx.fun.expr_types[result.index()])?;
                write!(self.out, "{}{} {} = ", level, type_name, name)?;
                self.put_expression(ctx, pointer)?;
                writeln!(self.out, ";")?;
                writeln!(self.out, "{}barrier();", level)?;
                self.baked.insert(result, name);
            }
            Statement::RayQuery { .. } => {
                return Err(Error::FeatureNotImplemented("ray queries"))
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entry point

    fn write_entry_point(&mut self) -> Result<(), Error> {
        self.baked.clear();
        let ep = self.entry_point();
        let fun = &self.module.functions[ep.function];
        let stage = ep.stage;

        // Flatten inputs, declaring `in` variables for locations.
        let mut argument_inputs: Vec<Vec<EpInput>> = Vec::new();
        for argument in fun.arguments.iter() {
            let mut parts = Vec::new();
            let bindings: Vec<(Handle<Type>, Option<&Binding>)> = match argument.binding {
                Some(ref binding) => vec![(argument.ty, Some(binding))],
                None => match self.module.types[argument.ty].inner {
                    TypeInner::Struct { ref members, .. } => members
                        .iter()
                        .map(|member| (member.ty, member.binding.as_ref()))
                        .collect(),
                    _ => return Err(Error::Validation("unbound entry point input")),
                },
            };
            for (ty, binding) in bindings {
                let binding = binding.ok_or(Error::Validation("unbound entry point input"))?;
                let expr = match *binding {
                    Binding::BuiltIn(builtin) => input_builtin_expr(builtin, stage)?,
                    Binding::Location { location, .. } => {
                        let var_name = self.namer.call(&format!("_p_input_{}", location));
                        let flat = matches!(
                            self.module.types[ty].inner.scalar_kind(),
                            Some(ScalarKind::Sint | ScalarKind::Uint)
                        ) && stage == ShaderStage::Fragment;
                        let decl = self.decl_text(ty, &var_name)?;
                        writeln!(
                            self.out,
                            "layout(location = {}) {}in {};",
                            location,
                            if flat { "flat " } else { "" },
                            decl
                        )?;
                        var_name
                    }
                };
                parts.push(EpInput { expr });
            }
            argument_inputs.push(parts);
        }

        // Outputs: `out` variables for locations, `gl_*` for builtins.
        let mut outputs: Vec<(String, Option<u32>)> = Vec::new();
        if let Some(ref result) = fun.result {
            let bindings: Vec<(Handle<Type>, Option<&Binding>, Option<u32>)> =
                match result.binding {
                    Some(ref binding) => vec![(result.ty, Some(binding), None)],
                    None => match self.module.types[result.ty].inner {
                        TypeInner::Struct { ref members, .. } => members
                            .iter()
                            .enumerate()
                            .map(|(i, member)| {
                                (member.ty, member.binding.as_ref(), Some(i as u32))
                            })
                            .collect(),
                        _ => return Err(Error::Validation("unbound entry point output")),
                    },
                };
            for (ty, binding, member_index) in bindings {
                let binding =
                    binding.ok_or(Error::Validation("unbound entry point output"))?;
                let target = match *binding {
                    Binding::BuiltIn(builtin) => output_builtin_expr(builtin)?.to_string(),
                    Binding::Location { location, .. } => {
                        let var_name = self.namer.call(&format!("_p_output_{}", location));
                        let flat = matches!(
                            self.module.types[ty].inner.scalar_kind(),
                            Some(ScalarKind::Sint | ScalarKind::Uint)
                        ) && stage == ShaderStage::Vertex;
                        let decl = self.decl_text(ty, &var_name)?;
                        writeln!(
                            self.out,
                            "layout(location = {}) {}out {};",
                            location,
                            if flat { "flat " } else { "" },
                            decl
                        )?;
                        var_name
                    }
                };
                outputs.push((target, member_index));
            }
        }

        writeln!(self.out)?;
        writeln!(self.out, "void main() {{")?;
        let level = Level(1);

        // Recompose the IR arguments.
        let mut call_args = Vec::new();
        for (index, (argument, parts)) in
            fun.arguments.iter().zip(&argument_inputs).enumerate()
        {
            if argument.binding.is_some() {
                call_args.push(parts[0].expr.clone());
            } else {
                let arg_name =
                    self.names[&NameKey::FunctionArgument(ep.function, index as u32)].clone();
                let type_name = self.type_name(argument.ty)?;
                let members: Vec<String> =
                    parts.iter().map(|part| part.expr.clone()).collect();
                writeln!(
                    self.out,
                    "{}{} {} = {}({});",
                    level,
                    type_name,
                    arg_name,
                    type_name,
                    members.join(", ")
                )?;
                call_args.push(arg_name);
            }
        }

        let inner_name = self.names[&NameKey::Function(ep.function)].clone();
        if fun.result.is_none() {
            writeln!(self.out, "{}{}({});", level, inner_name, call_args.join(", "))?;
        } else {
            let result_ty = fun.result.as_ref().unwrap().ty;
            let result_type_name = self.type_name(result_ty)?;
            writeln!(
                self.out,
                "{}{} _result = {}({});",
                level,
                result_type_name,
                inner_name,
                call_args.join(", ")
            )?;
            for (target, member_index) in &outputs {
                match *member_index {
                    Some(member_index) => {
                        let member_name = self.names
                            [&NameKey::StructMember(result_ty, member_index)]
                            .clone();
                        writeln!(
                            self.out,
                            "{}{} = _result.{};",
                            level, target, member_name
                        )?;
                    }
                    None => writeln!(self.out, "{}{} = _result;", level, target)?,
                }
            }
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Free helpers

fn image_class(
    ctx: &FunCtx,
    module: &Module,
    image: Handle<Expression>,
) -> Result<ImageClass, Error> {
    match *ctx.inner_of(module, image) {
        TypeInner::Image { class, .. } => Ok(class),
        _ => Err(Error::Validation("image operation on a non-image")),
    }
}

fn dim_text(dim: ImageDimension) -> &'static str {
    match dim {
        ImageDimension::D1 => "1D",
        ImageDimension::D2 => "2D",
        ImageDimension::D3 => "3D",
        ImageDimension::Cube => "Cube",
    }
}

fn combined_sampler_name(
    dim: ImageDimension,
    arrayed: bool,
    class: ImageClass,
    comparison: bool,
) -> Result<String, Error> {
    let prefix = match class {
        ImageClass::Sampled { kind, .. } => match kind {
            ScalarKind::Sint => "i",
            ScalarKind::Uint => "u",
            _ => "",
        },
        _ => "",
    };
    let ms = matches!(
        class,
        ImageClass::Sampled { multi: true, .. } | ImageClass::Depth { multi: true }
    );
    Ok(format!(
        "{}sampler{}{}{}{}",
        prefix,
        dim_text(dim),
        if ms { "MS" } else { "" },
        if arrayed { "Array" } else { "" },
        if comparison { "Shadow" } else { "" },
    ))
}

fn format_text(format: wgslc_core::StorageFormat) -> &'static str {
    use wgslc_core::StorageFormat as Sf;
    match format {
        Sf::R32Uint => "r32ui",
        Sf::R32Sint => "r32i",
        Sf::R32Float => "r32f",
        Sf::Rg32Uint => "rg32ui",
        Sf::Rg32Sint => "rg32i",
        Sf::Rg32Float => "rg32f",
        Sf::Rgba8Unorm => "rgba8",
        Sf::Rgba8Snorm => "rgba8_snorm",
        Sf::Rgba8Uint => "rgba8ui",
        Sf::Rgba8Sint => "rgba8i",
        Sf::Rgba16Uint => "rgba16ui",
        Sf::Rgba16Sint => "rgba16i",
        Sf::Rgba16Float => "rgba16f",
        Sf::Rgba32Uint => "rgba32ui",
        Sf::Rgba32Sint => "rgba32i",
        Sf::Rgba32Float => "rgba32f",
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

fn bitcast_function(source: ScalarKind, target: ScalarKind) -> Result<&'static str, Error> {
    Ok(match (source, target) {
        (ScalarKind::Float, ScalarKind::Sint) => "floatBitsToInt",
        (ScalarKind::Float, ScalarKind::Uint) => "floatBitsToUint",
        (ScalarKind::Sint, ScalarKind::Float) => "intBitsToFloat",
        (ScalarKind::Uint, ScalarKind::Float) => "uintBitsToFloat",
        (ScalarKind::Sint, ScalarKind::Uint) => "uint",
        (ScalarKind::Uint, ScalarKind::Sint) => "int",
        _ => return Err(Error::FeatureNotImplemented("bitcast between these types")),
    })
}

fn float_text(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1.0e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn scalar_text(value: ScalarValue) -> String {
    match value {
        ScalarValue::Sint(v) => format!("{}", v),
        ScalarValue::Uint(v) => format!("{}u", v),
        ScalarValue::Float(v) => float_text(v),
        ScalarValue::Bool(v) => format!("{}", v),
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

fn input_builtin_expr(builtin: BuiltIn, stage: ShaderStage) -> Result<String, Error> {
    Ok(match builtin {
        BuiltIn::VertexIndex => "uint(gl_VertexID)".to_string(),
        BuiltIn::InstanceIndex => "uint(gl_InstanceID)".to_string(),
        BuiltIn::Position => match stage {
            ShaderStage::Fragment => "gl_FragCoord".to_string(),
            _ => return Err(Error::Validation("position is not an input here")),
        },
        BuiltIn::FrontFacing => "gl_FrontFacing".to_string(),
        BuiltIn::SampleIndex => "uint(gl_SampleID)".to_string(),
        BuiltIn::GlobalInvocationId => "gl_GlobalInvocationID".to_string(),
        BuiltIn::LocalInvocationId => "gl_LocalInvocationID".to_string(),
        BuiltIn::LocalInvocationIndex => "gl_LocalInvocationIndex".to_string(),
        BuiltIn::WorkGroupId => "gl_WorkGroupID".to_string(),
        BuiltIn::NumWorkGroups => "gl_NumWorkGroups".to_string(),
        BuiltIn::SampleMask | BuiltIn::FragDepth => {
            return Err(Error::FeatureNotImplemented("this builtin as an input"))
        }
    })
}

fn output_builtin_expr(builtin: BuiltIn) -> Result<&'static str, Error> {
    Ok(match builtin {
        BuiltIn::Position => "gl_Position",
        BuiltIn::FragDepth => "gl_FragDepth",
        _ => return Err(Error::Validation("builtin is not an output")),
    })
}
