//! HLSL text emission.

use std::fmt::Write;

use wgslc_core::{
    AddressSpace, ArraySize, AtomicFunction, Barrier, Binding, Block, BuiltIn, ConstantInner,
    Expression, Function, Handle, ImageClass, ImageDimension, Literal, MathFunction, Module,
    RelationalFunction, SampleLevel, Scalar, ScalarKind, ScalarValue, ShaderStage, Statement,
    StorageAccess, SwitchValue, Type, TypeInner, TypeResolution, UnaryOperator, VectorSize,
};

use super::{keywords::RESERVED, Error, Options};
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

pub(super) struct Writer<'a> {
    out: String,
    module: &'a Module,
    options: &'a Options,
    names: wgslc_core::FastHashMap<NameKey, String>,
    namer: Namer,
    baked: wgslc_core::FastHashMap<Handle<Expression>, String>,
    array_names: wgslc_core::FastHashMap<Handle<Type>, String>,
    math_helpers: wgslc_core::FastHashMap<Handle<Type>, String>,
    /// Globals whose buffer view holds a single element, accessed at `[0]`.
    storage_single: Vec<bool>,
    /// `(kind, size, is_division)` combinations needing a guarded helper.
    int_helpers: Vec<(ScalarKind, Option<VectorSize>, bool)>,
    /// `(kind, size, is_insert)` combinations needing a bit-field helper.
    bit_helpers: Vec<(ScalarKind, Option<VectorSize>, bool)>,
    /// Globals whose dimensions are queried, needing a `GetDimensions`
    /// wrapper.
    dim_helpers: Vec<Handle<wgslc_core::GlobalVariable>>,
    /// Buffer globals whose runtime length is queried.
    len_helpers: Vec<Handle<wgslc_core::GlobalVariable>>,
    temp_counter: u32,
    loop_counter: u32,
}

impl<'a> Writer<'a> {
    pub(super) fn new(module: &'a Module, options: &'a Options) -> Result<Self, Error> {
        if let Some(ref name) = options.entry_point {
            if !module.entry_points.iter().any(|ep| &ep.name == name) {
                return Err(Error::EntryPointNotFound(name.clone()));
            }
        }
        let mut namer = Namer::new(RESERVED, true);
        namer.reserve("_wgsl_div");
        namer.reserve("_wgsl_mod");
        namer.reserve("_wgsl_extract_bits");
        namer.reserve("_wgsl_insert_bits");
        let names = process_names(module, &mut namer);
        Ok(Writer {
            out: String::new(),
            module,
            options,
            names,
            namer,
            baked: Default::default(),
            array_names: Default::default(),
            math_helpers: Default::default(),
            storage_single: vec![false; module.global_variables.len()],
            int_helpers: Vec::new(),
            bit_helpers: Vec::new(),
            dim_helpers: Vec::new(),
            len_helpers: Vec::new(),
            temp_counter: 0,
            loop_counter: 0,
        })
    }

    pub(super) fn finish(self) -> String {
        self.out
    }

    pub(super) fn write(&mut self) -> Result<TranslationInfo, Error> {
        self.scan_module()?;
        self.write_type_definitions()?;
        for (handle, _) in self.module.global_variables.iter() {
            self.write_global(handle)?;
        }
        writeln!(self.out)?;
        self.write_polyfills()?;
        self.write_module_constants()?;

        let selected: Vec<usize> = self
            .module
            .entry_points
            .iter()
            .enumerate()
            .filter(|(_, ep)| match self.options.entry_point {
                Some(ref name) => &ep.name == name,
                None => true,
            })
            .map(|(index, _)| index)
            .collect();
        // Functions backing entry points that are not emitted stay out of
        // the output entirely.
        let skip: Vec<Handle<Function>> = self
            .module
            .entry_points
            .iter()
            .enumerate()
            .filter(|(index, _)| !selected.contains(index))
            .map(|(_, ep)| ep.function)
            .collect();
        for (handle, fun) in self.module.functions.iter() {
            if skip.contains(&handle) {
                continue;
            }
            self.write_function(handle, fun)?;
        }

        let mut info = TranslationInfo::default();
        for (index, ep) in self.module.entry_points.iter().enumerate() {
            if selected.contains(&index) {
                let name = self.names[&NameKey::EntryPoint(index as u32)].clone();
                self.write_entry_point(index as u32, ep)?;
                info.entry_point_names.push(name);
            } else {
                info.entry_point_names.push(String::new());
            }
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Scanning

    fn scan_module(&mut self) -> Result<(), Error> {
        for (_, fun) in self.module.functions.iter() {
            for (_, expr) in fun.expressions.iter() {
                match *expr {
                    Expression::Binary { op, left, .. } => {
                        let inner = fun.expr_types[left.index()].inner_with(&self.module.types);
                        if let Some(kind @ (ScalarKind::Sint | ScalarKind::Uint)) =
                            inner.scalar_kind()
                        {
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
                    Expression::Math {
                        fun: math_fun @ (MathFunction::ExtractBits | MathFunction::InsertBits),
                        arg,
                        ..
                    } => {
                        let inner = fun.expr_types[arg.index()].inner_with(&self.module.types);
                        let entry = (
                            inner.scalar_kind().unwrap_or(ScalarKind::Uint),
                            inner.vector_size(),
                            math_fun == MathFunction::InsertBits,
                        );
                        if !self.bit_helpers.contains(&entry) {
                            self.bit_helpers.push(entry);
                        }
                    }
                    Expression::ImageQuery { image, .. } => {
                        if let Expression::GlobalVariable(global) = fun.expressions[image] {
                            if !self.dim_helpers.contains(&global) {
                                self.dim_helpers.push(global);
                            }
                        } else {
                            return Err(Error::FeatureNotImplemented(
                                "querying an image that is not a global",
                            ));
                        }
                    }
                    Expression::ArrayLength(pointer) => {
                        let global = match fun.expressions[pointer] {
                            Expression::GlobalVariable(global) => Some(global),
                            Expression::AccessIndex { base, .. } => {
                                match fun.expressions[base] {
                                    Expression::GlobalVariable(global) => Some(global),
                                    _ => None,
                                }
                            }
                            _ => None,
                        };
                        let global = global.ok_or(Error::FeatureNotImplemented(
                            "array length of a non-global pointer",
                        ))?;
                        if !self.len_helpers.contains(&global) {
                            self.len_helpers.push(global);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
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
        format!("{}{}", Self::scalar_name(scalar), size as u8)
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
            TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => {
                Self::scalar_name(scalar).to_string()
            }
            TypeInner::Vector { size, scalar } => Self::vector_name(size, scalar),
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => format!(
                "{}{}x{}",
                Self::scalar_name(scalar),
                columns as u8,
                rows as u8
            ),
            TypeInner::Pointer { .. } | TypeInner::ValuePointer { .. } => {
                return Err(Error::FeatureNotImplemented("first-class pointer values"))
            }
            TypeInner::Array {
                size: ArraySize::Constant(_),
                ..
            } => match handle.and_then(|handle| self.array_names.get(&handle)) {
                Some(name) => name.clone(),
                None => return Err(Error::Validation("array type without a wrapper")),
            },
            TypeInner::Array { .. } => {
                return Err(Error::Validation(
                    "runtime arrays only exist as buffer resources",
                ))
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
                let scalar = match class {
                    ImageClass::Sampled { kind, .. } => Scalar { kind, width: 4 },
                    ImageClass::Depth { .. } => Scalar::F32,
                    ImageClass::Storage { format, .. } => Scalar {
                        kind: format.scalar_kind(),
                        width: 4,
                    },
                };
                let texel = format!("{}4", Self::scalar_name(scalar));
                let dim_name = match dim {
                    ImageDimension::D1 => "1D",
                    ImageDimension::D2 => "2D",
                    ImageDimension::D3 => "3D",
                    ImageDimension::Cube => "Cube",
                };
                let ms = matches!(
                    class,
                    ImageClass::Sampled { multi: true, .. } | ImageClass::Depth { multi: true }
                );
                let rw = matches!(class, ImageClass::Storage { .. });
                format!(
                    "{}Texture{}{}{}<{}>",
                    if rw { "RW" } else { "" },
                    dim_name,
                    if ms { "MS" } else { "" },
                    if arrayed { "Array" } else { "" },
                    texel
                )
            }
            TypeInner::Sampler { comparison } => if comparison {
                "SamplerComparisonState"
            } else {
                "SamplerState"
            }
            .to_string(),
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
                        // A storage struct trailing off in a runtime array
                        // has no HLSL struct spelling.
                        continue;
                    }
                    let name = self.names[&NameKey::Type(handle)].clone();
                    writeln!(self.out, "struct {} {{", name)?;
                    for (index, member) in members.iter().enumerate() {
                        let member_name =
                            self.names[&NameKey::StructMember(handle, index as u32)].clone();
                        let type_name = self.type_name(member.ty)?;
                        writeln!(self.out, "{}{} {};", Level(1), type_name, member_name)?;
                    }
                    writeln!(self.out, "}};")?;
                    writeln!(self.out)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn write_global(&mut self, handle: Handle<wgslc_core::GlobalVariable>) -> Result<(), Error> {
        let var = &self.module.global_variables[handle];
        let name = self.names[&NameKey::GlobalVariable(handle)].clone();
        let register = var.binding.map(|binding| self.options.resolve_binding(&binding));
        match var.space {
            AddressSpace::Uniform | AddressSpace::PushConstant => {
                let cbuffer_name = self.namer.call(&format!("{}_cbuffer", name));
                let register_text = match register {
                    Some(target) => {
                        format!(" : register(b{}, space{})", target.register, target.space)
                    }
                    None => String::new(),
                };
                writeln!(self.out, "cbuffer {}{} {{", cbuffer_name, register_text)?;
                writeln!(
                    self.out,
                    "{}{} {};",
                    Level(1),
                    self.type_name(var.ty)?,
                    name
                )?;
                writeln!(self.out, "}}")?;
            }
            AddressSpace::Storage { access } => {
                let writable = access.contains(StorageAccess::STORE);
                let (keyword, register_class) = if writable {
                    ("RWStructuredBuffer", 'u')
                } else {
                    ("StructuredBuffer", 't')
                };
                let element = match self.module.types[var.ty].inner {
                    TypeInner::Array { base, .. } => self.type_name(base)?,
                    TypeInner::Struct { ref members, .. }
                        if members.iter().any(|member| {
                            matches!(
                                self.module.types[member.ty].inner,
                                TypeInner::Array {
                                    size: ArraySize::Dynamic,
                                    ..
                                }
                            )
                        }) =>
                    {
                        return Err(Error::FeatureNotImplemented(
                            "storage structs with runtime array members",
                        ))
                    }
                    _ => {
                        self.storage_single[handle.index()] = true;
                        self.type_name(var.ty)?
                    }
                };
                let register_text = match register {
                    Some(target) => format!(
                        " : register({}{}, space{})",
                        register_class, target.register, target.space
                    ),
                    None => String::new(),
                };
                writeln!(
                    self.out,
                    "{}<{}> {}{};",
                    keyword, element, name, register_text
                )?;
            }
            AddressSpace::Handle => {
                let register_class = match self.module.types[var.ty].inner {
                    TypeInner::Sampler { .. } => 's',
                    TypeInner::Image {
                        class: ImageClass::Storage { .. },
                        ..
                    } => 'u',
                    _ => 't',
                };
                let register_text = match register {
                    Some(target) => format!(
                        " : register({}{}, space{})",
                        register_class, target.register, target.space
                    ),
                    None => String::new(),
                };
                writeln!(
                    self.out,
                    "{} {}{};",
                    self.type_name(var.ty)?,
                    name,
                    register_text
                )?;
            }
            AddressSpace::WorkGroup => {
                writeln!(
                    self.out,
                    "groupshared {} {};",
                    self.type_name(var.ty)?,
                    name
                )?;
            }
            AddressSpace::Private => {
                let type_name = self.type_name(var.ty)?;
                match var.init {
                    Some(init) => {
                        let text = self.constant_text(init)?;
                        writeln!(self.out, "static {} {} = {};", type_name, name, text)?;
                    }
                    None => writeln!(
                        self.out,
                        "static {} {} = ({})0;",
                        type_name, name, type_name
                    )?,
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
            // Division by zero yields the dividend; remainder by zero
            // yields zero.
            writeln!(
                self.out,
                "{}{} safe = (b == ({})0) ? ({})1 : b;",
                Level(1),
                ty,
                ty,
                ty
            )?;
            if is_div {
                writeln!(
                    self.out,
                    "{}return (b == ({})0) ? a : (a / safe);",
                    Level(1),
                    ty
                )?;
            } else {
                writeln!(
                    self.out,
                    "{}return (b == ({})0) ? ({})0 : (a % safe);",
                    Level(1),
                    ty,
                    ty
                )?;
            }
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
        }

        for index in 0..self.bit_helpers.len() {
            let (kind, size, is_insert) = self.bit_helpers[index];
            let scalar = Scalar { kind, width: 4 };
            let ty = match size {
                Some(size) => Self::vector_name(size, scalar),
                None => Self::scalar_name(scalar).to_string(),
            };
            if is_insert {
                writeln!(
                    self.out,
                    "{} _wgsl_insert_bits({} e, {} newbits, uint offset, uint count) {{",
                    ty, ty, ty
                )?;
                writeln!(
                    self.out,
                    "{}uint mask = (count == 32u) ? 0xffffffffu : ((1u << count) - 1u);",
                    Level(1)
                )?;
                writeln!(
                    self.out,
                    "{}return (e & ~({})(mask << offset)) | ((newbits & ({})mask) << offset);",
                    Level(1),
                    ty,
                    ty
                )?;
                writeln!(self.out, "}}")?;
            } else {
                writeln!(
                    self.out,
                    "{} _wgsl_extract_bits({} e, uint offset, uint count) {{",
                    ty, ty
                )?;
                // Shift up then back down so signed values sign-extend.
                writeln!(
                    self.out,
                    "{}return (e << (32u - offset - count)) >> (32u - count);",
                    Level(1)
                )?;
                writeln!(self.out, "}}")?;
            }
            writeln!(self.out)?;
        }

        for index in 0..self.dim_helpers.len() {
            let global = self.dim_helpers[index];
            self.write_dim_helper(global)?;
        }

        for index in 0..self.len_helpers.len() {
            let global = self.len_helpers[index];
            let name = self.names[&NameKey::GlobalVariable(global)].clone();
            writeln!(self.out, "uint _wgsl_len_{}() {{", name)?;
            writeln!(self.out, "{}uint len, stride;", Level(1))?;
            writeln!(self.out, "{}{}.GetDimensions(len, stride);", Level(1), name)?;
            writeln!(self.out, "{}return len;", Level(1))?;
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
                "{}{} ret = {{ fract, other }};",
                Level(1),
                struct_name
            )?;
            writeln!(self.out, "{}return ret;", Level(1))?;
            writeln!(self.out, "}}")?;
            writeln!(self.out)?;
            self.math_helpers.insert(ty, helper_name);
        }
        Ok(())
    }

    /// A `GetDimensions` wrapper returning `uint4(width, height,
    /// depth_or_layers, levels_or_samples)`.
    fn write_dim_helper(
        &mut self,
        global: Handle<wgslc_core::GlobalVariable>,
    ) -> Result<(), Error> {
        let var = &self.module.global_variables[global];
        let name = self.names[&NameKey::GlobalVariable(global)].clone();
        let (dim, arrayed, class) = match self.module.types[var.ty].inner {
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => (dim, arrayed, class),
            _ => return Err(Error::Validation("dimension query of a non-image")),
        };
        let is_storage = matches!(class, ImageClass::Storage { .. });
        let is_ms = matches!(
            class,
            ImageClass::Sampled { multi: true, .. } | ImageClass::Depth { multi: true }
        );
        writeln!(self.out, "uint4 _wgsl_dims_{}(uint mip) {{", name)?;
        let level = Level(1);
        writeln!(self.out, "{}uint4 ret = (uint4)0;", level)?;
        let call = match (dim, arrayed, is_storage, is_ms) {
            (ImageDimension::D1, false, false, false) => {
                writeln!(self.out, "{}uint w, levels;", level)?;
                "GetDimensions(mip, w, levels); ret = uint4(w, 0u, 0u, levels)"
            }
            (ImageDimension::D1, false, true, false) => {
                writeln!(self.out, "{}uint w;", level)?;
                "GetDimensions(w); ret = uint4(w, 0u, 0u, 0u)"
            }
            (ImageDimension::D2 | ImageDimension::Cube, false, false, false) => {
                writeln!(self.out, "{}uint w, h, levels;", level)?;
                "GetDimensions(mip, w, h, levels); ret = uint4(w, h, 0u, levels)"
            }
            (ImageDimension::D2, false, true, false) => {
                writeln!(self.out, "{}uint w, h;", level)?;
                "GetDimensions(w, h); ret = uint4(w, h, 0u, 0u)"
            }
            (ImageDimension::D2, false, false, true) => {
                writeln!(self.out, "{}uint w, h, samples;", level)?;
                "GetDimensions(w, h, samples); ret = uint4(w, h, 0u, samples)"
            }
            (ImageDimension::D2 | ImageDimension::Cube, true, false, false) => {
                writeln!(self.out, "{}uint w, h, elements, levels;", level)?;
                "GetDimensions(mip, w, h, elements, levels); ret = uint4(w, h, elements, levels)"
            }
            (ImageDimension::D2, true, true, false) => {
                writeln!(self.out, "{}uint w, h, elements;", level)?;
                "GetDimensions(w, h, elements); ret = uint4(w, h, elements, 0u)"
            }
            (ImageDimension::D3, false, false, false) => {
                writeln!(self.out, "{}uint w, h, d, levels;", level)?;
                "GetDimensions(mip, w, h, d, levels); ret = uint4(w, h, d, levels)"
            }
            (ImageDimension::D3, false, true, false) => {
                writeln!(self.out, "{}uint w, h, d;", level)?;
                "GetDimensions(w, h, d); ret = uint4(w, h, d, 0u)"
            }
            _ => {
                return Err(Error::FeatureNotImplemented(
                    "dimension query for this image arrangement",
                ))
            }
        };
        writeln!(self.out, "{}{}.{};", level, name, call)?;
        writeln!(self.out, "{}return ret;", level)?;
        writeln!(self.out, "}}")?;
        writeln!(self.out)?;
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
                    (
                        Self::scalar_name(scalar).to_string(),
                        scalar_text(value),
                    )
                }
                ConstantInner::Composite { ty, .. } => {
                    (self.type_name(ty)?, self.constant_text(handle)?)
                }
            };
            writeln!(self.out, "static const {} {} = {};", type_name, name, value)?;
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
                match self.module.types[ty].inner {
                    TypeInner::Struct { .. } | TypeInner::Array { .. } => {
                        format!("{{ {} }}", parts.join(", "))
                    }
                    _ => format!("{}({})", self.type_name(ty)?, parts.join(", ")),
                }
            }
        })
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
                None => writeln!(
                    self.out,
                    "{}{} {} = ({})0;",
                    level, type_name, name, type_name
                )?,
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
                let name = self.type_name(ty)?;
                write!(self.out, "({})0", name)?;
            }
            Expression::Compose { ty, ref components } => {
                // Struct and array composes are baked into declarations at
                // their emit point; only plain constructors print inline.
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
                for index in 0..size as u8 {
                    if index != 0 {
                        write!(self.out, ", ")?;
                    }
                    self.put_expression(ctx, value)?;
                }
                write!(self.out, ")")?;
            }
            Expression::Access { base, index } => {
                self.put_access_base(ctx, base)?;
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
                if self.storage_single[global.index()] {
                    write!(self.out, "[0]")?;
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
                let left_inner = ctx.inner_of(self.module, left);
                let is_int = matches!(
                    left_inner.scalar_kind(),
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
                } else if op == Bo::Multiply
                    && (matches!(*left_inner, TypeInner::Matrix { .. })
                        || matches!(
                            *ctx.inner_of(self.module, right),
                            TypeInner::Matrix { .. }
                        ))
                    && !matches!(*left_inner, TypeInner::Scalar(_))
                    && !matches!(*ctx.inner_of(self.module, right), TypeInner::Scalar(_))
                {
                    // Linear-algebra products spell `mul`; note the operand
                    // swap for HLSL's row-vector convention.
                    write!(self.out, "mul(")?;
                    self.put_expression(ctx, right)?;
                    write!(self.out, ", ")?;
                    self.put_expression(ctx, left)?;
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
                write!(self.out, "(")?;
                self.put_expression(ctx, condition)?;
                write!(self.out, " ? ")?;
                self.put_expression(ctx, accept)?;
                write!(self.out, " : ")?;
                self.put_expression(ctx, reject)?;
                write!(self.out, ")")?;
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => {
                let source = ctx.inner_of(self.module, expr);
                match convert {
                    None => {
                        let source_kind = source.scalar_kind().unwrap_or(ScalarKind::Float);
                        let name = match (source_kind, kind) {
                            (_, ScalarKind::Float) => "asfloat",
                            (_, ScalarKind::Sint) => "asint",
                            (_, ScalarKind::Uint) => "asuint",
                            _ => {
                                return Err(Error::FeatureNotImplemented(
                                    "bitcast to this type",
                                ))
                            }
                        };
                        write!(self.out, "{}(", name)?;
                        self.put_expression(ctx, expr)?;
                        write!(self.out, ")")?;
                    }
                    Some(width) => {
                        let scalar = Scalar { kind, width };
                        let target = match source.vector_size() {
                            Some(size) => Self::vector_name(size, scalar),
                            None => Self::scalar_name(scalar).to_string(),
                        };
                        write!(self.out, "{}(", target)?;
                        self.put_expression(ctx, expr)?;
                        write!(self.out, ")")?;
                    }
                }
            }
            Expression::Derivative { axis, ctrl, expr } => {
                use wgslc_core::{DerivativeAxis as Axis, DerivativeControl as Ctrl};
                let name = match (axis, ctrl) {
                    (Axis::X, Ctrl::Coarse) => "ddx_coarse",
                    (Axis::X, Ctrl::Fine) => "ddx_fine",
                    (Axis::X, Ctrl::None) => "ddx",
                    (Axis::Y, Ctrl::Coarse) => "ddy_coarse",
                    (Axis::Y, Ctrl::Fine) => "ddy_fine",
                    (Axis::Y, Ctrl::None) => "ddy",
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
                let class = match *ctx.inner_of(self.module, image) {
                    TypeInner::Image { class, .. } => class,
                    _ => return Err(Error::Validation("image load of a non-image")),
                };
                match class {
                    ImageClass::Storage { .. } => {
                        self.put_expression(ctx, image)?;
                        write!(self.out, "[")?;
                        self.put_expression(ctx, coordinate)?;
                        write!(self.out, "]")?;
                    }
                    ImageClass::Sampled { multi: true, .. }
                    | ImageClass::Depth { multi: true } => {
                        self.put_expression(ctx, image)?;
                        write!(self.out, ".Load(")?;
                        self.put_load_coordinate(ctx, coordinate, array_index, None)?;
                        if let Some(sample) = sample {
                            write!(self.out, ", int(")?;
                            self.put_expression(ctx, sample)?;
                            write!(self.out, ")")?;
                        }
                        write!(self.out, ")")?;
                    }
                    _ => {
                        self.put_expression(ctx, image)?;
                        write!(self.out, ".Load(")?;
                        self.put_load_coordinate(ctx, coordinate, array_index, level)?;
                        write!(self.out, ")")?;
                    }
                }
            }
            Expression::ImageQuery { image, query } => {
                use wgslc_core::ImageQuery as Iq;
                let global = match ctx.fun.expressions[image] {
                    Expression::GlobalVariable(global) => global,
                    _ => {
                        return Err(Error::FeatureNotImplemented(
                            "querying an image that is not a global",
                        ))
                    }
                };
                let name = self.names[&NameKey::GlobalVariable(global)].clone();
                let dim = match *ctx.inner_of(self.module, image) {
                    TypeInner::Image { dim, .. } => dim,
                    _ => return Err(Error::Validation("image query of a non-image")),
                };
                match query {
                    Iq::Size { level } => {
                        write!(self.out, "_wgsl_dims_{}(", name)?;
                        match level {
                            Some(level) => {
                                self.put_expression(ctx, level)?;
                            }
                            None => write!(self.out, "0u")?,
                        }
                        let swizzle = match dim {
                            ImageDimension::D1 => ".x",
                            ImageDimension::D2 | ImageDimension::Cube => ".xy",
                            ImageDimension::D3 => ".xyz",
                        };
                        write!(self.out, "){}", swizzle)?;
                    }
                    Iq::NumLevels | Iq::NumSamples => {
                        write!(self.out, "_wgsl_dims_{}(0u).w", name)?;
                    }
                    Iq::NumLayers => {
                        write!(self.out, "_wgsl_dims_{}(0u).z", name)?;
                    }
                }
            }
            Expression::ArrayLength(pointer) => {
                let global = match ctx.fun.expressions[pointer] {
                    Expression::GlobalVariable(global) => global,
                    Expression::AccessIndex { base, .. } => match ctx.fun.expressions[base] {
                        Expression::GlobalVariable(global) => global,
                        _ => {
                            return Err(Error::FeatureNotImplemented(
                                "array length of a non-global pointer",
                            ))
                        }
                    },
                    _ => {
                        return Err(Error::FeatureNotImplemented(
                            "array length of a non-global pointer",
                        ))
                    }
                };
                let name = self.names[&NameKey::GlobalVariable(global)].clone();
                write!(self.out, "_wgsl_len_{}()", name)?;
            }
            Expression::CallResult(_) | Expression::AtomicResult { .. } => {
                return Err(Error::Validation(
                    "call or atomic result used before its statement",
                ))
            }
        }
        Ok(())
    }

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
        // Runtime-sized storage arrays print as the raw buffer view, which
        // indexes directly.
        if let Expression::GlobalVariable(global) = ctx.fun.expressions[base] {
            if !self.storage_single[global.index()] {
                let name = self.names[&NameKey::GlobalVariable(global)].clone();
                write!(self.out, "{}", name)?;
                if fixed_array
                    && !matches!(
                        self.module.global_variables[global].space,
                        AddressSpace::Storage { .. }
                    )
                {
                    write!(self.out, ".inner")?;
                }
                return Ok(());
            }
        }
        self.put_expression(ctx, base)?;
        if fixed_array {
            write!(self.out, ".inner")?;
        }
        Ok(())
    }

    fn put_load_coordinate(
        &mut self,
        ctx: &FunCtx,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        level: Option<Handle<Expression>>,
    ) -> Result<(), Error> {
        let base = ctx
            .inner_of(self.module, coordinate)
            .vector_size()
            .map_or(1, |size| size as u8);
        let total = base + array_index.is_some() as u8 + level.is_some() as u8;
        write!(self.out, "int{}(", total)?;
        self.put_expression(ctx, coordinate)?;
        if let Some(array_index) = array_index {
            write!(self.out, ", ")?;
            self.put_expression(ctx, array_index)?;
        }
        match level {
            Some(level) => {
                write!(self.out, ", ")?;
                self.put_expression(ctx, level)?;
            }
            None if array_index.is_none() => {
                // Sampled loads always carry a mip operand.
                write!(self.out, ", 0")?;
            }
            None => write!(self.out, ", 0")?,
        }
        write!(self.out, ")")?;
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
        match fun {
            Mf::Modf | Mf::Frexp => {
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
            Mf::ExtractBits => {
                write!(self.out, "_wgsl_extract_bits(")?;
            }
            Mf::InsertBits => {
                write!(self.out, "_wgsl_insert_bits(")?;
            }
            _ => {
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
                    Mf::Atan2 => "atan2",
                    Mf::Ceil => "ceil",
                    Mf::Floor => "floor",
                    Mf::Round => "round",
                    Mf::Fract => "frac",
                    Mf::Trunc => "trunc",
                    Mf::Ldexp => "ldexp",
                    Mf::Exp => "exp",
                    Mf::Exp2 => "exp2",
                    Mf::Log => "log",
                    Mf::Log2 => "log2",
                    Mf::Pow => "pow",
                    Mf::Sqrt => "sqrt",
                    Mf::InverseSqrt => "rsqrt",
                    Mf::Dot => "dot",
                    Mf::Cross => "cross",
                    Mf::Distance => "distance",
                    Mf::Length => "length",
                    Mf::Normalize => "normalize",
                    Mf::FaceForward => "faceforward",
                    Mf::Reflect => "reflect",
                    Mf::Refract => "refract",
                    Mf::Sign => "sign",
                    Mf::Fma => "mad",
                    Mf::Mix => "lerp",
                    Mf::Step => "step",
                    Mf::SmoothStep => "smoothstep",
                    Mf::Transpose => "transpose",
                    Mf::Determinant => "determinant",
                    Mf::CountOneBits => "countbits",
                    Mf::ReverseBits => "reversebits",
                    Mf::FirstTrailingBit => "firstbitlow",
                    Mf::FirstLeadingBit => "firstbithigh",
                    Mf::Modf | Mf::Frexp | Mf::ExtractBits | Mf::InsertBits => unreachable!(),
                };
                write!(self.out, "{}(", name)?;
            }
        }
        self.put_expression(ctx, arg)?;
        for extra in [arg1, arg2, arg3].into_iter().flatten() {
            write!(self.out, ", ")?;
            self.put_expression(ctx, extra)?;
        }
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
        let method: String = if let Some(component) = gather {
            let channel = match component.letter() {
                'x' => "Red",
                'y' => "Green",
                'z' => "Blue",
                _ => "Alpha",
            };
            format!("Gather{}", channel)
        } else if depth_ref.is_some() {
            match level {
                SampleLevel::Zero => "SampleCmpLevelZero".to_string(),
                _ => "SampleCmp".to_string(),
            }
        } else {
            match level {
                SampleLevel::Auto => "Sample".to_string(),
                SampleLevel::Zero | SampleLevel::Exact(_) => "SampleLevel".to_string(),
                SampleLevel::Bias(_) => "SampleBias".to_string(),
                SampleLevel::Gradient { .. } => "SampleGrad".to_string(),
            }
        };
        write!(self.out, ".{}(", method)?;
        self.put_expression(ctx, sampler)?;
        write!(self.out, ", ")?;
        // Coordinates fold the array layer in.
        match array_index {
            Some(array_index) => {
                let base = ctx
                    .inner_of(self.module, coordinate)
                    .vector_size()
                    .map_or(1, |size| size as u8);
                write!(self.out, "float{}(", base + 1)?;
                self.put_expression(ctx, coordinate)?;
                write!(self.out, ", float(")?;
                self.put_expression(ctx, array_index)?;
                write!(self.out, "))")?;
            }
            None => self.put_expression(ctx, coordinate)?,
        }
        if let Some(depth_ref) = depth_ref {
            write!(self.out, ", ")?;
            self.put_expression(ctx, depth_ref)?;
        }
        match level {
            SampleLevel::Exact(expr) => {
                write!(self.out, ", ")?;
                self.put_expression(ctx, expr)?;
            }
            SampleLevel::Zero if depth_ref.is_none() => write!(self.out, ", 0.0")?,
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
            _ => {}
        }
        if let Some(offset) = offset {
            let text = self.constant_text(offset)?;
            write!(self.out, ", {}", text)?;
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
                    let named = ctx.fun.named_expressions.get(&handle).cloned();
                    // Struct and array composes need declaration syntax, so
                    // they bake here even without a name.
                    let compose_braces = match ctx.fun.expressions[handle] {
                        Expression::Compose { ty, .. } => matches!(
                            self.module.types[ty].inner,
                            TypeInner::Struct { .. } | TypeInner::Array { .. }
                        ),
                        _ => false,
                    };
                    if named.is_none() && !compose_braces {
                        continue;
                    }
                    if ctx.inner_of(self.module, handle).is_pointer() {
                        continue;
                    }
                    let type_name =
                        self.resolution_type_name(&ctx.fun.expr_types[handle.index()])?;
                    let unique = match named {
                        Some(name) => self.namer.call(&name),
                        None => {
                            self.temp_counter += 1;
                            self.namer.call(&format!("_e{}", self.temp_counter))
                        }
                    };
                    if compose_braces {
                        let components = match ctx.fun.expressions[handle] {
                            Expression::Compose { ref components, .. } => components.clone(),
                            _ => unreachable!(),
                        };
                        write!(self.out, "{}{} {} = {{ ", level, type_name, unique)?;
                        for (index, &component) in components.iter().enumerate() {
                            if index != 0 {
                                write!(self.out, ", ")?;
                            }
                            self.put_expression(ctx, component)?;
                        }
                        writeln!(self.out, " }};")?;
                    } else {
                        write!(self.out, "{}{} {} = ", level, type_name, unique)?;
                        self.put_expression_value(ctx, handle)?;
                        writeln!(self.out, ";")?;
                    }
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
                writeln!(self.out, "{}[loop] while(true) {{", level)?;
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
                write!(self.out, "{}", level)?;
                self.put_expression(ctx, image)?;
                write!(self.out, "[")?;
                match array_index {
                    Some(array_index) => {
                        let base = ctx
                            .inner_of(self.module, coordinate)
                            .vector_size()
                            .map_or(1, |size| size as u8);
                        write!(self.out, "uint{}(", base + 1)?;
                        self.put_expression(ctx, coordinate)?;
                        write!(self.out, ", ")?;
                        self.put_expression(ctx, array_index)?;
                        write!(self.out, ")")?;
                    }
                    None => self.put_expression(ctx, coordinate)?,
                }
                write!(self.out, "] = ")?;
                self.put_expression(ctx, value)?;
                writeln!(self.out, ";")?;
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
                writeln!(
                    self.out,
                    "{}{} {} = ({})0;",
                    level, type_name, result_name, type_name
                )?;
                match *fun {
                    AtomicFunction::Exchange {
                        compare: Some(compare),
                    } => {
                        write!(self.out, "{}InterlockedCompareExchange(", level)?;
                        self.put_expression(ctx, pointer)?;
                        write!(self.out, ", ")?;
                        self.put_expression(ctx, compare)?;
                        write!(self.out, ", ")?;
                        self.put_expression(ctx, value)?;
                        writeln!(self.out, ", {});", result_name)?;
                    }
                    _ => {
                        let (intrinsic, negate) = match *fun {
                            AtomicFunction::Add => ("InterlockedAdd", false),
                            AtomicFunction::Subtract => ("InterlockedAdd", true),
                            AtomicFunction::And => ("InterlockedAnd", false),
                            AtomicFunction::ExclusiveOr => ("InterlockedXor", false),
                            AtomicFunction::InclusiveOr => ("InterlockedOr", false),
                            AtomicFunction::Min => ("InterlockedMin", false),
                            AtomicFunction::Max => ("InterlockedMax", false),
                            AtomicFunction::Exchange { .. } => ("InterlockedExchange", false),
                        };
                        write!(self.out, "{}{}(", level, intrinsic)?;
                        self.put_expression(ctx, pointer)?;
                        write!(self.out, ", ")?;
                        if negate {
                            write!(self.out, "-(")?;
                            self.put_expression(ctx, value)?;
                            write!(self.out, ")")?;
                        } else {
                            self.put_expression(ctx, value)?;
                        }
                        writeln!(self.out, ", {});", result_name)?;
                    }
                }
                self.baked.insert(result, result_name);
            }
            Statement::Barrier(barrier) => {
                if barrier.contains(Barrier::STORAGE) || barrier.contains(Barrier::TEXTURE) {
                    writeln!(self.out, "{}DeviceMemoryBarrierWithGroupSync();", level)?;
                }
                if barrier.contains(Barrier::WORK_GROUP) {
                    writeln!(self.out, "{}GroupMemoryBarrierWithGroupSync();", level)?;
                }
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
                writeln!(self.out, "{}GroupMemoryBarrierWithGroupSync();", level)?;
                let name = self.namer.call("_e");
                let type_name =
                    self.resolution_type_name(&ctx.fun.expr_types[result.index()])?;
                write!(self.out, "{}{} {} = ", level, type_name, name)?;
                self.put_expression(ctx, pointer)?;
                writeln!(self.out, ";")?;
                writeln!(self.out, "{}GroupMemoryBarrierWithGroupSync();", level)?;
                self.baked.insert(result, name);
            }
            Statement::RayQuery { .. } => {
                return Err(Error::FeatureNotImplemented("ray queries"))
            }
        }
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

        // Flattened inputs: name, type, binding.
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

        // Output struct with semantics.
        let output_struct_name = format!("{}_Output", ep_name);
        let mut outputs: Vec<(String, Handle<Type>, Binding, Option<u32>)> = Vec::new();
        if let Some(ref result) = fun.result {
            match result.binding {
                Some(ref binding) => {
                    outputs.push((self.namer.call("member"), result.ty, binding.clone(), None))
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
                let semantic = semantic_text(binding, ep.stage, true)?;
                writeln!(
                    self.out,
                    "{}{} {} : {};",
                    Level(1),
                    self.type_name(*ty)?,
                    name,
                    semantic
                )?;
            }
            writeln!(self.out, "}};")?;
        }

        // Signature: every flattened input becomes a parameter with its
        // semantic attached.
        let mut params = Vec::new();
        for (name, ty, binding) in flattened.iter().flatten() {
            let semantic = semantic_text(binding, ep.stage, false)?;
            params.push(format!("{} {} : {}", self.type_name(*ty)?, name, semantic));
        }
        if ep.stage == ShaderStage::Compute {
            writeln!(
                self.out,
                "[numthreads({}, {}, {})]",
                ep.workgroup_size[0], ep.workgroup_size[1], ep.workgroup_size[2]
            )?;
        }
        let return_name = if outputs.is_empty() {
            "void".to_string()
        } else {
            output_struct_name.clone()
        };
        writeln!(
            self.out,
            "{} {}({}) {{",
            return_name,
            ep_name,
            params.join(", ")
        )?;
        let level = Level(1);

        // Recompose IR arguments.
        let mut call_args = Vec::new();
        for (arg_index, (argument, parts)) in
            fun.arguments.iter().zip(&flattened).enumerate()
        {
            if argument.binding.is_some() {
                call_args.push(parts[0].0.clone());
            } else {
                let arg_name = self.names
                    [&NameKey::FunctionArgument(ep.function, arg_index as u32)]
                    .clone();
                let type_name = self.type_name(argument.ty)?;
                let members: Vec<String> =
                    parts.iter().map(|(name, _, _)| name.clone()).collect();
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

        let inner_name = self.names[&NameKey::Function(ep.function)].clone();
        if outputs.is_empty() {
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
            writeln!(
                self.out,
                "{}{} _output = ({})0;",
                level, output_struct_name, output_struct_name
            )?;
            for (name, _, _, member_index) in &outputs {
                match *member_index {
                    Some(member_index) => {
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

// ----------------------------------------------------------------------
// Free helpers

fn semantic_text(
    binding: &Binding,
    stage: ShaderStage,
    output: bool,
) -> Result<String, Error> {
    Ok(match *binding {
        Binding::Location { location, .. } => {
            if output && stage == ShaderStage::Fragment {
                format!("SV_Target{}", location)
            } else {
                format!("TEXCOORD{}", location)
            }
        }
        Binding::BuiltIn(builtin) => match builtin {
            BuiltIn::Position => "SV_Position".to_string(),
            BuiltIn::VertexIndex => "SV_VertexID".to_string(),
            BuiltIn::InstanceIndex => "SV_InstanceID".to_string(),
            BuiltIn::FragDepth => "SV_Depth".to_string(),
            BuiltIn::FrontFacing => "SV_IsFrontFace".to_string(),
            BuiltIn::SampleIndex => "SV_SampleIndex".to_string(),
            BuiltIn::SampleMask => "SV_Coverage".to_string(),
            BuiltIn::GlobalInvocationId => "SV_DispatchThreadID".to_string(),
            BuiltIn::LocalInvocationId => "SV_GroupThreadID".to_string(),
            BuiltIn::LocalInvocationIndex => "SV_GroupIndex".to_string(),
            BuiltIn::WorkGroupId => "SV_GroupID".to_string(),
            BuiltIn::NumWorkGroups => {
                return Err(Error::FeatureNotImplemented(
                    "the workgroup count builtin",
                ))
            }
        },
    })
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
