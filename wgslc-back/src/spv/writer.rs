//! The SPIR-V module writer.

use fnv::{FnvHashMap, FnvHashSet};
use ordered_float::OrderedFloat;
use spirv::{Op, Word};

use wgslc_core::{
    AddressSpace, ArraySize, AtomicFunction, Barrier, Binding, BuiltIn, Bytes, ConstantInner,
    Expression, Function as IrFunction, Handle, ImageClass, ImageDimension, Literal,
    MathFunction, Module, RelationalFunction, SampleLevel, Scalar, ScalarKind, ScalarValue,
    ShaderStage, Statement, StorageFormat, SwitchValue, Type, TypeInner, TypeResolution,
    UnaryOperator, VectorSize,
};

use super::{Block, Error, IdGenerator, Instruction, LogicalLayout, Options, PhysicalLayout, WriterFlags};

/// A type synthesized during writing that has no handle in the module's
/// arena. Scalars, vectors and pointers to them are reached through this
/// form so that IR-registered and synthesized types share one SPIR-V id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum LocalType {
    Void,
    Value {
        vector_size: Option<VectorSize>,
        scalar: Scalar,
        pointer_space: Option<spirv::StorageClass>,
    },
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    Pointer {
        base: Handle<Type>,
        class: spirv::StorageClass,
    },
    SampledImage {
        image_type_id: Word,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum LookupType {
    Handle(Handle<Type>),
    Local(LocalType),
}

impl From<LocalType> for LookupType {
    fn from(local: LocalType) -> Self {
        LookupType::Local(local)
    }
}

/// Try to express a registered type in `LocalType` form, so structurally
/// equal synthesized types reuse its id.
fn make_local(inner: &TypeInner, version: (u8, u8)) -> Option<LocalType> {
    Some(match *inner {
        TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => LocalType::Value {
            vector_size: None,
            scalar,
            pointer_space: None,
        },
        TypeInner::Vector { size, scalar } => LocalType::Value {
            vector_size: Some(size),
            scalar,
            pointer_space: None,
        },
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => LocalType::Matrix {
            columns,
            rows,
            scalar,
        },
        TypeInner::Pointer { base, space } => LocalType::Pointer {
            base,
            class: map_storage_class(space, version),
        },
        TypeInner::ValuePointer {
            size,
            scalar,
            space,
        } => LocalType::Value {
            vector_size: size,
            scalar,
            pointer_space: Some(map_storage_class(space, version)),
        },
        _ => return None,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LookupFunctionType {
    parameter_type_ids: Vec<Word>,
    return_type_id: Word,
}

/// Hashable key for scalar constant deduplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ScalarConstantKey {
    Sint(i64),
    Uint(u64),
    Float(OrderedFloat<f64>),
    Bool(bool),
}

struct GlobalInfo {
    var_id: Word,
    /// Whether the variable's content type got wrapped in a synthesized
    /// block struct, adding one level of access indirection.
    wrapped: bool,
    class: spirv::StorageClass,
}

/// Per-function writing state.
struct FunctionContext<'a> {
    module: &'a Module,
    fun: &'a IrFunction,
    /// SPIR-V id per expression; zero marks "not yet written".
    cached: Vec<Word>,
    parameter_ids: Vec<Word>,
    local_ids: Vec<Word>,
    /// `OpVariable`s collected for the function's entry block.
    variables: Vec<Instruction>,
    blocks: Vec<Block>,
    current: Block,
}

impl<'a> FunctionContext<'a> {
    /// Seal the current block with `termination` and open the block
    /// labelled `next`.
    fn consume(&mut self, termination: Instruction, next: Word) {
        self.finish(termination);
        self.open(next);
    }

    /// Seal the current block without opening a successor.
    fn finish(&mut self, termination: Instruction) {
        let mut block = std::mem::replace(&mut self.current, Block::new(0));
        block.termination = Some(termination);
        self.blocks.push(block);
    }

    fn open(&mut self, label: Word) {
        self.current = Block::new(label);
    }

    fn resolution(&self, handle: Handle<Expression>) -> &'a TypeResolution {
        &self.fun.expr_types[handle.index()]
    }

    fn inner_of(&self, handle: Handle<Expression>) -> &'a TypeInner {
        self.resolution(handle).inner_with(&self.module.types)
    }
}

/// Loop / switch exit labels live while writing nested statements.
#[derive(Clone, Copy, Default)]
struct Exits {
    break_label: Option<Word>,
    continue_label: Option<Word>,
}

pub(super) struct Writer {
    physical_layout: PhysicalLayout,
    logical_layout: LogicalLayout,
    id_gen: IdGenerator,
    version: (u8, u8),
    flags: WriterFlags,
    capabilities: Vec<spirv::Capability>,
    debugs: Vec<Instruction>,
    annotations: Vec<Instruction>,
    lookup_type: FnvHashMap<LookupType, Word>,
    lookup_function: FnvHashMap<Handle<IrFunction>, Word>,
    lookup_function_type: FnvHashMap<LookupFunctionType, Word>,
    constant_ids: Vec<Word>,
    cached_constants: FnvHashMap<(ScalarConstantKey, Bytes), Word>,
    cached_composites: FnvHashMap<(Word, Vec<Word>), Word>,
    null_constants: FnvHashMap<Word, Word>,
    decorated_block_types: FnvHashSet<Word>,
    globals: Vec<GlobalInfo>,
    gl450_ext_inst_id: Word,
}

impl Writer {
    pub(super) fn new(options: &Options) -> Result<Self, Error> {
        let (major, minor) = options.lang_version;
        if major != 1 || minor > 6 {
            return Err(Error::UnsupportedVersion(major, minor));
        }
        Ok(Writer {
            physical_layout: PhysicalLayout::new(options.lang_version),
            logical_layout: LogicalLayout::default(),
            id_gen: IdGenerator::default(),
            version: options.lang_version,
            flags: options.flags,
            capabilities: Vec::new(),
            debugs: Vec::new(),
            annotations: Vec::new(),
            lookup_type: FnvHashMap::default(),
            lookup_function: FnvHashMap::default(),
            lookup_function_type: FnvHashMap::default(),
            constant_ids: Vec::new(),
            cached_constants: FnvHashMap::default(),
            cached_composites: FnvHashMap::default(),
            null_constants: FnvHashMap::default(),
            decorated_block_types: FnvHashSet::default(),
            globals: Vec::new(),
            gl450_ext_inst_id: 0,
        })
    }

    fn require_capability(&mut self, capability: spirv::Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    pub(super) fn write(&mut self, module: &Module, words: &mut Vec<Word>) -> Result<(), Error> {
        self.require_capability(spirv::Capability::Shader);
        self.gl450_ext_inst_id = self.id_gen.next();
        Instruction::ext_inst_import(self.gl450_ext_inst_id, "GLSL.std.450")
            .to_words(&mut self.logical_layout.ext_inst_imports);
        Instruction::memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450)
            .to_words(&mut self.logical_layout.memory_model);
        if self.flags.contains(WriterFlags::DEBUG) {
            self.debugs
                .push(Instruction::source(spirv::SourceLanguage::Unknown, 0));
        }

        for (_, constant) in module.constants.iter() {
            let id = self.write_constant(module, constant)?;
            self.constant_ids.push(id);
        }
        for (_, var) in module.global_variables.iter() {
            let info = self.write_global_variable(module, var)?;
            self.globals.push(info);
        }
        // Pre-assign every function id so call sites can reference functions
        // written later.
        for (handle, _) in module.functions.iter() {
            let id = self.id_gen.next();
            self.lookup_function.insert(handle, id);
        }
        for (handle, fun) in module.functions.iter() {
            self.write_function(module, handle, fun)?;
        }
        for ep in &module.entry_points {
            self.write_entry_point(module, ep)?;
        }

        self.physical_layout.bound = self.id_gen.0 + 1;
        self.physical_layout.in_words(words);
        for &capability in &self.capabilities {
            Instruction::capability(capability).to_words(&mut self.logical_layout.capabilities);
        }
        for instruction in &self.debugs {
            instruction.to_words(&mut self.logical_layout.debugs);
        }
        for instruction in &self.annotations {
            instruction.to_words(&mut self.logical_layout.annotations);
        }
        self.logical_layout.in_words(words);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Types

    fn get_type_id(&mut self, module: &Module, lookup: LookupType) -> Result<Word, Error> {
        if let Some(&id) = self.lookup_type.get(&lookup) {
            return Ok(id);
        }
        let id = match lookup {
            LookupType::Handle(handle) => {
                match make_local(&module.types[handle].inner, self.version) {
                    Some(local) => {
                        let id = self.get_type_id(module, LookupType::Local(local))?;
                        self.lookup_type.insert(lookup, id);
                        return Ok(id);
                    }
                    None => self.write_type_declaration(module, handle)?,
                }
            }
            LookupType::Local(local) => self.write_local_type(module, local)?,
        };
        self.lookup_type.insert(lookup, id);
        Ok(id)
    }

    fn scalar_type_id(&mut self, module: &Module, scalar: Scalar) -> Result<Word, Error> {
        self.get_type_id(
            module,
            LocalType::Value {
                vector_size: None,
                scalar,
                pointer_space: None,
            }
            .into(),
        )
    }

    fn write_local_type(&mut self, module: &Module, local: LocalType) -> Result<Word, Error> {
        let instruction = match local {
            LocalType::Void => {
                let id = self.id_gen.next();
                Instruction::type_void(id)
            }
            LocalType::Value {
                vector_size: None,
                scalar,
                pointer_space: None,
            } => {
                let id = self.id_gen.next();
                self.scalar_capabilities(scalar);
                match scalar.kind {
                    ScalarKind::Bool => Instruction::type_bool(id),
                    ScalarKind::Float => Instruction::type_float(id, scalar.width as Word * 8),
                    ScalarKind::Sint => Instruction::type_int(id, scalar.width as Word * 8, true),
                    ScalarKind::Uint => Instruction::type_int(id, scalar.width as Word * 8, false),
                }
            }
            LocalType::Value {
                vector_size: Some(size),
                scalar,
                pointer_space: None,
            } => {
                let scalar_id = self.scalar_type_id(module, scalar)?;
                let id = self.id_gen.next();
                Instruction::type_vector(id, scalar_id, size as Word)
            }
            LocalType::Value {
                vector_size,
                scalar,
                pointer_space: Some(class),
            } => {
                let base_id = self.get_type_id(
                    module,
                    LocalType::Value {
                        vector_size,
                        scalar,
                        pointer_space: None,
                    }
                    .into(),
                )?;
                let id = self.id_gen.next();
                Instruction::type_pointer(id, class, base_id)
            }
            LocalType::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column_id = self.get_type_id(
                    module,
                    LocalType::Value {
                        vector_size: Some(rows),
                        scalar,
                        pointer_space: None,
                    }
                    .into(),
                )?;
                let id = self.id_gen.next();
                Instruction::type_matrix(id, column_id, columns as Word)
            }
            LocalType::Pointer { base, class } => {
                let base_id = self.get_type_id(module, LookupType::Handle(base))?;
                let id = self.id_gen.next();
                Instruction::type_pointer(id, class, base_id)
            }
            LocalType::SampledImage { image_type_id } => {
                let id = self.id_gen.next();
                Instruction::type_sampled_image(id, image_type_id)
            }
        };
        let id = instruction.result_id.unwrap();
        instruction.to_words(&mut self.logical_layout.declarations);
        Ok(id)
    }

    fn write_type_declaration(
        &mut self,
        module: &Module,
        handle: Handle<Type>,
    ) -> Result<Word, Error> {
        let ty = &module.types[handle];
        match ty.inner {
            TypeInner::Array { base, size, stride } => {
                let base_id = self.get_type_id(module, LookupType::Handle(base))?;
                let instruction = match size {
                    ArraySize::Constant(count) => {
                        let length_id =
                            self.get_constant_scalar(module, ScalarValue::Uint(count.get() as u64), 4)?;
                        let id = self.id_gen.next();
                        Instruction::type_array(id, base_id, length_id)
                    }
                    ArraySize::Dynamic => {
                        let id = self.id_gen.next();
                        Instruction::type_runtime_array(id, base_id)
                    }
                };
                let id = instruction.result_id.unwrap();
                instruction.to_words(&mut self.logical_layout.declarations);
                self.annotations.push(Instruction::decorate(
                    id,
                    spirv::Decoration::ArrayStride,
                    &[stride],
                ));
                Ok(id)
            }
            TypeInner::Struct { ref members, .. } => {
                let mut member_ids = Vec::with_capacity(members.len());
                for member in members {
                    member_ids.push(self.get_type_id(module, LookupType::Handle(member.ty))?);
                }
                let id = self.id_gen.next();
                Instruction::type_struct(id, &member_ids)
                    .to_words(&mut self.logical_layout.declarations);
                if self.flags.contains(WriterFlags::DEBUG) {
                    if let Some(ref name) = ty.name {
                        self.debugs.push(Instruction::name(id, name));
                    }
                }
                for (index, member) in members.iter().enumerate() {
                    self.annotations.push(Instruction::member_decorate(
                        id,
                        index as Word,
                        spirv::Decoration::Offset,
                        &[member.offset],
                    ));
                    if self.flags.contains(WriterFlags::DEBUG) {
                        if let Some(ref name) = member.name {
                            self.debugs
                                .push(Instruction::member_name(id, index as Word, name));
                        }
                    }
                    if let TypeInner::Matrix { rows, scalar, .. } =
                        module.types[member.ty].inner
                    {
                        let stride = matrix_column_stride(rows, scalar);
                        self.annotations.push(Instruction::member_decorate(
                            id,
                            index as Word,
                            spirv::Decoration::ColMajor,
                            &[],
                        ));
                        self.annotations.push(Instruction::member_decorate(
                            id,
                            index as Word,
                            spirv::Decoration::MatrixStride,
                            &[stride],
                        ));
                    }
                }
                Ok(id)
            }
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => {
                if dim == ImageDimension::D1 {
                    self.require_capability(spirv::Capability::Sampled1D);
                }
                let sample_scalar = match class {
                    ImageClass::Sampled { kind, .. } => Scalar { kind, width: 4 },
                    ImageClass::Depth { .. } => Scalar::F32,
                    ImageClass::Storage { format, .. } => Scalar {
                        kind: format.scalar_kind(),
                        width: 4,
                    },
                };
                let sampled_type_id = self.scalar_type_id(module, sample_scalar)?;
                let (depth, multi, sampled, format) = match class {
                    ImageClass::Sampled { multi, .. } => {
                        (0, multi, 1, spirv::ImageFormat::Unknown)
                    }
                    ImageClass::Depth { multi } => (1, multi, 1, spirv::ImageFormat::Unknown),
                    ImageClass::Storage { format, .. } => {
                        (0, false, 2, map_image_format(format))
                    }
                };
                let id = self.id_gen.next();
                Instruction::type_image(
                    id,
                    sampled_type_id,
                    map_dim(dim),
                    depth,
                    arrayed,
                    multi,
                    sampled,
                    format,
                )
                .to_words(&mut self.logical_layout.declarations);
                Ok(id)
            }
            TypeInner::Sampler { .. } => {
                let id = self.id_gen.next();
                Instruction::type_sampler(id).to_words(&mut self.logical_layout.declarations);
                Ok(id)
            }
            // Everything else has a `LocalType` form.
            _ => Err(Error::UnexpectedType(handle)),
        }
    }

    fn scalar_capabilities(&mut self, scalar: Scalar) {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Float, 2) => self.require_capability(spirv::Capability::Float16),
            (ScalarKind::Float, 8) => self.require_capability(spirv::Capability::Float64),
            (ScalarKind::Sint | ScalarKind::Uint, 8) => {
                self.require_capability(spirv::Capability::Int64)
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Constants

    fn get_constant_scalar(
        &mut self,
        module: &Module,
        value: ScalarValue,
        width: Bytes,
    ) -> Result<Word, Error> {
        let key = match value {
            ScalarValue::Sint(v) => ScalarConstantKey::Sint(v),
            ScalarValue::Uint(v) => ScalarConstantKey::Uint(v),
            ScalarValue::Float(v) => ScalarConstantKey::Float(OrderedFloat(v)),
            ScalarValue::Bool(v) => ScalarConstantKey::Bool(v),
        };
        if let Some(&id) = self.cached_constants.get(&(key, width)) {
            return Ok(id);
        }
        let scalar = Scalar {
            kind: match value {
                ScalarValue::Sint(_) => ScalarKind::Sint,
                ScalarValue::Uint(_) => ScalarKind::Uint,
                ScalarValue::Float(_) => ScalarKind::Float,
                ScalarValue::Bool(_) => ScalarKind::Bool,
            },
            width,
        };
        let type_id = self.scalar_type_id(module, scalar)?;
        let id = self.id_gen.next();
        let instruction = match value {
            ScalarValue::Bool(true) => Instruction::constant_true(type_id, id),
            ScalarValue::Bool(false) => Instruction::constant_false(type_id, id),
            ScalarValue::Sint(v) => match width {
                8 => {
                    let bits = v as u64;
                    Instruction::constant(type_id, id, &[bits as Word, (bits >> 32) as Word])
                }
                _ => Instruction::constant(type_id, id, &[v as i32 as u32]),
            },
            ScalarValue::Uint(v) => match width {
                8 => Instruction::constant(type_id, id, &[v as Word, (v >> 32) as Word]),
                _ => Instruction::constant(type_id, id, &[v as u32]),
            },
            ScalarValue::Float(v) => match width {
                8 => {
                    let bits = v.to_bits();
                    Instruction::constant(type_id, id, &[bits as Word, (bits >> 32) as Word])
                }
                2 => {
                    let half = half::f16::from_f64(v);
                    Instruction::constant(type_id, id, &[half.to_bits() as Word])
                }
                _ => Instruction::constant(type_id, id, &[(v as f32).to_bits()]),
            },
        };
        instruction.to_words(&mut self.logical_layout.declarations);
        self.cached_constants.insert((key, width), id);
        Ok(id)
    }

    fn get_literal_id(&mut self, module: &Module, literal: Literal) -> Result<Word, Error> {
        let value = match literal {
            Literal::F32(v) => ScalarValue::Float(v as f64),
            Literal::I32(v) => ScalarValue::Sint(v as i64),
            Literal::U32(v) => ScalarValue::Uint(v as u64),
            Literal::Bool(v) => ScalarValue::Bool(v),
        };
        self.get_constant_scalar(module, value, 4)
    }

    fn get_index_constant(&mut self, module: &Module, index: u32) -> Result<Word, Error> {
        self.get_constant_scalar(module, ScalarValue::Uint(index as u64), 4)
    }

    fn get_null_constant(&mut self, module: &Module, type_id: Word) -> Result<Word, Error> {
        if let Some(&id) = self.null_constants.get(&type_id) {
            return Ok(id);
        }
        let id = self.id_gen.next();
        Instruction::constant_null(type_id, id).to_words(&mut self.logical_layout.declarations);
        self.null_constants.insert(type_id, id);
        Ok(id)
    }

    fn get_composite_constant(
        &mut self,
        type_id: Word,
        component_ids: Vec<Word>,
    ) -> Word {
        if let Some(&id) = self.cached_composites.get(&(type_id, component_ids.clone())) {
            return id;
        }
        let id = self.id_gen.next();
        Instruction::constant_composite(type_id, id, &component_ids)
            .to_words(&mut self.logical_layout.declarations);
        self.cached_composites.insert((type_id, component_ids), id);
        id
    }

    fn write_constant(
        &mut self,
        module: &Module,
        constant: &wgslc_core::Constant,
    ) -> Result<Word, Error> {
        match constant.inner {
            ConstantInner::Scalar { width, value } => {
                self.get_constant_scalar(module, value, width)
            }
            ConstantInner::Composite { ty, ref components } => {
                let type_id = self.get_type_id(module, LookupType::Handle(ty))?;
                let component_ids = components
                    .iter()
                    .map(|&component| self.constant_ids[component.index()])
                    .collect();
                Ok(self.get_composite_constant(type_id, component_ids))
            }
        }
    }

    /// Fold an expression tree of literals, constants and composes into a
    /// module-scope constant, if possible.
    fn write_constant_expr(
        &mut self,
        ctx: &FunctionContext,
        handle: Handle<Expression>,
    ) -> Result<Option<Word>, Error> {
        Ok(match ctx.fun.expressions[handle] {
            Expression::Literal(literal) => Some(self.get_literal_id(ctx.module, literal)?),
            Expression::Constant(constant) => Some(self.constant_ids[constant.index()]),
            Expression::ZeroValue(ty) => {
                let type_id = self.get_type_id(ctx.module, LookupType::Handle(ty))?;
                Some(self.get_null_constant(ctx.module, type_id)?)
            }
            Expression::Compose { ty, ref components } => {
                let mut ids = Vec::with_capacity(components.len());
                for &component in components {
                    match self.write_constant_expr(ctx, component)? {
                        Some(id) => ids.push(id),
                        None => return Ok(None),
                    }
                }
                let type_id = self.get_type_id(ctx.module, LookupType::Handle(ty))?;
                Some(self.get_composite_constant(type_id, ids))
            }
            Expression::Splat { size, value } => {
                match self.write_constant_expr(ctx, value)? {
                    Some(id) => {
                        let type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                        Some(self.get_composite_constant(type_id, vec![id; size as usize]))
                    }
                    None => None,
                }
            }
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // Globals

    fn write_global_variable(
        &mut self,
        module: &Module,
        var: &wgslc_core::GlobalVariable,
    ) -> Result<GlobalInfo, Error> {
        let class = map_storage_class(var.space, self.version);
        let is_buffer = matches!(
            var.space,
            AddressSpace::Uniform | AddressSpace::Storage { .. } | AddressSpace::PushConstant
        );
        let inner = &module.types[var.ty].inner;
        let wrapped = is_buffer && !inner.is_struct();
        let block_decoration = self.block_decoration(var.space);

        let content_type_id = if wrapped {
            // Buffer variables must be block structs; wrap loose types in a
            // single-member struct.
            let member_id = self.get_type_id(module, LookupType::Handle(var.ty))?;
            let struct_id = self.id_gen.next();
            Instruction::type_struct(struct_id, &[member_id])
                .to_words(&mut self.logical_layout.declarations);
            self.annotations.push(Instruction::member_decorate(
                struct_id,
                0,
                spirv::Decoration::Offset,
                &[0],
            ));
            self.annotations.push(Instruction::decorate(
                struct_id,
                block_decoration,
                &[],
            ));
            struct_id
        } else {
            let id = self.get_type_id(module, LookupType::Handle(var.ty))?;
            if is_buffer && self.decorated_block_types.insert(id) {
                self.annotations
                    .push(Instruction::decorate(id, block_decoration, &[]));
            }
            id
        };

        let pointer_type_id = self.id_gen.next();
        Instruction::type_pointer(pointer_type_id, class, content_type_id)
            .to_words(&mut self.logical_layout.declarations);
        let init_id = var.init.map(|init| self.constant_ids[init.index()]);
        let var_id = self.id_gen.next();
        Instruction::variable(pointer_type_id, var_id, class, init_id)
            .to_words(&mut self.logical_layout.declarations);

        if let Some(binding) = var.binding {
            self.annotations.push(Instruction::decorate(
                var_id,
                spirv::Decoration::DescriptorSet,
                &[binding.group],
            ));
            self.annotations.push(Instruction::decorate(
                var_id,
                spirv::Decoration::Binding,
                &[binding.binding],
            ));
        }
        if self.flags.contains(WriterFlags::DEBUG) {
            if let Some(ref name) = var.name {
                self.debugs.push(Instruction::name(var_id, name));
            }
        }
        Ok(GlobalInfo {
            var_id,
            wrapped,
            class,
        })
    }

    fn block_decoration(&self, space: AddressSpace) -> spirv::Decoration {
        match space {
            AddressSpace::Storage { .. } if self.version < (1, 3) => {
                spirv::Decoration::BufferBlock
            }
            _ => spirv::Decoration::Block,
        }
    }

    // ------------------------------------------------------------------
    // Functions

    fn resolution_type_id(
        &mut self,
        module: &Module,
        resolution: &TypeResolution,
    ) -> Result<Word, Error> {
        match *resolution {
            TypeResolution::Handle(handle) => self.get_type_id(module, LookupType::Handle(handle)),
            TypeResolution::Value(ref inner) => match make_local(inner, self.version) {
                Some(local) => self.get_type_id(module, local.into()),
                None => match module.types.find(inner) {
                    Some(handle) => self.get_type_id(module, LookupType::Handle(handle)),
                    None => Err(Error::Validation("unregistered inline type")),
                },
            },
        }
    }

    fn get_function_type(
        &mut self,
        parameter_type_ids: Vec<Word>,
        return_type_id: Word,
    ) -> Result<Word, Error> {
        let key = LookupFunctionType {
            parameter_type_ids,
            return_type_id,
        };
        if let Some(&id) = self.lookup_function_type.get(&key) {
            return Ok(id);
        }
        let id = self.id_gen.next();
        Instruction::type_function(id, key.return_type_id, &key.parameter_type_ids)
            .to_words(&mut self.logical_layout.declarations);
        self.lookup_function_type.insert(key, id);
        Ok(id)
    }

    fn void_type_id(&mut self, module: &Module) -> Result<Word, Error> {
        self.get_type_id(module, LocalType::Void.into())
    }

    fn write_function(
        &mut self,
        module: &Module,
        handle: Handle<IrFunction>,
        fun: &IrFunction,
    ) -> Result<(), Error> {
        let func_id = self.lookup_function[&handle];
        let return_type_id = match fun.result {
            Some(ref result) => self.get_type_id(module, LookupType::Handle(result.ty))?,
            None => self.void_type_id(module)?,
        };
        let mut parameter_type_ids = Vec::with_capacity(fun.arguments.len());
        for argument in &fun.arguments {
            parameter_type_ids.push(self.get_type_id(module, LookupType::Handle(argument.ty))?);
        }
        let function_type_id =
            self.get_function_type(parameter_type_ids.clone(), return_type_id)?;

        Instruction::function(
            return_type_id,
            func_id,
            spirv::FunctionControl::NONE,
            function_type_id,
        )
        .to_words(&mut self.logical_layout.function_definitions);
        if self.flags.contains(WriterFlags::DEBUG) {
            if let Some(ref name) = fun.name {
                self.debugs.push(Instruction::name(func_id, name));
            }
        }

        let mut parameter_ids = Vec::with_capacity(fun.arguments.len());
        for &type_id in &parameter_type_ids {
            let id = self.id_gen.next();
            Instruction::function_parameter(type_id, id)
                .to_words(&mut self.logical_layout.function_definitions);
            parameter_ids.push(id);
        }

        let entry_label = self.id_gen.next();
        let mut ctx = FunctionContext {
            module,
            fun,
            cached: vec![0; fun.expressions.len()],
            parameter_ids,
            local_ids: Vec::with_capacity(fun.local_variables.len()),
            variables: Vec::new(),
            blocks: Vec::new(),
            current: Block::new(entry_label),
        };

        for (_, var) in fun.local_variables.iter() {
            let pointer_type_id = self.get_type_id(
                module,
                LocalType::Pointer {
                    base: var.ty,
                    class: spirv::StorageClass::Function,
                }
                .into(),
            )?;
            let init_id = match var.init {
                Some(init) => self.write_constant_expr(&ctx, init)?,
                None => None,
            };
            let id = self.id_gen.next();
            ctx.variables.push(Instruction::variable(
                pointer_type_id,
                id,
                spirv::StorageClass::Function,
                init_id,
            ));
            if self.flags.contains(WriterFlags::DEBUG) {
                if let Some(ref name) = var.name {
                    self.debugs.push(Instruction::name(id, name));
                }
            }
            ctx.local_ids.push(id);
        }

        // Name and variable expressions get their ids up front, in the entry
        // block, so every later use is dominated by the definition.
        for (expr_handle, expr) in fun.expressions.iter() {
            match *expr {
                Expression::FunctionArgument(index) => {
                    ctx.cached[expr_handle.index()] = ctx.parameter_ids[index as usize];
                }
                Expression::LocalVariable(local) => {
                    ctx.cached[expr_handle.index()] = ctx.local_ids[local.index()];
                }
                Expression::GlobalVariable(_) => {
                    self.write_expression(&mut ctx, expr_handle)?;
                }
                _ => {}
            }
        }

        let terminated = self.write_block(&mut ctx, &fun.body, Exits::default())?;
        if !terminated {
            // A value-returning body that falls off the end is caught by the
            // validator; the block still needs sealing.
            ctx.finish(Instruction::return_void());
        }

        self.flush_function_blocks(ctx);
        Instruction::function_end().to_words(&mut self.logical_layout.function_definitions);
        Ok(())
    }

    fn flush_function_blocks(&mut self, ctx: FunctionContext) {
        for (index, block) in ctx.blocks.into_iter().enumerate() {
            Instruction::label(block.label_id)
                .to_words(&mut self.logical_layout.function_definitions);
            if index == 0 {
                for variable in &ctx.variables {
                    variable.to_words(&mut self.logical_layout.function_definitions);
                }
            }
            for instruction in &block.body {
                instruction.to_words(&mut self.logical_layout.function_definitions);
            }
            block
                .termination
                .expect("all blocks are terminated")
                .to_words(&mut self.logical_layout.function_definitions);
        }
    }

    // ------------------------------------------------------------------
    // Statements

    fn write_block(
        &mut self,
        ctx: &mut FunctionContext,
        statements: &[Statement],
        exits: Exits,
    ) -> Result<bool, Error> {
        for statement in statements {
            match *statement {
                Statement::Emit(ref range) => {
                    for handle in range.clone() {
                        self.write_expression(ctx, handle)?;
                    }
                }
                Statement::Block(ref block) => {
                    if self.write_block(ctx, block, exits)? {
                        return Ok(true);
                    }
                }
                Statement::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    let condition_id = self.write_expression(ctx, condition)?;
                    let merge_id = self.id_gen.next();
                    let accept_id = self.id_gen.next();
                    let reject_id = if reject.is_empty() {
                        merge_id
                    } else {
                        self.id_gen.next()
                    };
                    ctx.current.body.push(Instruction::selection_merge(
                        merge_id,
                        spirv::SelectionControl::NONE,
                    ));
                    ctx.consume(
                        Instruction::branch_conditional(condition_id, accept_id, reject_id),
                        accept_id,
                    );
                    if self.write_block(ctx, accept, exits)? {
                        ctx.open(if reject.is_empty() { merge_id } else { reject_id });
                    } else {
                        ctx.consume(
                            Instruction::branch(merge_id),
                            if reject.is_empty() { merge_id } else { reject_id },
                        );
                    }
                    if !reject.is_empty() {
                        if self.write_block(ctx, reject, exits)? {
                            ctx.open(merge_id);
                        } else {
                            ctx.consume(Instruction::branch(merge_id), merge_id);
                        }
                    }
                }
                Statement::Switch { selector, ref cases } => {
                    let selector_id = self.write_expression(ctx, selector)?;
                    let merge_id = self.id_gen.next();
                    let case_labels: Vec<Word> =
                        cases.iter().map(|_| self.id_gen.next()).collect();
                    let mut default_label = merge_id;
                    let mut targets = Vec::new();
                    for (case, &label) in cases.iter().zip(&case_labels) {
                        for value in &case.values {
                            match *value {
                                SwitchValue::I32(v) => targets.push((v as u32, label)),
                                SwitchValue::U32(v) => targets.push((v, label)),
                                SwitchValue::Default => default_label = label,
                            }
                        }
                    }
                    ctx.current.body.push(Instruction::selection_merge(
                        merge_id,
                        spirv::SelectionControl::NONE,
                    ));
                    ctx.finish(Instruction::switch(selector_id, default_label, &targets));
                    let inner_exits = Exits {
                        break_label: Some(merge_id),
                        continue_label: exits.continue_label,
                    };
                    for (case, &label) in cases.iter().zip(&case_labels) {
                        ctx.open(label);
                        if !self.write_block(ctx, &case.body, inner_exits)? {
                            ctx.finish(Instruction::branch(merge_id));
                        }
                    }
                    ctx.open(merge_id);
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => {
                    let header_id = self.id_gen.next();
                    let body_id = self.id_gen.next();
                    let continuing_id = self.id_gen.next();
                    let merge_id = self.id_gen.next();
                    ctx.consume(Instruction::branch(header_id), header_id);
                    ctx.current.body.push(Instruction::loop_merge(
                        merge_id,
                        continuing_id,
                        spirv::LoopControl::NONE,
                    ));
                    ctx.consume(Instruction::branch(body_id), body_id);
                    let body_exits = Exits {
                        break_label: Some(merge_id),
                        continue_label: Some(continuing_id),
                    };
                    if self.write_block(ctx, body, body_exits)? {
                        ctx.open(continuing_id);
                    } else {
                        ctx.consume(Instruction::branch(continuing_id), continuing_id);
                    }
                    if !self.write_block(ctx, continuing, Exits::default())? {
                        match break_if {
                            Some(condition) => {
                                let condition_id = self.write_expression(ctx, condition)?;
                                ctx.consume(
                                    Instruction::branch_conditional(
                                        condition_id,
                                        merge_id,
                                        header_id,
                                    ),
                                    merge_id,
                                );
                            }
                            None => ctx.consume(Instruction::branch(header_id), merge_id),
                        }
                    } else {
                        ctx.open(merge_id);
                    }
                }
                Statement::Break => {
                    let target = exits
                        .break_label
                        .ok_or(Error::Validation("break outside of loop or switch"))?;
                    ctx.finish(Instruction::branch(target));
                    return Ok(true);
                }
                Statement::Continue => {
                    let target = exits
                        .continue_label
                        .ok_or(Error::Validation("continue outside of loop"))?;
                    ctx.finish(Instruction::branch(target));
                    return Ok(true);
                }
                Statement::Return { value } => {
                    let termination = match value {
                        Some(value) => {
                            let value_id = self.write_expression(ctx, value)?;
                            Instruction::return_value(value_id)
                        }
                        None => Instruction::return_void(),
                    };
                    ctx.finish(termination);
                    return Ok(true);
                }
                Statement::Kill => {
                    ctx.finish(Instruction::kill());
                    return Ok(true);
                }
                Statement::Store { pointer, value } => {
                    let value_id = self.write_expression(ctx, value)?;
                    let pointer_id = self.write_expression(ctx, pointer)?;
                    if self.pointee_is_atomic(ctx, pointer) {
                        let (scope_id, semantics_id) =
                            self.atomic_scope_operands(ctx, pointer)?;
                        ctx.current.body.push(Instruction::atomic_store(
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ));
                    } else {
                        ctx.current
                            .body
                            .push(Instruction::store(pointer_id, value_id));
                    }
                }
                Statement::ImageStore {
                    image,
                    coordinate,
                    array_index,
                    value,
                } => {
                    let image_id = self.write_expression(ctx, image)?;
                    let coordinate_id =
                        self.write_image_coordinates(ctx, coordinate, array_index, false)?;
                    let value_id = self.write_expression(ctx, value)?;
                    ctx.current
                        .body
                        .push(Instruction::image_write(image_id, coordinate_id, value_id));
                }
                Statement::Atomic {
                    pointer,
                    ref fun,
                    value,
                    result,
                } => {
                    self.write_atomic(ctx, pointer, fun, value, result)?;
                }
                Statement::Barrier(barrier) => {
                    let scope_id = self.get_constant_scalar(
                        ctx.module,
                        ScalarValue::Uint(spirv::Scope::Workgroup as u64),
                        4,
                    )?;
                    let mut semantics = spirv::MemorySemantics::ACQUIRE_RELEASE;
                    if barrier.contains(Barrier::STORAGE) {
                        semantics |= spirv::MemorySemantics::UNIFORM_MEMORY;
                    }
                    if barrier.contains(Barrier::WORK_GROUP) {
                        semantics |= spirv::MemorySemantics::WORKGROUP_MEMORY;
                    }
                    if barrier.contains(Barrier::TEXTURE) {
                        semantics |= spirv::MemorySemantics::IMAGE_MEMORY;
                    }
                    let semantics_id = self.get_constant_scalar(
                        ctx.module,
                        ScalarValue::Uint(semantics.bits() as u64),
                        4,
                    )?;
                    ctx.current.body.push(Instruction::control_barrier(
                        scope_id, scope_id, semantics_id,
                    ));
                }
                Statement::Call {
                    function,
                    ref arguments,
                    result,
                } => {
                    let mut argument_ids = Vec::with_capacity(arguments.len());
                    for &argument in arguments {
                        argument_ids.push(self.write_expression(ctx, argument)?);
                    }
                    let callee_id = self.lookup_function[&function];
                    let return_type_id = match ctx.module.functions[function].result {
                        Some(ref r) => self.get_type_id(ctx.module, LookupType::Handle(r.ty))?,
                        None => self.void_type_id(ctx.module)?,
                    };
                    let id = self.id_gen.next();
                    ctx.current.body.push(Instruction::function_call(
                        return_type_id,
                        id,
                        callee_id,
                        &argument_ids,
                    ));
                    if let Some(result) = result {
                        ctx.cached[result.index()] = id;
                    }
                }
                Statement::WorkGroupUniformLoad { pointer, result } => {
                    let scope_id = self.get_constant_scalar(
                        ctx.module,
                        ScalarValue::Uint(spirv::Scope::Workgroup as u64),
                        4,
                    )?;
                    let semantics = spirv::MemorySemantics::ACQUIRE_RELEASE
                        | spirv::MemorySemantics::WORKGROUP_MEMORY;
                    let semantics_id = self.get_constant_scalar(
                        ctx.module,
                        ScalarValue::Uint(semantics.bits() as u64),
                        4,
                    )?;
                    ctx.current.body.push(Instruction::control_barrier(
                        scope_id, scope_id, semantics_id,
                    ));
                    let pointer_id = self.write_expression(ctx, pointer)?;
                    let type_id =
                        self.resolution_type_id(ctx.module, ctx.resolution(result))?;
                    let id = self.id_gen.next();
                    ctx.current
                        .body
                        .push(Instruction::load(type_id, id, pointer_id));
                    ctx.cached[result.index()] = id;
                    ctx.current.body.push(Instruction::control_barrier(
                        scope_id, scope_id, semantics_id,
                    ));
                }
                Statement::RayQuery { .. } => {
                    return Err(Error::FeatureNotImplemented("ray queries"))
                }
            }
        }
        Ok(false)
    }

    fn pointee_is_atomic(&self, ctx: &FunctionContext, pointer: Handle<Expression>) -> bool {
        match *ctx.inner_of(pointer) {
            TypeInner::Pointer { base, .. } => {
                matches!(ctx.module.types[base].inner, TypeInner::Atomic(_))
            }
            _ => false,
        }
    }

    fn atomic_scope_operands(
        &mut self,
        ctx: &FunctionContext,
        pointer: Handle<Expression>,
    ) -> Result<(Word, Word), Error> {
        let space = ctx
            .inner_of(pointer)
            .pointer_space()
            .unwrap_or(AddressSpace::Handle);
        let (scope, semantics) = match space {
            AddressSpace::WorkGroup => (
                spirv::Scope::Workgroup,
                spirv::MemorySemantics::ACQUIRE_RELEASE
                    | spirv::MemorySemantics::WORKGROUP_MEMORY,
            ),
            _ => (
                spirv::Scope::Device,
                spirv::MemorySemantics::ACQUIRE_RELEASE
                    | spirv::MemorySemantics::UNIFORM_MEMORY,
            ),
        };
        let scope_id =
            self.get_constant_scalar(ctx.module, ScalarValue::Uint(scope as u64), 4)?;
        let semantics_id = self.get_constant_scalar(
            ctx.module,
            ScalarValue::Uint(semantics.bits() as u64),
            4,
        )?;
        Ok((scope_id, semantics_id))
    }

    fn write_atomic(
        &mut self,
        ctx: &mut FunctionContext,
        pointer: Handle<Expression>,
        fun: &AtomicFunction,
        value: Handle<Expression>,
        result: Handle<Expression>,
    ) -> Result<(), Error> {
        let pointer_id = self.write_expression(ctx, pointer)?;
        let value_id = self.write_expression(ctx, value)?;
        let (scope_id, semantics_id) = self.atomic_scope_operands(ctx, pointer)?;
        let scalar_kind = ctx
            .inner_of(value)
            .scalar_kind()
            .unwrap_or(ScalarKind::Uint);
        let type_id = self.resolution_type_id(ctx.module, ctx.resolution(result))?;
        let id = self.id_gen.next();
        let instruction = match *fun {
            AtomicFunction::Add => Instruction::atomic(
                Op::AtomicIAdd,
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::Subtract => Instruction::atomic(
                Op::AtomicISub,
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::And => Instruction::atomic(
                Op::AtomicAnd,
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::ExclusiveOr => Instruction::atomic(
                Op::AtomicXor,
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::InclusiveOr => Instruction::atomic(
                Op::AtomicOr,
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            // Signedness picks the opcode.
            AtomicFunction::Min => Instruction::atomic(
                match scalar_kind {
                    ScalarKind::Sint => Op::AtomicSMin,
                    _ => Op::AtomicUMin,
                },
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::Max => Instruction::atomic(
                match scalar_kind {
                    ScalarKind::Sint => Op::AtomicSMax,
                    _ => Op::AtomicUMax,
                },
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::Exchange { compare: None } => Instruction::atomic(
                Op::AtomicExchange,
                type_id,
                id,
                pointer_id,
                scope_id,
                semantics_id,
                &[value_id],
            ),
            AtomicFunction::Exchange {
                compare: Some(compare),
            } => {
                let compare_id = self.write_expression(ctx, compare)?;
                Instruction::atomic(
                    Op::AtomicCompareExchange,
                    type_id,
                    id,
                    pointer_id,
                    scope_id,
                    semantics_id,
                    &[semantics_id, value_id, compare_id],
                )
            }
        };
        ctx.current.body.push(instruction);
        ctx.cached[result.index()] = id;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions

    fn write_expression(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
    ) -> Result<Word, Error> {
        if ctx.cached[handle.index()] != 0 {
            return Ok(ctx.cached[handle.index()]);
        }
        let id = match ctx.fun.expressions[handle] {
            Expression::Literal(literal) => self.get_literal_id(ctx.module, literal)?,
            Expression::Constant(constant) => self.constant_ids[constant.index()],
            Expression::ZeroValue(ty) => {
                let type_id = self.get_type_id(ctx.module, LookupType::Handle(ty))?;
                self.get_null_constant(ctx.module, type_id)?
            }
            Expression::Compose { ty, ref components } => {
                if let Some(id) = self.write_constant_expr(ctx, handle)? {
                    id
                } else {
                    let mut component_ids = Vec::with_capacity(components.len());
                    for &component in components {
                        component_ids.push(self.write_expression(ctx, component)?);
                    }
                    let type_id = self.get_type_id(ctx.module, LookupType::Handle(ty))?;
                    let id = self.id_gen.next();
                    ctx.current.body.push(Instruction::composite_construct(
                        type_id,
                        id,
                        &component_ids,
                    ));
                    id
                }
            }
            Expression::Splat { size, value } => {
                if let Some(id) = self.write_constant_expr(ctx, handle)? {
                    id
                } else {
                    let value_id = self.write_expression(ctx, value)?;
                    let type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                    let id = self.id_gen.next();
                    ctx.current.body.push(Instruction::composite_construct(
                        type_id,
                        id,
                        &vec![value_id; size as usize],
                    ));
                    id
                }
            }
            Expression::Access { base, index } => {
                let base_id = self.write_expression(ctx, base)?;
                let index_id = self.write_expression(ctx, index)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                let id = self.id_gen.next();
                if ctx.inner_of(base).is_pointer() {
                    ctx.current.body.push(Instruction::access_chain(
                        result_type_id,
                        id,
                        base_id,
                        &[index_id],
                    ));
                } else {
                    match *ctx.inner_of(base) {
                        TypeInner::Vector { .. } => {
                            ctx.current.body.push(Instruction::vector_extract_dynamic(
                                result_type_id,
                                id,
                                base_id,
                                index_id,
                            ));
                        }
                        _ => {
                            return Err(Error::FeatureNotImplemented(
                                "dynamic indexing of composite values",
                            ))
                        }
                    }
                }
                id
            }
            Expression::AccessIndex { base, index } => {
                let base_id = self.write_expression(ctx, base)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                let id = self.id_gen.next();
                if ctx.inner_of(base).is_pointer() {
                    let index_id = self.get_index_constant(ctx.module, index)?;
                    ctx.current.body.push(Instruction::access_chain(
                        result_type_id,
                        id,
                        base_id,
                        &[index_id],
                    ));
                } else {
                    ctx.current.body.push(Instruction::composite_extract(
                        result_type_id,
                        id,
                        base_id,
                        &[index],
                    ));
                }
                id
            }
            Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let vector_id = self.write_expression(ctx, vector)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                let components: Vec<Word> = pattern[..size as usize]
                    .iter()
                    .map(|&component| component as Word)
                    .collect();
                let id = self.id_gen.next();
                ctx.current.body.push(Instruction::vector_shuffle(
                    result_type_id,
                    id,
                    vector_id,
                    vector_id,
                    &components,
                ));
                id
            }
            Expression::FunctionArgument(index) => ctx.parameter_ids[index as usize],
            Expression::LocalVariable(local) => ctx.local_ids[local.index()],
            Expression::GlobalVariable(global) => {
                let (var_id, wrapped, class) = {
                    let info = &self.globals[global.index()];
                    (info.var_id, info.wrapped, info.class)
                };
                let var = &ctx.module.global_variables[global];
                if class == spirv::StorageClass::UniformConstant {
                    // Images and samplers are used by value; load them once.
                    let type_id =
                        self.get_type_id(ctx.module, LookupType::Handle(var.ty))?;
                    let id = self.id_gen.next();
                    ctx.current
                        .body
                        .push(Instruction::load(type_id, id, var_id));
                    id
                } else if wrapped {
                    // Step through the synthesized wrapper struct.
                    let zero_id = self.get_index_constant(ctx.module, 0)?;
                    let pointer_type_id = self.get_type_id(
                        ctx.module,
                        LocalType::Pointer {
                            base: var.ty,
                            class,
                        }
                        .into(),
                    )?;
                    let id = self.id_gen.next();
                    ctx.current.body.push(Instruction::access_chain(
                        pointer_type_id,
                        id,
                        var_id,
                        &[zero_id],
                    ));
                    id
                } else {
                    var_id
                }
            }
            Expression::Load { pointer } => {
                let pointer_id = self.write_expression(ctx, pointer)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                let id = self.id_gen.next();
                if self.pointee_is_atomic(ctx, pointer) {
                    let (scope_id, semantics_id) = self.atomic_scope_operands(ctx, pointer)?;
                    ctx.current.body.push(Instruction::atomic(
                        Op::AtomicLoad,
                        result_type_id,
                        id,
                        pointer_id,
                        scope_id,
                        semantics_id,
                        &[],
                    ));
                } else {
                    ctx.current
                        .body
                        .push(Instruction::load(result_type_id, id, pointer_id));
                }
                id
            }
            Expression::Unary { op, expr } => {
                let operand_id = self.write_expression(ctx, expr)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                let kind = ctx.inner_of(expr).scalar_kind();
                let spirv_op = match op {
                    UnaryOperator::Negate => match kind {
                        Some(ScalarKind::Float) => Op::FNegate,
                        _ => Op::SNegate,
                    },
                    UnaryOperator::LogicalNot => Op::LogicalNot,
                    UnaryOperator::BitwiseNot => Op::Not,
                };
                let id = self.id_gen.next();
                ctx.current
                    .body
                    .push(Instruction::unary(spirv_op, result_type_id, id, operand_id));
                id
            }
            Expression::Binary { op, left, right } => {
                self.write_binary(ctx, handle, op, left, right)?
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => self.write_math(ctx, handle, fun, arg, arg1, arg2, arg3)?,
            Expression::Relational { fun, argument } => {
                let argument_id = self.write_expression(ctx, argument)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                let op = match fun {
                    RelationalFunction::All => Op::All,
                    RelationalFunction::Any => Op::Any,
                    RelationalFunction::IsNan => Op::IsNan,
                    RelationalFunction::IsInf => Op::IsInf,
                };
                let id = self.id_gen.next();
                ctx.current
                    .body
                    .push(Instruction::unary(op, result_type_id, id, argument_id));
                id
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let mut condition_id = self.write_expression(ctx, condition)?;
                let accept_id = self.write_expression(ctx, accept)?;
                let reject_id = self.write_expression(ctx, reject)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                // Pre-1.4 `OpSelect` needs the condition shaped like the
                // operands.
                if let TypeInner::Vector { size, .. } = *ctx.inner_of(accept) {
                    if ctx.inner_of(condition).vector_size().is_none() {
                        let bool_vec_id = self.get_type_id(
                            ctx.module,
                            LocalType::Value {
                                vector_size: Some(size),
                                scalar: Scalar::BOOL,
                                pointer_space: None,
                            }
                            .into(),
                        )?;
                        let id = self.id_gen.next();
                        ctx.current.body.push(Instruction::composite_construct(
                            bool_vec_id,
                            id,
                            &vec![condition_id; size as usize],
                        ));
                        condition_id = id;
                    }
                }
                let id = self.id_gen.next();
                ctx.current.body.push(Instruction::select(
                    result_type_id,
                    id,
                    condition_id,
                    accept_id,
                    reject_id,
                ));
                id
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => self.write_conversion(ctx, handle, expr, kind, convert)?,
            Expression::Derivative { axis, ctrl, expr } => {
                use wgslc_core::{DerivativeAxis as Axis, DerivativeControl as Ctrl};
                let operand_id = self.write_expression(ctx, expr)?;
                let result_type_id =
                    self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
                if ctrl != Ctrl::None {
                    self.require_capability(spirv::Capability::DerivativeControl);
                }
                let op = match (axis, ctrl) {
                    (Axis::X, Ctrl::None) => Op::DPdx,
                    (Axis::X, Ctrl::Coarse) => Op::DPdxCoarse,
                    (Axis::X, Ctrl::Fine) => Op::DPdxFine,
                    (Axis::Y, Ctrl::None) => Op::DPdy,
                    (Axis::Y, Ctrl::Coarse) => Op::DPdyCoarse,
                    (Axis::Y, Ctrl::Fine) => Op::DPdyFine,
                    (Axis::Width, Ctrl::None) => Op::Fwidth,
                    (Axis::Width, Ctrl::Coarse) => Op::FwidthCoarse,
                    (Axis::Width, Ctrl::Fine) => Op::FwidthFine,
                };
                let id = self.id_gen.next();
                ctx.current
                    .body
                    .push(Instruction::unary(op, result_type_id, id, operand_id));
                id
            }
            Expression::ImageSample { .. } => self.write_image_sample(ctx, handle)?,
            Expression::ImageLoad {
                image,
                coordinate,
                array_index,
                sample,
                level,
            } => self.write_image_load(ctx, handle, image, coordinate, array_index, sample, level)?,
            Expression::ImageQuery { image, query } => {
                self.write_image_query(ctx, handle, image, query)?
            }
            Expression::CallResult(_) | Expression::AtomicResult { .. } => {
                return Err(Error::Validation(
                    "call or atomic result used before its statement",
                ))
            }
            Expression::ArrayLength(pointer) => {
                let (var_handle, member_index) = match ctx.fun.expressions[pointer] {
                    Expression::GlobalVariable(global) => (global, 0),
                    Expression::AccessIndex { base, index } => {
                        match ctx.fun.expressions[base] {
                            Expression::GlobalVariable(global) => (global, index),
                            _ => {
                                return Err(Error::FeatureNotImplemented(
                                    "array length of a non-global pointer",
                                ))
                            }
                        }
                    }
                    _ => {
                        return Err(Error::FeatureNotImplemented(
                            "array length of a non-global pointer",
                        ))
                    }
                };
                let (var_id, wrapped) = {
                    let info = &self.globals[var_handle.index()];
                    (info.var_id, info.wrapped)
                };
                let member = if wrapped { 0 } else { member_index };
                let result_type_id = self.scalar_type_id(ctx.module, Scalar::U32)?;
                let id = self.id_gen.next();
                ctx.current.body.push(Instruction::array_length(
                    result_type_id,
                    id,
                    var_id,
                    member,
                ));
                id
            }
        };
        ctx.cached[handle.index()] = id;
        Ok(id)
    }

    fn write_binary(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
        op: wgslc_core::BinaryOperator,
        left: Handle<Expression>,
        right: Handle<Expression>,
    ) -> Result<Word, Error> {
        use wgslc_core::BinaryOperator as Bo;
        let mut left_id = self.write_expression(ctx, left)?;
        let mut right_id = self.write_expression(ctx, right)?;
        let result_type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
        let left_inner = ctx.inner_of(left);
        let right_inner = ctx.inner_of(right);
        let kind = left_inner.scalar_kind().unwrap_or(ScalarKind::Float);

        // Matrix and mixed vector/scalar products get dedicated opcodes;
        // everything else is component-wise on equal shapes.
        let special = match (left_inner, right_inner, op) {
            (&TypeInner::Matrix { .. }, &TypeInner::Vector { .. }, Bo::Multiply) => {
                Some(Op::MatrixTimesVector)
            }
            (&TypeInner::Vector { .. }, &TypeInner::Matrix { .. }, Bo::Multiply) => {
                Some(Op::VectorTimesMatrix)
            }
            (&TypeInner::Matrix { .. }, &TypeInner::Matrix { .. }, Bo::Multiply) => {
                Some(Op::MatrixTimesMatrix)
            }
            (&TypeInner::Matrix { .. }, &TypeInner::Scalar(_), Bo::Multiply) => {
                Some(Op::MatrixTimesScalar)
            }
            (&TypeInner::Vector { .. }, &TypeInner::Scalar(_), Bo::Multiply)
                if kind == ScalarKind::Float =>
            {
                Some(Op::VectorTimesScalar)
            }
            _ => None,
        };
        if let Some(op) = special {
            let id = self.id_gen.next();
            ctx.current
                .body
                .push(Instruction::binary(op, result_type_id, id, left_id, right_id));
            return Ok(id);
        }

        // Scalars mix with vectors by splatting.
        match (left_inner.vector_size(), right_inner.vector_size()) {
            (Some(size), None) if !matches!(op, Bo::ShiftLeft | Bo::ShiftRight) => {
                right_id = self.splat_value(ctx, right_id, size, right_inner)?;
            }
            (None, Some(size)) => {
                left_id = self.splat_value(ctx, left_id, size, left_inner)?;
            }
            _ => {}
        }

        let spirv_op = match op {
            Bo::Add => match kind {
                ScalarKind::Float => Op::FAdd,
                _ => Op::IAdd,
            },
            Bo::Subtract => match kind {
                ScalarKind::Float => Op::FSub,
                _ => Op::ISub,
            },
            Bo::Multiply => match kind {
                ScalarKind::Float => Op::FMul,
                _ => Op::IMul,
            },
            Bo::Divide => match kind {
                ScalarKind::Float => Op::FDiv,
                ScalarKind::Sint => Op::SDiv,
                _ => Op::UDiv,
            },
            Bo::Modulo => match kind {
                ScalarKind::Float => Op::FRem,
                ScalarKind::Sint => Op::SRem,
                _ => Op::UMod,
            },
            Bo::Equal => match kind {
                ScalarKind::Float => Op::FOrdEqual,
                ScalarKind::Bool => Op::LogicalEqual,
                _ => Op::IEqual,
            },
            Bo::NotEqual => match kind {
                ScalarKind::Float => Op::FOrdNotEqual,
                ScalarKind::Bool => Op::LogicalNotEqual,
                _ => Op::INotEqual,
            },
            Bo::Less => match kind {
                ScalarKind::Float => Op::FOrdLessThan,
                ScalarKind::Sint => Op::SLessThan,
                _ => Op::ULessThan,
            },
            Bo::LessEqual => match kind {
                ScalarKind::Float => Op::FOrdLessThanEqual,
                ScalarKind::Sint => Op::SLessThanEqual,
                _ => Op::ULessThanEqual,
            },
            Bo::Greater => match kind {
                ScalarKind::Float => Op::FOrdGreaterThan,
                ScalarKind::Sint => Op::SGreaterThan,
                _ => Op::UGreaterThan,
            },
            Bo::GreaterEqual => match kind {
                ScalarKind::Float => Op::FOrdGreaterThanEqual,
                ScalarKind::Sint => Op::SGreaterThanEqual,
                _ => Op::UGreaterThanEqual,
            },
            Bo::And => Op::BitwiseAnd,
            Bo::ExclusiveOr => Op::BitwiseXor,
            Bo::InclusiveOr => Op::BitwiseOr,
            Bo::LogicalAnd => Op::LogicalAnd,
            Bo::LogicalOr => Op::LogicalOr,
            Bo::ShiftLeft => Op::ShiftLeftLogical,
            Bo::ShiftRight => match kind {
                ScalarKind::Sint => Op::ShiftRightArithmetic,
                _ => Op::ShiftRightLogical,
            },
        };
        let id = self.id_gen.next();
        ctx.current.body.push(Instruction::binary(
            spirv_op,
            result_type_id,
            id,
            left_id,
            right_id,
        ));
        Ok(id)
    }

    fn splat_value(
        &mut self,
        ctx: &mut FunctionContext,
        value_id: Word,
        size: VectorSize,
        inner: &TypeInner,
    ) -> Result<Word, Error> {
        let scalar = inner.scalar().unwrap_or(Scalar::F32);
        let vector_type_id = self.get_type_id(
            ctx.module,
            LocalType::Value {
                vector_size: Some(size),
                scalar,
                pointer_space: None,
            }
            .into(),
        )?;
        let id = self.id_gen.next();
        ctx.current.body.push(Instruction::composite_construct(
            vector_type_id,
            id,
            &vec![value_id; size as usize],
        ));
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_math(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
        arg2: Option<Handle<Expression>>,
        arg3: Option<Handle<Expression>>,
    ) -> Result<Word, Error> {
        use spirv::GLOp;
        use MathFunction as Mf;

        let arg_id = self.write_expression(ctx, arg)?;
        let arg1_id = arg1.map(|a| self.write_expression(ctx, a)).transpose()?;
        let arg2_id = arg2.map(|a| self.write_expression(ctx, a)).transpose()?;
        let arg3_id = arg3.map(|a| self.write_expression(ctx, a)).transpose()?;
        let result_type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
        let kind = ctx.inner_of(arg).scalar_kind().unwrap_or(ScalarKind::Float);
        let id = self.id_gen.next();

        let mut operands = vec![arg_id];
        operands.extend(arg1_id);
        operands.extend(arg2_id);
        operands.extend(arg3_id);

        // A few functions are core instructions rather than GLSL.std.450.
        let core_op = match fun {
            Mf::Dot => Some(Op::Dot),
            Mf::Transpose => Some(Op::Transpose),
            Mf::CountOneBits => Some(Op::BitCount),
            Mf::ReverseBits => Some(Op::BitReverse),
            Mf::ExtractBits => Some(match kind {
                ScalarKind::Sint => Op::BitFieldSExtract,
                _ => Op::BitFieldUExtract,
            }),
            Mf::InsertBits => Some(Op::BitFieldInsert),
            _ => None,
        };
        if let Some(op) = core_op {
            let mut instruction = Instruction::new(op);
            instruction.set_type(result_type_id);
            instruction.set_result(id);
            instruction.add_operands(operands.iter().copied());
            ctx.current.body.push(instruction);
            return Ok(id);
        }

        let gl_op = match fun {
            Mf::Abs => match kind {
                ScalarKind::Float => GLOp::FAbs,
                _ => GLOp::SAbs,
            },
            Mf::Min => match kind {
                ScalarKind::Float => GLOp::FMin,
                ScalarKind::Sint => GLOp::SMin,
                _ => GLOp::UMin,
            },
            Mf::Max => match kind {
                ScalarKind::Float => GLOp::FMax,
                ScalarKind::Sint => GLOp::SMax,
                _ => GLOp::UMax,
            },
            Mf::Clamp => match kind {
                ScalarKind::Float => GLOp::FClamp,
                ScalarKind::Sint => GLOp::SClamp,
                _ => GLOp::UClamp,
            },
            Mf::Cos => GLOp::Cos,
            Mf::Cosh => GLOp::Cosh,
            Mf::Sin => GLOp::Sin,
            Mf::Sinh => GLOp::Sinh,
            Mf::Tan => GLOp::Tan,
            Mf::Tanh => GLOp::Tanh,
            Mf::Acos => GLOp::Acos,
            Mf::Asin => GLOp::Asin,
            Mf::Atan => GLOp::Atan,
            Mf::Atan2 => GLOp::Atan2,
            Mf::Ceil => GLOp::Ceil,
            Mf::Floor => GLOp::Floor,
            Mf::Round => GLOp::RoundEven,
            Mf::Fract => GLOp::Fract,
            Mf::Trunc => GLOp::Trunc,
            Mf::Modf => GLOp::ModfStruct,
            Mf::Frexp => GLOp::FrexpStruct,
            Mf::Ldexp => GLOp::Ldexp,
            Mf::Exp => GLOp::Exp,
            Mf::Exp2 => GLOp::Exp2,
            Mf::Log => GLOp::Log,
            Mf::Log2 => GLOp::Log2,
            Mf::Pow => GLOp::Pow,
            Mf::Sqrt => GLOp::Sqrt,
            Mf::InverseSqrt => GLOp::InverseSqrt,
            Mf::Cross => GLOp::Cross,
            Mf::Distance => GLOp::Distance,
            Mf::Length => GLOp::Length,
            Mf::Normalize => GLOp::Normalize,
            Mf::FaceForward => GLOp::FaceForward,
            Mf::Reflect => GLOp::Reflect,
            Mf::Refract => GLOp::Refract,
            // `sign` splits on the operand's scalar kind.
            Mf::Sign => match kind {
                ScalarKind::Sint => GLOp::SSign,
                _ => GLOp::FSign,
            },
            Mf::Fma => GLOp::Fma,
            Mf::Mix => GLOp::FMix,
            Mf::Step => GLOp::Step,
            Mf::SmoothStep => GLOp::SmoothStep,
            Mf::Determinant => GLOp::Determinant,
            Mf::FirstTrailingBit => GLOp::FindILsb,
            Mf::FirstLeadingBit => match kind {
                ScalarKind::Sint => GLOp::FindSMsb,
                _ => GLOp::FindUMsb,
            },
            Mf::Dot
            | Mf::Transpose
            | Mf::CountOneBits
            | Mf::ReverseBits
            | Mf::ExtractBits
            | Mf::InsertBits => unreachable!("handled as core instructions"),
        };
        ctx.current.body.push(Instruction::ext_inst(
            self.gl450_ext_inst_id,
            gl_op,
            result_type_id,
            id,
            &operands,
        ));
        Ok(id)
    }

    fn write_conversion(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
        expr: Handle<Expression>,
        kind: ScalarKind,
        convert: Option<Bytes>,
    ) -> Result<Word, Error> {
        let expr_id = self.write_expression(ctx, expr)?;
        let source = match ctx.inner_of(expr).scalar() {
            Some(scalar) => scalar,
            None => return Err(Error::Validation("cast of a non-numeric value")),
        };
        let result_type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
        let vector_size = ctx.inner_of(expr).vector_size();

        let op = match convert {
            None => Op::Bitcast,
            Some(width) => {
                if source.kind == kind && source.width == width {
                    return Ok(expr_id);
                }
                match (source.kind, kind) {
                    (ScalarKind::Float, ScalarKind::Sint) => Op::ConvertFToS,
                    (ScalarKind::Float, ScalarKind::Uint) => Op::ConvertFToU,
                    (ScalarKind::Sint, ScalarKind::Float) => Op::ConvertSToF,
                    (ScalarKind::Uint, ScalarKind::Float) => Op::ConvertUToF,
                    (ScalarKind::Float, ScalarKind::Float) => Op::FConvert,
                    (ScalarKind::Sint, ScalarKind::Sint) => Op::SConvert,
                    (ScalarKind::Uint, ScalarKind::Uint) => Op::UConvert,
                    (ScalarKind::Sint, ScalarKind::Uint)
                    | (ScalarKind::Uint, ScalarKind::Sint) => Op::Bitcast,
                    (ScalarKind::Bool, _) => {
                        // bool -> number: select between one and zero.
                        let target = Scalar { kind, width };
                        let one_id = self.shaped_constant(ctx, target, vector_size, 1)?;
                        let zero_id = self.shaped_constant(ctx, target, vector_size, 0)?;
                        let id = self.id_gen.next();
                        ctx.current.body.push(Instruction::select(
                            result_type_id,
                            id,
                            expr_id,
                            one_id,
                            zero_id,
                        ));
                        return Ok(id);
                    }
                    (_, ScalarKind::Bool) => {
                        let zero_id = self.shaped_constant(ctx, source, vector_size, 0)?;
                        let op = match source.kind {
                            ScalarKind::Float => Op::FOrdNotEqual,
                            _ => Op::INotEqual,
                        };
                        let id = self.id_gen.next();
                        ctx.current.body.push(Instruction::binary(
                            op,
                            result_type_id,
                            id,
                            expr_id,
                            zero_id,
                        ));
                        return Ok(id);
                    }
                }
            }
        };
        let id = self.id_gen.next();
        ctx.current
            .body
            .push(Instruction::unary(op, result_type_id, id, expr_id));
        Ok(id)
    }

    /// A constant of the given scalar type and optional vector shape holding
    /// `value` in every component.
    fn shaped_constant(
        &mut self,
        ctx: &FunctionContext,
        scalar: Scalar,
        vector_size: Option<VectorSize>,
        value: u64,
    ) -> Result<Word, Error> {
        let scalar_value = match scalar.kind {
            ScalarKind::Float => ScalarValue::Float(value as f64),
            ScalarKind::Sint => ScalarValue::Sint(value as i64),
            ScalarKind::Uint => ScalarValue::Uint(value),
            ScalarKind::Bool => ScalarValue::Bool(value != 0),
        };
        let scalar_id = self.get_constant_scalar(ctx.module, scalar_value, scalar.width)?;
        match vector_size {
            None => Ok(scalar_id),
            Some(size) => {
                let type_id = self.get_type_id(
                    ctx.module,
                    LocalType::Value {
                        vector_size: Some(size),
                        scalar,
                        pointer_space: None,
                    }
                    .into(),
                )?;
                Ok(self.get_composite_constant(type_id, vec![scalar_id; size as usize]))
            }
        }
    }

    // ------------------------------------------------------------------
    // Images

    /// Merge the array index into the coordinate vector, converting it to
    /// float for sampled access.
    fn write_image_coordinates(
        &mut self,
        ctx: &mut FunctionContext,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        as_float: bool,
    ) -> Result<Word, Error> {
        let coordinate_id = self.write_expression(ctx, coordinate)?;
        let array_index = match array_index {
            Some(array_index) => array_index,
            None => return Ok(coordinate_id),
        };
        let mut index_id = self.write_expression(ctx, array_index)?;
        let (size, scalar) = match *ctx.inner_of(coordinate) {
            TypeInner::Vector { size, scalar } => (size as u32, scalar),
            TypeInner::Scalar(scalar) => (1, scalar),
            _ => return Err(Error::Validation("non-numeric texture coordinate")),
        };
        if as_float {
            let float_id = self.scalar_type_id(ctx.module, Scalar::F32)?;
            let convert = match ctx.inner_of(array_index).scalar_kind() {
                Some(ScalarKind::Sint) => Op::ConvertSToF,
                _ => Op::ConvertUToF,
            };
            let id = self.id_gen.next();
            ctx.current
                .body
                .push(Instruction::unary(convert, float_id, id, index_id));
            index_id = id;
        }
        let merged_size = VectorSize::from_count(size + 1)
            .ok_or(Error::Validation("coordinate vector is already full"))?;
        let merged_type_id = self.get_type_id(
            ctx.module,
            LocalType::Value {
                vector_size: Some(merged_size),
                scalar: if as_float { Scalar::F32 } else { scalar },
                pointer_space: None,
            }
            .into(),
        )?;
        let id = self.id_gen.next();
        ctx.current.body.push(Instruction::composite_construct(
            merged_type_id,
            id,
            &[coordinate_id, index_id],
        ));
        Ok(id)
    }

    fn write_image_sample(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
    ) -> Result<Word, Error> {
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
                    image,
                    sampler,
                    coordinate,
                    array_index,
                    offset,
                    level.clone(),
                    depth_ref,
                    gather,
                ),
                _ => unreachable!(),
            };

        let image_id = self.write_expression(ctx, image)?;
        let sampler_id = self.write_expression(ctx, sampler)?;
        let coordinate_id = self.write_image_coordinates(ctx, coordinate, array_index, true)?;

        let image_type = match *ctx.resolution(image) {
            TypeResolution::Handle(ty) => ty,
            TypeResolution::Value(_) => {
                return Err(Error::Validation("image expression with inline type"))
            }
        };
        let is_depth = matches!(
            ctx.module.types[image_type].inner,
            TypeInner::Image {
                class: ImageClass::Depth { .. },
                ..
            }
        );
        let image_type_id = self.get_type_id(ctx.module, LookupType::Handle(image_type))?;
        let sampled_image_type_id =
            self.get_type_id(ctx.module, LocalType::SampledImage { image_type_id }.into())?;
        let sampled_id = self.id_gen.next();
        ctx.current.body.push(Instruction::sampled_image(
            sampled_image_type_id,
            sampled_id,
            image_id,
            sampler_id,
        ));

        // Gather up the optional image operands mask.
        let mut mask = spirv::ImageOperands::empty();
        let mut extra = Vec::new();
        let mut lod_id = None;
        match level {
            SampleLevel::Auto => {}
            SampleLevel::Zero => {
                mask |= spirv::ImageOperands::LOD;
                lod_id = Some(self.get_constant_scalar(ctx.module, ScalarValue::Float(0.0), 4)?);
            }
            SampleLevel::Exact(expr) => {
                mask |= spirv::ImageOperands::LOD;
                lod_id = Some(self.write_expression(ctx, expr)?);
            }
            SampleLevel::Bias(expr) => {
                mask |= spirv::ImageOperands::BIAS;
                lod_id = Some(self.write_expression(ctx, expr)?);
            }
            SampleLevel::Gradient { x, y } => {
                mask |= spirv::ImageOperands::GRAD;
                extra.push(self.write_expression(ctx, x)?);
                extra.push(self.write_expression(ctx, y)?);
            }
        }
        let offset_id = match offset {
            Some(offset) => {
                mask |= spirv::ImageOperands::CONST_OFFSET;
                Some(self.constant_ids[offset.index()])
            }
            None => None,
        };

        let mut operands = Vec::new();
        let depth_ref_id = depth_ref
            .map(|expr| self.write_expression(ctx, expr))
            .transpose()?;
        if let Some(dref) = depth_ref_id {
            operands.push(dref);
        }
        if let Some(component) = gather {
            if depth_ref.is_none() {
                let component_id =
                    self.get_constant_scalar(ctx.module, ScalarValue::Sint(component as i64), 4)?;
                operands.push(component_id);
            }
        }
        if !mask.is_empty() || !extra.is_empty() || offset_id.is_some() {
            operands.push(mask.bits());
            operands.extend(lod_id);
            operands.extend(extra);
            operands.extend(offset_id);
        }

        let scalar_result = depth_ref.is_some() || (is_depth && gather.is_none());
        let vec4_f32_id = self.get_type_id(
            ctx.module,
            LocalType::Value {
                vector_size: Some(VectorSize::Quad),
                scalar: Scalar::F32,
                pointer_space: None,
            }
            .into(),
        )?;
        let result_type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;

        let explicit_lod = matches!(
            level,
            SampleLevel::Zero | SampleLevel::Exact(_) | SampleLevel::Gradient { .. }
        );
        let op = match (gather.is_some(), depth_ref.is_some(), explicit_lod) {
            (true, true, _) => Op::ImageDrefGather,
            (true, false, _) => Op::ImageGather,
            (false, true, false) => Op::ImageSampleDrefImplicitLod,
            (false, true, true) => Op::ImageSampleDrefExplicitLod,
            (false, false, false) => Op::ImageSampleImplicitLod,
            (false, false, true) => Op::ImageSampleExplicitLod,
        };

        // Depth sampling without a reference still produces a vec4 at the
        // SPIR-V level; extract the first component.
        let needs_extract = scalar_result && depth_ref.is_none();
        let op_result_type = if depth_ref.is_some() {
            result_type_id
        } else {
            vec4_f32_id
        };
        let id = self.id_gen.next();
        ctx.current.body.push(Instruction::image_sample(
            op,
            op_result_type,
            id,
            sampled_id,
            coordinate_id,
            &operands,
        ));
        if needs_extract {
            let extracted = self.id_gen.next();
            ctx.current.body.push(Instruction::composite_extract(
                result_type_id,
                extracted,
                id,
                &[0],
            ));
            Ok(extracted)
        } else {
            Ok(id)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_image_load(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        sample: Option<Handle<Expression>>,
        level: Option<Handle<Expression>>,
    ) -> Result<Word, Error> {
        let image_id = self.write_expression(ctx, image)?;
        let coordinate_id = self.write_image_coordinates(ctx, coordinate, array_index, false)?;
        let class = match *ctx.inner_of(image) {
            TypeInner::Image { class, .. } => class,
            _ => return Err(Error::Validation("image load of a non-image")),
        };
        let result_type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
        let is_depth = matches!(class, ImageClass::Depth { .. });
        let vec4_result = if is_depth {
            self.get_type_id(
                ctx.module,
                LocalType::Value {
                    vector_size: Some(VectorSize::Quad),
                    scalar: Scalar::F32,
                    pointer_space: None,
                }
                .into(),
            )?
        } else {
            result_type_id
        };

        let instruction = match class {
            ImageClass::Storage { .. } => {
                let id = self.id_gen.next();
                let mut inst = Instruction::new(Op::ImageRead);
                inst.set_type(vec4_result);
                inst.set_result(id);
                inst.add_operand(image_id);
                inst.add_operand(coordinate_id);
                inst
            }
            _ => {
                let id = self.id_gen.next();
                let mut inst = Instruction::new(Op::ImageFetch);
                inst.set_type(vec4_result);
                inst.set_result(id);
                inst.add_operand(image_id);
                inst.add_operand(coordinate_id);
                if let Some(sample) = sample {
                    let sample_id = self.write_expression(ctx, sample)?;
                    inst.add_operand(spirv::ImageOperands::SAMPLE.bits());
                    inst.add_operand(sample_id);
                } else if let Some(level) = level {
                    let level_id = self.write_expression(ctx, level)?;
                    inst.add_operand(spirv::ImageOperands::LOD.bits());
                    inst.add_operand(level_id);
                }
                inst
            }
        };
        let id = instruction.result_id.unwrap();
        ctx.current.body.push(instruction);
        if is_depth {
            let extracted = self.id_gen.next();
            ctx.current.body.push(Instruction::composite_extract(
                result_type_id,
                extracted,
                id,
                &[0],
            ));
            Ok(extracted)
        } else {
            Ok(id)
        }
    }

    fn write_image_query(
        &mut self,
        ctx: &mut FunctionContext,
        handle: Handle<Expression>,
        image: Handle<Expression>,
        query: wgslc_core::ImageQuery,
    ) -> Result<Word, Error> {
        use wgslc_core::ImageQuery as Iq;
        self.require_capability(spirv::Capability::ImageQuery);
        let image_id = self.write_expression(ctx, image)?;
        let (dim, arrayed, class) = match *ctx.inner_of(image) {
            TypeInner::Image {
                dim,
                arrayed,
                class,
            } => (dim, arrayed, class),
            _ => return Err(Error::Validation("image query of a non-image")),
        };
        let result_type_id = self.resolution_type_id(ctx.module, ctx.resolution(handle))?;
        let needs_lod = !matches!(class, ImageClass::Storage { .. })
            && !matches!(
                class,
                ImageClass::Sampled { multi: true, .. } | ImageClass::Depth { multi: true }
            );

        match query {
            Iq::Size { level } => {
                // Queried size includes the layer count for arrayed images;
                // pick out just the spatial extent.
                let spatial = match dim {
                    ImageDimension::D1 => 1u32,
                    ImageDimension::D2 | ImageDimension::Cube => 2,
                    ImageDimension::D3 => 3,
                };
                let query_components = spatial + arrayed as u32;
                let query_type_id = if query_components == 1 {
                    self.scalar_type_id(ctx.module, Scalar::U32)?
                } else {
                    self.get_type_id(
                        ctx.module,
                        LocalType::Value {
                            vector_size: VectorSize::from_count(query_components),
                            scalar: Scalar::U32,
                            pointer_space: None,
                        }
                        .into(),
                    )?
                };
                let id = self.id_gen.next();
                let instruction = if needs_lod {
                    let lod_id = match level {
                        Some(level) => self.write_expression(ctx, level)?,
                        None => self.get_index_constant(ctx.module, 0)?,
                    };
                    let mut inst = Instruction::new(Op::ImageQuerySizeLod);
                    inst.set_type(query_type_id);
                    inst.set_result(id);
                    inst.add_operand(image_id);
                    inst.add_operand(lod_id);
                    inst
                } else {
                    let mut inst = Instruction::new(Op::ImageQuerySize);
                    inst.set_type(query_type_id);
                    inst.set_result(id);
                    inst.add_operand(image_id);
                    inst
                };
                ctx.current.body.push(instruction);
                if arrayed {
                    // Drop the trailing layer component.
                    let extracted = self.id_gen.next();
                    if spatial == 1 {
                        ctx.current.body.push(Instruction::composite_extract(
                            result_type_id,
                            extracted,
                            id,
                            &[0],
                        ));
                    } else {
                        let components: Vec<Word> = (0..spatial).collect();
                        ctx.current.body.push(Instruction::vector_shuffle(
                            result_type_id,
                            extracted,
                            id,
                            id,
                            &components,
                        ));
                    }
                    Ok(extracted)
                } else {
                    Ok(id)
                }
            }
            Iq::NumLevels => {
                let id = self.id_gen.next();
                let mut inst = Instruction::new(Op::ImageQueryLevels);
                inst.set_type(result_type_id);
                inst.set_result(id);
                inst.add_operand(image_id);
                ctx.current.body.push(inst);
                Ok(id)
            }
            Iq::NumSamples => {
                let id = self.id_gen.next();
                let mut inst = Instruction::new(Op::ImageQuerySamples);
                inst.set_type(result_type_id);
                inst.set_result(id);
                inst.add_operand(image_id);
                ctx.current.body.push(inst);
                Ok(id)
            }
            Iq::NumLayers => {
                let spatial = match dim {
                    ImageDimension::D1 => 1u32,
                    ImageDimension::D2 | ImageDimension::Cube => 2,
                    ImageDimension::D3 => 3,
                };
                let query_type_id = self.get_type_id(
                    ctx.module,
                    LocalType::Value {
                        vector_size: VectorSize::from_count(spatial + 1),
                        scalar: Scalar::U32,
                        pointer_space: None,
                    }
                    .into(),
                )?;
                let id = self.id_gen.next();
                let inst = if needs_lod {
                    let lod_id = self.get_index_constant(ctx.module, 0)?;
                    let mut inst = Instruction::new(Op::ImageQuerySizeLod);
                    inst.set_type(query_type_id);
                    inst.set_result(id);
                    inst.add_operand(image_id);
                    inst.add_operand(lod_id);
                    inst
                } else {
                    let mut inst = Instruction::new(Op::ImageQuerySize);
                    inst.set_type(query_type_id);
                    inst.set_result(id);
                    inst.add_operand(image_id);
                    inst
                };
                ctx.current.body.push(inst);
                let extracted = self.id_gen.next();
                ctx.current.body.push(Instruction::composite_extract(
                    result_type_id,
                    extracted,
                    id,
                    &[spatial],
                ));
                Ok(extracted)
            }
        }
    }

    // ------------------------------------------------------------------
    // Entry points

    fn write_entry_point(
        &mut self,
        module: &Module,
        ep: &wgslc_core::EntryPoint,
    ) -> Result<(), Error> {
        let fun = &module.functions[ep.function];
        let inner_id = self.lookup_function[&ep.function];
        let void_id = self.void_type_id(module)?;
        let wrapper_type_id = self.get_function_type(Vec::new(), void_id)?;
        let wrapper_id = self.id_gen.next();

        let mut interface_ids = Vec::new();
        let mut has_frag_depth = false;

        // One `Input` variable per argument binding; struct arguments
        // flatten into one variable per member.
        struct InputVar {
            var_id: Word,
            type_handle: Handle<Type>,
        }
        let mut argument_inputs: Vec<Vec<InputVar>> = Vec::new();
        for argument in &fun.arguments {
            let mut vars = Vec::new();
            let parts: Vec<(Handle<Type>, Option<&Binding>, Option<&str>)> =
                match argument.binding {
                    Some(ref binding) => {
                        vec![(argument.ty, Some(binding), argument.name.as_deref())]
                    }
                    None => match module.types[argument.ty].inner {
                        TypeInner::Struct { ref members, .. } => members
                            .iter()
                            .map(|member| {
                                (member.ty, member.binding.as_ref(), member.name.as_deref())
                            })
                            .collect(),
                        _ => return Err(Error::Validation("unbound entry point argument")),
                    },
                };
            for (ty, binding, name) in parts {
                let binding =
                    binding.ok_or(Error::Validation("unbound entry point argument"))?;
                let var_id = self.write_interface_variable(
                    module,
                    ty,
                    binding,
                    name,
                    ep.stage,
                    spirv::StorageClass::Input,
                )?;
                interface_ids.push(var_id);
                vars.push(InputVar {
                    var_id,
                    type_handle: ty,
                });
            }
            argument_inputs.push(vars);
        }

        // Output variables mirror the result binding(s).
        struct OutputVar {
            var_id: Word,
            type_handle: Handle<Type>,
            member_index: Option<u32>,
        }
        let mut outputs: Vec<OutputVar> = Vec::new();
        if let Some(ref result) = fun.result {
            let parts: Vec<(Handle<Type>, Option<&Binding>, Option<&str>, Option<u32>)> =
                match result.binding {
                    Some(ref binding) => vec![(result.ty, Some(binding), None, None)],
                    None => match module.types[result.ty].inner {
                        TypeInner::Struct { ref members, .. } => members
                            .iter()
                            .enumerate()
                            .map(|(i, member)| {
                                (
                                    member.ty,
                                    member.binding.as_ref(),
                                    member.name.as_deref(),
                                    Some(i as u32),
                                )
                            })
                            .collect(),
                        _ => return Err(Error::Validation("unbound entry point result")),
                    },
                };
            for (ty, binding, name, member_index) in parts {
                let binding = binding.ok_or(Error::Validation("unbound entry point result"))?;
                if matches!(binding, Binding::BuiltIn(BuiltIn::FragDepth)) {
                    has_frag_depth = true;
                }
                let var_id = self.write_interface_variable(
                    module,
                    ty,
                    binding,
                    name,
                    ep.stage,
                    spirv::StorageClass::Output,
                )?;
                interface_ids.push(var_id);
                outputs.push(OutputVar {
                    var_id,
                    type_handle: ty,
                    member_index,
                });
            }
        }

        // From 1.4 on, the interface also lists every global the function
        // touches.
        if self.version >= (1, 4) {
            for global in module.used_globals(ep.function) {
                interface_ids.push(self.globals[global.index()].var_id);
            }
        }

        // The wrapper body: load inputs, call, store outputs.
        Instruction::function(void_id, wrapper_id, spirv::FunctionControl::NONE, wrapper_type_id)
            .to_words(&mut self.logical_layout.function_definitions);
        let label_id = self.id_gen.next();
        Instruction::label(label_id).to_words(&mut self.logical_layout.function_definitions);
        let mut body = Vec::new();

        let mut argument_ids = Vec::with_capacity(fun.arguments.len());
        for (argument, inputs) in fun.arguments.iter().zip(&argument_inputs) {
            let mut loaded = Vec::with_capacity(inputs.len());
            for input in inputs {
                let type_id = self.get_type_id(module, LookupType::Handle(input.type_handle))?;
                let id = self.id_gen.next();
                body.push(Instruction::load(type_id, id, input.var_id));
                loaded.push(id);
            }
            if argument.binding.is_some() {
                argument_ids.push(loaded[0]);
            } else {
                let struct_type_id = self.get_type_id(module, LookupType::Handle(argument.ty))?;
                let id = self.id_gen.next();
                body.push(Instruction::composite_construct(struct_type_id, id, &loaded));
                argument_ids.push(id);
            }
        }

        let return_type_id = match fun.result {
            Some(ref result) => self.get_type_id(module, LookupType::Handle(result.ty))?,
            None => void_id,
        };
        let call_id = self.id_gen.next();
        body.push(Instruction::function_call(
            return_type_id,
            call_id,
            inner_id,
            &argument_ids,
        ));

        for output in &outputs {
            let value_id = match output.member_index {
                Some(index) => {
                    let member_type_id =
                        self.get_type_id(module, LookupType::Handle(output.type_handle))?;
                    let id = self.id_gen.next();
                    body.push(Instruction::composite_extract(
                        member_type_id,
                        id,
                        call_id,
                        &[index],
                    ));
                    id
                }
                None => call_id,
            };
            body.push(Instruction::store(output.var_id, value_id));
        }

        for instruction in &body {
            instruction.to_words(&mut self.logical_layout.function_definitions);
        }
        Instruction::return_void().to_words(&mut self.logical_layout.function_definitions);
        Instruction::function_end().to_words(&mut self.logical_layout.function_definitions);

        let execution_model = match ep.stage {
            ShaderStage::Vertex => spirv::ExecutionModel::Vertex,
            ShaderStage::Fragment => spirv::ExecutionModel::Fragment,
            ShaderStage::Compute => spirv::ExecutionModel::GLCompute,
        };
        Instruction::entry_point(execution_model, wrapper_id, &ep.name, &interface_ids)
            .to_words(&mut self.logical_layout.entry_points);
        match ep.stage {
            ShaderStage::Compute => {
                Instruction::execution_mode(
                    wrapper_id,
                    spirv::ExecutionMode::LocalSize,
                    &ep.workgroup_size,
                )
                .to_words(&mut self.logical_layout.execution_modes);
            }
            ShaderStage::Fragment => {
                Instruction::execution_mode(
                    wrapper_id,
                    spirv::ExecutionMode::OriginUpperLeft,
                    &[],
                )
                .to_words(&mut self.logical_layout.execution_modes);
                if has_frag_depth {
                    Instruction::execution_mode(
                        wrapper_id,
                        spirv::ExecutionMode::DepthReplacing,
                        &[],
                    )
                    .to_words(&mut self.logical_layout.execution_modes);
                }
            }
            ShaderStage::Vertex => {}
        }
        if self.flags.contains(WriterFlags::DEBUG) {
            self.debugs.push(Instruction::name(wrapper_id, &ep.name));
        }
        Ok(())
    }

    fn write_interface_variable(
        &mut self,
        module: &Module,
        ty: Handle<Type>,
        binding: &Binding,
        name: Option<&str>,
        stage: ShaderStage,
        class: spirv::StorageClass,
    ) -> Result<Word, Error> {
        let pointer_type_id =
            self.get_type_id(module, LocalType::Pointer { base: ty, class }.into())?;
        let var_id = self.id_gen.next();
        Instruction::variable(pointer_type_id, var_id, class, None)
            .to_words(&mut self.logical_layout.declarations);
        match *binding {
            Binding::BuiltIn(builtin) => {
                let spv_builtin =
                    map_builtin(builtin, stage, class == spirv::StorageClass::Input);
                self.annotations.push(Instruction::decorate(
                    var_id,
                    spirv::Decoration::BuiltIn,
                    &[spv_builtin as Word],
                ));
            }
            Binding::Location { location, .. } => {
                self.annotations.push(Instruction::decorate(
                    var_id,
                    spirv::Decoration::Location,
                    &[location],
                ));
                // Vulkan requires integer fragment inputs to be flat.
                if stage == ShaderStage::Fragment
                    && class == spirv::StorageClass::Input
                    && matches!(
                        module.types[ty].inner.scalar_kind(),
                        Some(ScalarKind::Sint | ScalarKind::Uint)
                    )
                {
                    self.annotations.push(Instruction::decorate(
                        var_id,
                        spirv::Decoration::Flat,
                        &[],
                    ));
                }
            }
        }
        if self.flags.contains(WriterFlags::DEBUG) {
            if let Some(name) = name {
                self.debugs.push(Instruction::name(var_id, name));
            }
        }
        Ok(var_id)
    }
}

// ----------------------------------------------------------------------
// Mapping helpers

fn map_storage_class(space: AddressSpace, version: (u8, u8)) -> spirv::StorageClass {
    use spirv::StorageClass as Sc;
    match space {
        AddressSpace::Function => Sc::Function,
        AddressSpace::Private => Sc::Private,
        AddressSpace::WorkGroup => Sc::Workgroup,
        AddressSpace::Uniform => Sc::Uniform,
        AddressSpace::Storage { .. } => {
            if version < (1, 3) {
                Sc::Uniform
            } else {
                Sc::StorageBuffer
            }
        }
        AddressSpace::PushConstant => Sc::PushConstant,
        AddressSpace::Handle => Sc::UniformConstant,
    }
}

fn map_dim(dim: ImageDimension) -> spirv::Dim {
    match dim {
        ImageDimension::D1 => spirv::Dim::Dim1D,
        ImageDimension::D2 => spirv::Dim::Dim2D,
        ImageDimension::D3 => spirv::Dim::Dim3D,
        ImageDimension::Cube => spirv::Dim::DimCube,
    }
}

fn map_image_format(format: StorageFormat) -> spirv::ImageFormat {
    use spirv::ImageFormat as If;
    match format {
        StorageFormat::R32Uint => If::R32ui,
        StorageFormat::R32Sint => If::R32i,
        StorageFormat::R32Float => If::R32f,
        StorageFormat::Rg32Uint => If::Rg32ui,
        StorageFormat::Rg32Sint => If::Rg32i,
        StorageFormat::Rg32Float => If::Rg32f,
        StorageFormat::Rgba8Unorm => If::Rgba8,
        StorageFormat::Rgba8Snorm => If::Rgba8Snorm,
        StorageFormat::Rgba8Uint => If::Rgba8ui,
        StorageFormat::Rgba8Sint => If::Rgba8i,
        StorageFormat::Rgba16Uint => If::Rgba16ui,
        StorageFormat::Rgba16Sint => If::Rgba16i,
        StorageFormat::Rgba16Float => If::Rgba16f,
        StorageFormat::Rgba32Uint => If::Rgba32ui,
        StorageFormat::Rgba32Sint => If::Rgba32i,
        StorageFormat::Rgba32Float => If::Rgba32f,
    }
}

fn map_builtin(builtin: BuiltIn, stage: ShaderStage, input: bool) -> spirv::BuiltIn {
    use spirv::BuiltIn as Sb;
    match builtin {
        BuiltIn::Position => {
            if stage == ShaderStage::Fragment && input {
                Sb::FragCoord
            } else {
                Sb::Position
            }
        }
        BuiltIn::VertexIndex => Sb::VertexIndex,
        BuiltIn::InstanceIndex => Sb::InstanceIndex,
        BuiltIn::FragDepth => Sb::FragDepth,
        BuiltIn::FrontFacing => Sb::FrontFacing,
        BuiltIn::SampleIndex => Sb::SampleId,
        BuiltIn::SampleMask => Sb::SampleMask,
        BuiltIn::GlobalInvocationId => Sb::GlobalInvocationId,
        BuiltIn::LocalInvocationId => Sb::LocalInvocationId,
        BuiltIn::LocalInvocationIndex => Sb::LocalInvocationIndex,
        BuiltIn::WorkGroupId => Sb::WorkgroupId,
        BuiltIn::NumWorkGroups => Sb::NumWorkgroups,
    }
}

fn matrix_column_stride(rows: VectorSize, scalar: Scalar) -> Word {
    let natural = rows as u32 * scalar.width as u32;
    // vec3 columns round up to vec4 alignment.
    match rows {
        VectorSize::Tri => natural + scalar.width as u32,
        _ => natural,
    }
}
