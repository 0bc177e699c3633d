//! Constructors for the instructions the writer emits.

use spirv::{Op, Word};

use super::Instruction;

impl Instruction {
    //
    // Mode-setting and debug
    //

    pub(super) fn capability(capability: spirv::Capability) -> Self {
        let mut instruction = Instruction::new(Op::Capability);
        instruction.add_operand(capability as Word);
        instruction
    }

    pub(super) fn ext_inst_import(id: Word, name: &str) -> Self {
        let mut instruction = Instruction::new(Op::ExtInstImport);
        instruction.set_result(id);
        instruction.add_string(name);
        instruction
    }

    pub(super) fn memory_model(
        addressing: spirv::AddressingModel,
        memory: spirv::MemoryModel,
    ) -> Self {
        let mut instruction = Instruction::new(Op::MemoryModel);
        instruction.add_operand(addressing as Word);
        instruction.add_operand(memory as Word);
        instruction
    }

    pub(super) fn entry_point(
        execution_model: spirv::ExecutionModel,
        function_id: Word,
        name: &str,
        interface: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::EntryPoint);
        instruction.add_operand(execution_model as Word);
        instruction.add_operand(function_id);
        instruction.add_string(name);
        instruction.add_operands(interface.iter().copied());
        instruction
    }

    pub(super) fn execution_mode(
        function_id: Word,
        mode: spirv::ExecutionMode,
        args: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::ExecutionMode);
        instruction.add_operand(function_id);
        instruction.add_operand(mode as Word);
        instruction.add_operands(args.iter().copied());
        instruction
    }

    pub(super) fn source(language: spirv::SourceLanguage, version: Word) -> Self {
        let mut instruction = Instruction::new(Op::Source);
        instruction.add_operand(language as Word);
        instruction.add_operand(version);
        instruction
    }

    pub(super) fn name(target_id: Word, name: &str) -> Self {
        let mut instruction = Instruction::new(Op::Name);
        instruction.add_operand(target_id);
        instruction.add_string(name);
        instruction
    }

    pub(super) fn member_name(target_id: Word, member: Word, name: &str) -> Self {
        let mut instruction = Instruction::new(Op::MemberName);
        instruction.add_operand(target_id);
        instruction.add_operand(member);
        instruction.add_string(name);
        instruction
    }

    //
    // Annotations
    //

    pub(super) fn decorate(target_id: Word, decoration: spirv::Decoration, args: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::Decorate);
        instruction.add_operand(target_id);
        instruction.add_operand(decoration as Word);
        instruction.add_operands(args.iter().copied());
        instruction
    }

    pub(super) fn member_decorate(
        target_id: Word,
        member_index: Word,
        decoration: spirv::Decoration,
        args: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::MemberDecorate);
        instruction.add_operand(target_id);
        instruction.add_operand(member_index);
        instruction.add_operand(decoration as Word);
        instruction.add_operands(args.iter().copied());
        instruction
    }

    //
    // Types
    //

    pub(super) fn type_void(id: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeVoid);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn type_bool(id: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeBool);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn type_int(id: Word, width: Word, signed: bool) -> Self {
        let mut instruction = Instruction::new(Op::TypeInt);
        instruction.set_result(id);
        instruction.add_operand(width);
        instruction.add_operand(signed as Word);
        instruction
    }

    pub(super) fn type_float(id: Word, width: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeFloat);
        instruction.set_result(id);
        instruction.add_operand(width);
        instruction
    }

    pub(super) fn type_vector(id: Word, component_type_id: Word, component_count: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeVector);
        instruction.set_result(id);
        instruction.add_operand(component_type_id);
        instruction.add_operand(component_count);
        instruction
    }

    pub(super) fn type_matrix(id: Word, column_type_id: Word, column_count: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeMatrix);
        instruction.set_result(id);
        instruction.add_operand(column_type_id);
        instruction.add_operand(column_count);
        instruction
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn type_image(
        id: Word,
        sampled_type_id: Word,
        dim: spirv::Dim,
        depth: Word,
        arrayed: bool,
        multisampled: bool,
        sampled: Word,
        format: spirv::ImageFormat,
    ) -> Self {
        let mut instruction = Instruction::new(Op::TypeImage);
        instruction.set_result(id);
        instruction.add_operand(sampled_type_id);
        instruction.add_operand(dim as Word);
        instruction.add_operand(depth);
        instruction.add_operand(arrayed as Word);
        instruction.add_operand(multisampled as Word);
        instruction.add_operand(sampled);
        instruction.add_operand(format as Word);
        instruction
    }

    pub(super) fn type_sampler(id: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeSampler);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn type_sampled_image(id: Word, image_type_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeSampledImage);
        instruction.set_result(id);
        instruction.add_operand(image_type_id);
        instruction
    }

    pub(super) fn type_array(id: Word, element_type_id: Word, length_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeArray);
        instruction.set_result(id);
        instruction.add_operand(element_type_id);
        instruction.add_operand(length_id);
        instruction
    }

    pub(super) fn type_runtime_array(id: Word, element_type_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::TypeRuntimeArray);
        instruction.set_result(id);
        instruction.add_operand(element_type_id);
        instruction
    }

    pub(super) fn type_struct(id: Word, member_ids: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::TypeStruct);
        instruction.set_result(id);
        instruction.add_operands(member_ids.iter().copied());
        instruction
    }

    pub(super) fn type_pointer(
        id: Word,
        storage_class: spirv::StorageClass,
        pointee_type_id: Word,
    ) -> Self {
        let mut instruction = Instruction::new(Op::TypePointer);
        instruction.set_result(id);
        instruction.add_operand(storage_class as Word);
        instruction.add_operand(pointee_type_id);
        instruction
    }

    pub(super) fn type_function(id: Word, return_type_id: Word, parameter_ids: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::TypeFunction);
        instruction.set_result(id);
        instruction.add_operand(return_type_id);
        instruction.add_operands(parameter_ids.iter().copied());
        instruction
    }

    //
    // Constants
    //

    pub(super) fn constant_true(type_id: Word, id: Word) -> Self {
        let mut instruction = Instruction::new(Op::ConstantTrue);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn constant_false(type_id: Word, id: Word) -> Self {
        let mut instruction = Instruction::new(Op::ConstantFalse);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn constant(type_id: Word, id: Word, values: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::Constant);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operands(values.iter().copied());
        instruction
    }

    pub(super) fn constant_composite(type_id: Word, id: Word, constituent_ids: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::ConstantComposite);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operands(constituent_ids.iter().copied());
        instruction
    }

    pub(super) fn constant_null(type_id: Word, id: Word) -> Self {
        let mut instruction = Instruction::new(Op::ConstantNull);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction
    }

    //
    // Variables and memory
    //

    pub(super) fn variable(
        pointer_type_id: Word,
        id: Word,
        storage_class: spirv::StorageClass,
        initializer_id: Option<Word>,
    ) -> Self {
        let mut instruction = Instruction::new(Op::Variable);
        instruction.set_type(pointer_type_id);
        instruction.set_result(id);
        instruction.add_operand(storage_class as Word);
        if let Some(init) = initializer_id {
            instruction.add_operand(init);
        }
        instruction
    }

    pub(super) fn load(type_id: Word, id: Word, pointer_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::Load);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(pointer_id);
        instruction
    }

    pub(super) fn store(pointer_id: Word, value_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::Store);
        instruction.add_operand(pointer_id);
        instruction.add_operand(value_id);
        instruction
    }

    pub(super) fn access_chain(type_id: Word, id: Word, base_id: Word, indices: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::AccessChain);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(base_id);
        instruction.add_operands(indices.iter().copied());
        instruction
    }

    pub(super) fn array_length(type_id: Word, id: Word, struct_ptr_id: Word, member: Word) -> Self {
        let mut instruction = Instruction::new(Op::ArrayLength);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(struct_ptr_id);
        instruction.add_operand(member);
        instruction
    }

    //
    // Functions
    //

    pub(super) fn function(
        return_type_id: Word,
        id: Word,
        function_control: spirv::FunctionControl,
        function_type_id: Word,
    ) -> Self {
        let mut instruction = Instruction::new(Op::Function);
        instruction.set_type(return_type_id);
        instruction.set_result(id);
        instruction.add_operand(function_control.bits());
        instruction.add_operand(function_type_id);
        instruction
    }

    pub(super) fn function_parameter(type_id: Word, id: Word) -> Self {
        let mut instruction = Instruction::new(Op::FunctionParameter);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn function_end() -> Self {
        Instruction::new(Op::FunctionEnd)
    }

    pub(super) fn function_call(
        result_type_id: Word,
        id: Word,
        function_id: Word,
        argument_ids: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::FunctionCall);
        instruction.set_type(result_type_id);
        instruction.set_result(id);
        instruction.add_operand(function_id);
        instruction.add_operands(argument_ids.iter().copied());
        instruction
    }

    //
    // Composites
    //

    pub(super) fn composite_construct(type_id: Word, id: Word, constituent_ids: &[Word]) -> Self {
        let mut instruction = Instruction::new(Op::CompositeConstruct);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operands(constituent_ids.iter().copied());
        instruction
    }

    pub(super) fn composite_extract(
        type_id: Word,
        id: Word,
        composite_id: Word,
        indices: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::CompositeExtract);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(composite_id);
        instruction.add_operands(indices.iter().copied());
        instruction
    }

    pub(super) fn vector_extract_dynamic(
        type_id: Word,
        id: Word,
        vector_id: Word,
        index_id: Word,
    ) -> Self {
        let mut instruction = Instruction::new(Op::VectorExtractDynamic);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(vector_id);
        instruction.add_operand(index_id);
        instruction
    }

    pub(super) fn vector_shuffle(
        type_id: Word,
        id: Word,
        v1_id: Word,
        v2_id: Word,
        components: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::VectorShuffle);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(v1_id);
        instruction.add_operand(v2_id);
        instruction.add_operands(components.iter().copied());
        instruction
    }

    //
    // Arithmetic and logic
    //

    pub(super) fn unary(op: Op, type_id: Word, id: Word, value_id: Word) -> Self {
        let mut instruction = Instruction::new(op);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(value_id);
        instruction
    }

    pub(super) fn binary(
        op: Op,
        type_id: Word,
        id: Word,
        operand_1: Word,
        operand_2: Word,
    ) -> Self {
        let mut instruction = Instruction::new(op);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(operand_1);
        instruction.add_operand(operand_2);
        instruction
    }

    pub(super) fn ternary(
        op: Op,
        type_id: Word,
        id: Word,
        operand_1: Word,
        operand_2: Word,
        operand_3: Word,
    ) -> Self {
        let mut instruction = Instruction::new(op);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(operand_1);
        instruction.add_operand(operand_2);
        instruction.add_operand(operand_3);
        instruction
    }

    pub(super) fn ext_inst(
        ext_set_id: Word,
        gl_op: spirv::GLOp,
        type_id: Word,
        id: Word,
        operand_ids: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(Op::ExtInst);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(ext_set_id);
        instruction.add_operand(gl_op as Word);
        instruction.add_operands(operand_ids.iter().copied());
        instruction
    }

    pub(super) fn select(
        type_id: Word,
        id: Word,
        condition_id: Word,
        accept_id: Word,
        reject_id: Word,
    ) -> Self {
        Instruction::ternary(Op::Select, type_id, id, condition_id, accept_id, reject_id)
    }

    //
    // Images
    //

    pub(super) fn sampled_image(type_id: Word, id: Word, image_id: Word, sampler_id: Word) -> Self {
        Instruction::binary(Op::SampledImage, type_id, id, image_id, sampler_id)
    }

    pub(super) fn image_sample(
        op: Op,
        type_id: Word,
        id: Word,
        sampled_image_id: Word,
        coordinate_id: Word,
        extra: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(op);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(sampled_image_id);
        instruction.add_operand(coordinate_id);
        instruction.add_operands(extra.iter().copied());
        instruction
    }

    pub(super) fn image_write(image_id: Word, coordinate_id: Word, value_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::ImageWrite);
        instruction.add_operand(image_id);
        instruction.add_operand(coordinate_id);
        instruction.add_operand(value_id);
        instruction
    }

    //
    // Atomics and barriers
    //

    pub(super) fn atomic(
        op: Op,
        type_id: Word,
        id: Word,
        pointer_id: Word,
        scope_id: Word,
        semantics_id: Word,
        extra: &[Word],
    ) -> Self {
        let mut instruction = Instruction::new(op);
        instruction.set_type(type_id);
        instruction.set_result(id);
        instruction.add_operand(pointer_id);
        instruction.add_operand(scope_id);
        instruction.add_operand(semantics_id);
        instruction.add_operands(extra.iter().copied());
        instruction
    }

    pub(super) fn atomic_store(
        pointer_id: Word,
        scope_id: Word,
        semantics_id: Word,
        value_id: Word,
    ) -> Self {
        let mut instruction = Instruction::new(Op::AtomicStore);
        instruction.add_operand(pointer_id);
        instruction.add_operand(scope_id);
        instruction.add_operand(semantics_id);
        instruction.add_operand(value_id);
        instruction
    }

    pub(super) fn control_barrier(
        execution_scope_id: Word,
        memory_scope_id: Word,
        semantics_id: Word,
    ) -> Self {
        let mut instruction = Instruction::new(Op::ControlBarrier);
        instruction.add_operand(execution_scope_id);
        instruction.add_operand(memory_scope_id);
        instruction.add_operand(semantics_id);
        instruction
    }

    //
    // Terminators
    //

    pub(super) fn label(id: Word) -> Self {
        let mut instruction = Instruction::new(Op::Label);
        instruction.set_result(id);
        instruction
    }

    pub(super) fn branch(target_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::Branch);
        instruction.add_operand(target_id);
        instruction
    }

    pub(super) fn branch_conditional(
        condition_id: Word,
        true_label_id: Word,
        false_label_id: Word,
    ) -> Self {
        let mut instruction = Instruction::new(Op::BranchConditional);
        instruction.add_operand(condition_id);
        instruction.add_operand(true_label_id);
        instruction.add_operand(false_label_id);
        instruction
    }

    pub(super) fn switch(selector_id: Word, default_label_id: Word, cases: &[(Word, Word)]) -> Self {
        let mut instruction = Instruction::new(Op::Switch);
        instruction.add_operand(selector_id);
        instruction.add_operand(default_label_id);
        for &(literal, label) in cases {
            instruction.add_operand(literal);
            instruction.add_operand(label);
        }
        instruction
    }

    pub(super) fn selection_merge(
        merge_label_id: Word,
        control: spirv::SelectionControl,
    ) -> Self {
        let mut instruction = Instruction::new(Op::SelectionMerge);
        instruction.add_operand(merge_label_id);
        instruction.add_operand(control.bits());
        instruction
    }

    pub(super) fn loop_merge(
        merge_label_id: Word,
        continue_label_id: Word,
        control: spirv::LoopControl,
    ) -> Self {
        let mut instruction = Instruction::new(Op::LoopMerge);
        instruction.add_operand(merge_label_id);
        instruction.add_operand(continue_label_id);
        instruction.add_operand(control.bits());
        instruction
    }

    pub(super) fn return_void() -> Self {
        Instruction::new(Op::Return)
    }

    pub(super) fn return_value(value_id: Word) -> Self {
        let mut instruction = Instruction::new(Op::ReturnValue);
        instruction.add_operand(value_id);
        instruction
    }

    pub(super) fn kill() -> Self {
        Instruction::new(Op::Kill)
    }
}
