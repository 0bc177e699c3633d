//! Module validation.
//!
//! Runs after lowering and before emission. Each check appends to an error
//! list instead of aborting, so a single pass reports every violated
//! constraint; callers typically surface the first.

use thiserror::Error;

use crate::arena::Handle;
use crate::expr::Expression;
use crate::module::{
    Binding, BuiltIn, EntryPoint, Function, Module, ResourceBinding, ShaderStage,
};
use crate::stmt::{Block, Statement, SwitchValue};
use crate::ty::{AddressSpace, ArraySize, TypeInner};

bitflags::bitflags! {
    /// Which groups of checks to run.
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    pub struct ValidationFlags: u32 {
        const HANDLES = 0x1;
        const TYPES = 0x2;
        const CONTROL_FLOW = 0x4;
        const BINDINGS = 0x8;
        const ENTRY_POINTS = 0x10;
    }
}

impl Default for ValidationFlags {
    fn default() -> Self {
        ValidationFlags::all()
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{kind} handle {index} is out of bounds in {context}")]
    InvalidHandle {
        kind: &'static str,
        index: usize,
        context: String,
    },
    #[error("function {function}: expression type table has {types} entries for {expressions} expressions")]
    ExpressionTypeCount {
        function: String,
        expressions: usize,
        types: usize,
    },
    #[error("function {function}: emit range is out of bounds")]
    EmitRangeOutOfBounds { function: String },
    #[error("function {function}: store target is not a pointer")]
    StoreToNonPointer { function: String },
    #[error("function {function}: store of a value whose type does not match the destination")]
    StoreTypeMismatch { function: String },
    #[error("function {function}: atomic operation on a non-atomic pointer")]
    AtomicOperandNotAtomic { function: String },
    #[error("function {function}: return value does not match the declared result type")]
    ReturnTypeMismatch { function: String },
    #[error("function {function}: call to {callee} passes {found} arguments, expected {expected}")]
    CallArgumentCount {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("function {function}: argument {index} of call to {callee} has the wrong type")]
    CallArgumentType {
        function: String,
        callee: String,
        index: usize,
    },
    #[error("function {function}: `break` outside of a loop or switch")]
    BreakOutsideOfLoopOrSwitch { function: String },
    #[error("function {function}: `continue` outside of a loop body")]
    ContinueOutsideOfLoop { function: String },
    #[error("function {function}: `return` inside a continuing block")]
    ReturnInContinuing { function: String },
    #[error("function {function}: switch has {count} default selectors, expected exactly one")]
    SwitchDefaultCount { function: String, count: usize },
    #[error("function {function}: ray queries are not supported")]
    RayQueryUnsupported { function: String },
    #[error("global {0}: resource variables require a group/binding annotation")]
    MissingBinding(String),
    #[error("global {0}: variables in the {1} address space cannot carry a binding")]
    UnexpectedBinding(String, AddressSpace),
    #[error("globals {0} and {1} share binding (group={2}, binding={3})")]
    BindingCollision(String, String, u32, u32),
    #[error("global {0}: images and samplers must live in the handle address space")]
    HandleTypeOutsideHandleSpace(String),
    #[error("global {0}: the handle address space only holds images and samplers")]
    NonHandleTypeInHandleSpace(String),
    #[error("global {0}: runtime-sized arrays are only allowed in the storage address space")]
    RuntimeArrayOutsideStorage(String),
    #[error("entry point {0}: duplicate entry point for this name and stage")]
    DuplicateEntryPoint(String),
    #[error("entry point {0}: compute entry points require a non-zero workgroup size")]
    ZeroWorkgroupSize(String),
    #[error("entry point {0}: compute entry points must not return a value")]
    ComputeEntryPointReturns(String),
    #[error("entry point {0}: vertex entry points must produce a `position` builtin output")]
    MissingVertexPosition(String),
    #[error("entry point {0}: parameter `{1}` has no builtin or location binding")]
    UnboundEntryPointParameter(String, String),
    #[error("entry point {0}: output has no builtin or location binding")]
    UnboundEntryPointResult(String),
    #[error("entry point {0}: builtin {1:?} is not available for this stage and direction")]
    InvalidBuiltInForStage(String, BuiltIn),
}

/// The validator. Reusable across modules; scratch state is cleared per run.
#[derive(Debug, Default)]
pub struct Validator {
    flags: ValidationFlags,
    errors: Vec<ValidationError>,
}

struct FlowContext {
    in_loop: bool,
    in_switch: bool,
    in_continuing: bool,
}

impl Validator {
    pub fn new(flags: ValidationFlags) -> Self {
        Validator {
            flags,
            errors: Vec::new(),
        }
    }

    /// Validate `module`, returning every violation found. An empty list
    /// means the module is well-formed enough to emit.
    pub fn validate(&mut self, module: &Module) -> Vec<ValidationError> {
        log::trace!(
            "validating module: {} types, {} functions, {} entry points",
            module.types.len(),
            module.functions.len(),
            module.entry_points.len()
        );
        self.errors.clear();
        if self.flags.contains(ValidationFlags::HANDLES) {
            self.check_handles(module);
        }
        // Everything below indexes arenas, so bail if handles are broken.
        if !self.errors.is_empty() {
            return std::mem::take(&mut self.errors);
        }
        if self.flags.contains(ValidationFlags::TYPES) {
            for (handle, function) in module.functions.iter() {
                self.check_function_types(module, handle, function);
            }
        }
        if self.flags.contains(ValidationFlags::CONTROL_FLOW) {
            for (_, function) in module.functions.iter() {
                let ctx = FlowContext {
                    in_loop: false,
                    in_switch: false,
                    in_continuing: false,
                };
                self.check_flow(&function_name(function), &function.body, &ctx);
            }
        }
        if self.flags.contains(ValidationFlags::BINDINGS) {
            self.check_bindings(module);
        }
        if self.flags.contains(ValidationFlags::ENTRY_POINTS) {
            self.check_entry_points(module);
        }
        std::mem::take(&mut self.errors)
    }

    fn check_handles(&mut self, module: &Module) {
        for (handle, ty) in module.types.iter() {
            let context = format!("type {:?}", handle);
            match ty.inner {
                TypeInner::Pointer { base, .. } | TypeInner::Array { base, .. } => {
                    self.check_type_handle(module, base, &context);
                }
                TypeInner::Struct { ref members, .. } => {
                    for member in members {
                        self.check_type_handle(module, member.ty, &context);
                    }
                }
                _ => {}
            }
        }
        for (handle, constant) in module.constants.iter() {
            let context = format!("constant {:?}", handle);
            if let crate::module::ConstantInner::Composite { ty, ref components } = constant.inner
            {
                self.check_type_handle(module, ty, &context);
                for &component in components {
                    if !module.constants.check_contains(component) {
                        self.errors.push(ValidationError::InvalidHandle {
                            kind: "constant",
                            index: component.index(),
                            context: context.clone(),
                        });
                    }
                }
            }
        }
        for (handle, var) in module.global_variables.iter() {
            let context = format!("global {:?}", handle);
            self.check_type_handle(module, var.ty, &context);
            if let Some(init) = var.init {
                if !module.constants.check_contains(init) {
                    self.errors.push(ValidationError::InvalidHandle {
                        kind: "constant",
                        index: init.index(),
                        context,
                    });
                }
            }
        }
        for (_, function) in module.functions.iter() {
            self.check_function_handles(module, function);
        }
        for ep in &module.entry_points {
            if !module.functions.check_contains(ep.function) {
                self.errors.push(ValidationError::InvalidHandle {
                    kind: "function",
                    index: ep.function.index(),
                    context: format!("entry point {}", ep.name),
                });
            }
        }
    }

    fn check_type_handle(
        &mut self,
        module: &Module,
        handle: Handle<crate::ty::Type>,
        context: &str,
    ) {
        if !module.types.check_contains(handle) {
            self.errors.push(ValidationError::InvalidHandle {
                kind: "type",
                index: handle.index(),
                context: context.to_string(),
            });
        }
    }

    fn check_function_handles(&mut self, module: &Module, function: &Function) {
        let name = function_name(function);
        let context = format!("function {}", name);
        for arg in &function.arguments {
            self.check_type_handle(module, arg.ty, &context);
        }
        if let Some(ref result) = function.result {
            self.check_type_handle(module, result.ty, &context);
        }
        for (_, var) in function.local_variables.iter() {
            self.check_type_handle(module, var.ty, &context);
            if let Some(init) = var.init {
                self.check_expr_handle(function, init, &context);
            }
        }
        if function.expr_types.len() != function.expressions.len() {
            self.errors.push(ValidationError::ExpressionTypeCount {
                function: name.clone(),
                expressions: function.expressions.len(),
                types: function.expr_types.len(),
            });
        }
        for (_, expr) in function.expressions.iter() {
            self.check_expression_handles(module, function, expr, &context);
        }
        self.check_block_handles(module, function, &function.body, &name, &context);
    }

    fn check_expr_handle(
        &mut self,
        function: &Function,
        handle: Handle<Expression>,
        context: &str,
    ) {
        if !function.expressions.check_contains(handle) {
            self.errors.push(ValidationError::InvalidHandle {
                kind: "expression",
                index: handle.index(),
                context: context.to_string(),
            });
        }
    }

    fn check_expression_handles(
        &mut self,
        module: &Module,
        function: &Function,
        expr: &Expression,
        context: &str,
    ) {
        use crate::expr::SampleLevel;
        let mut exprs: Vec<Handle<Expression>> = Vec::new();
        match *expr {
            Expression::Literal(_) | Expression::FunctionArgument(_) => {}
            Expression::Constant(handle) => {
                if !module.constants.check_contains(handle) {
                    self.errors.push(ValidationError::InvalidHandle {
                        kind: "constant",
                        index: handle.index(),
                        context: context.to_string(),
                    });
                }
            }
            Expression::ZeroValue(ty) => self.check_type_handle(module, ty, context),
            Expression::Compose { ty, ref components } => {
                self.check_type_handle(module, ty, context);
                exprs.extend_from_slice(components);
            }
            Expression::Splat { value, .. } => exprs.push(value),
            Expression::Access { base, index } => exprs.extend([base, index]),
            Expression::AccessIndex { base, .. } => exprs.push(base),
            Expression::Swizzle { vector, .. } => exprs.push(vector),
            Expression::GlobalVariable(handle) => {
                if !module.global_variables.check_contains(handle) {
                    self.errors.push(ValidationError::InvalidHandle {
                        kind: "global variable",
                        index: handle.index(),
                        context: context.to_string(),
                    });
                }
            }
            Expression::LocalVariable(handle) => {
                if !function.local_variables.check_contains(handle) {
                    self.errors.push(ValidationError::InvalidHandle {
                        kind: "local variable",
                        index: handle.index(),
                        context: context.to_string(),
                    });
                }
            }
            Expression::Load { pointer } => exprs.push(pointer),
            Expression::Unary { expr, .. } => exprs.push(expr),
            Expression::Binary { left, right, .. } => exprs.extend([left, right]),
            Expression::Math {
                arg,
                arg1,
                arg2,
                arg3,
                ..
            } => {
                exprs.push(arg);
                exprs.extend(arg1);
                exprs.extend(arg2);
                exprs.extend(arg3);
            }
            Expression::Relational { argument, .. } => exprs.push(argument),
            Expression::Select {
                condition,
                accept,
                reject,
            } => exprs.extend([condition, accept, reject]),
            Expression::As { expr, .. } => exprs.push(expr),
            Expression::Derivative { expr, .. } => exprs.push(expr),
            Expression::ImageSample {
                image,
                sampler,
                coordinate,
                array_index,
                offset,
                ref level,
                depth_ref,
                ..
            } => {
                exprs.extend([image, sampler, coordinate]);
                exprs.extend(array_index);
                exprs.extend(depth_ref);
                if let Some(offset) = offset {
                    if !module.constants.check_contains(offset) {
                        self.errors.push(ValidationError::InvalidHandle {
                            kind: "constant",
                            index: offset.index(),
                            context: context.to_string(),
                        });
                    }
                }
                match *level {
                    SampleLevel::Auto | SampleLevel::Zero => {}
                    SampleLevel::Exact(h) | SampleLevel::Bias(h) => exprs.push(h),
                    SampleLevel::Gradient { x, y } => exprs.extend([x, y]),
                }
            }
            Expression::ImageLoad {
                image,
                coordinate,
                array_index,
                sample,
                level,
            } => {
                exprs.extend([image, coordinate]);
                exprs.extend(array_index);
                exprs.extend(sample);
                exprs.extend(level);
            }
            Expression::ImageQuery { image, ref query } => {
                exprs.push(image);
                if let crate::expr::ImageQuery::Size { level: Some(level) } = *query {
                    exprs.push(level);
                }
            }
            Expression::CallResult(callee) => {
                if !module.functions.check_contains(callee) {
                    self.errors.push(ValidationError::InvalidHandle {
                        kind: "function",
                        index: callee.index(),
                        context: context.to_string(),
                    });
                }
            }
            Expression::AtomicResult { ty, .. } => self.check_type_handle(module, ty, context),
            Expression::ArrayLength(expr) => exprs.push(expr),
        }
        for handle in exprs {
            self.check_expr_handle(function, handle, context);
        }
    }

    fn check_block_handles(
        &mut self,
        module: &Module,
        function: &Function,
        block: &Block,
        name: &str,
        context: &str,
    ) {
        for stmt in block {
            let mut exprs: Vec<Handle<Expression>> = Vec::new();
            match *stmt {
                Statement::Emit(ref range) => {
                    if range.index_range().end > function.expressions.len() {
                        self.errors.push(ValidationError::EmitRangeOutOfBounds {
                            function: name.to_string(),
                        });
                    }
                }
                Statement::Block(ref b) => {
                    self.check_block_handles(module, function, b, name, context)
                }
                Statement::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    exprs.push(condition);
                    self.check_block_handles(module, function, accept, name, context);
                    self.check_block_handles(module, function, reject, name, context);
                }
                Statement::Switch { selector, ref cases } => {
                    exprs.push(selector);
                    for case in cases {
                        self.check_block_handles(module, function, &case.body, name, context);
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => {
                    exprs.extend(break_if);
                    self.check_block_handles(module, function, body, name, context);
                    self.check_block_handles(module, function, continuing, name, context);
                }
                Statement::Break | Statement::Continue | Statement::Kill => {}
                Statement::Return { value } => exprs.extend(value),
                Statement::Store { pointer, value } => exprs.extend([pointer, value]),
                Statement::ImageStore {
                    image,
                    coordinate,
                    array_index,
                    value,
                } => {
                    exprs.extend([image, coordinate, value]);
                    exprs.extend(array_index);
                }
                Statement::Atomic {
                    pointer,
                    ref fun,
                    value,
                    result,
                } => {
                    exprs.extend([pointer, value, result]);
                    if let crate::stmt::AtomicFunction::Exchange {
                        compare: Some(compare),
                    } = *fun
                    {
                        exprs.push(compare);
                    }
                }
                Statement::Barrier(_) => {}
                Statement::Call {
                    function: callee,
                    ref arguments,
                    result,
                } => {
                    if !module.functions.check_contains(callee) {
                        self.errors.push(ValidationError::InvalidHandle {
                            kind: "function",
                            index: callee.index(),
                            context: context.to_string(),
                        });
                    }
                    exprs.extend_from_slice(arguments);
                    exprs.extend(result);
                }
                Statement::WorkGroupUniformLoad { pointer, result } => {
                    exprs.extend([pointer, result]);
                }
                Statement::RayQuery { query } => exprs.push(query),
            }
            for handle in exprs {
                self.check_expr_handle(function, handle, context);
            }
        }
    }

    fn check_function_types(
        &mut self,
        module: &Module,
        handle: Handle<Function>,
        function: &Function,
    ) {
        let name = function_name(function);
        self.check_block_types(module, handle, function, &function.body, &name);
    }

    fn check_block_types(
        &mut self,
        module: &Module,
        fun_handle: Handle<Function>,
        function: &Function,
        block: &Block,
        name: &str,
    ) {
        for stmt in block {
            match *stmt {
                Statement::Block(ref b) => {
                    self.check_block_types(module, fun_handle, function, b, name)
                }
                Statement::If {
                    ref accept,
                    ref reject,
                    ..
                } => {
                    self.check_block_types(module, fun_handle, function, accept, name);
                    self.check_block_types(module, fun_handle, function, reject, name);
                }
                Statement::Switch { ref cases, .. } => {
                    let defaults = cases
                        .iter()
                        .flat_map(|case| &case.values)
                        .filter(|&&v| v == SwitchValue::Default)
                        .count();
                    if defaults != 1 {
                        self.errors.push(ValidationError::SwitchDefaultCount {
                            function: name.to_string(),
                            count: defaults,
                        });
                    }
                    for case in cases {
                        self.check_block_types(module, fun_handle, function, &case.body, name);
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    ..
                } => {
                    self.check_block_types(module, fun_handle, function, body, name);
                    self.check_block_types(module, fun_handle, function, continuing, name);
                }
                Statement::Store { pointer, value } => {
                    let ptr_inner = function.expr_inner(&module.types, pointer);
                    let pointee = match *ptr_inner {
                        TypeInner::Pointer { base, .. } => match module.types[base].inner {
                            // Atomic stores take the underlying scalar.
                            TypeInner::Atomic(scalar) => TypeInner::Scalar(scalar),
                            ref inner => inner.clone(),
                        },
                        TypeInner::ValuePointer {
                            size: Some(size),
                            scalar,
                            ..
                        } => TypeInner::Vector { size, scalar },
                        TypeInner::ValuePointer {
                            size: None, scalar, ..
                        } => TypeInner::Scalar(scalar),
                        _ => {
                            self.errors.push(ValidationError::StoreToNonPointer {
                                function: name.to_string(),
                            });
                            continue;
                        }
                    };
                    let value_inner = function.expr_inner(&module.types, value);
                    if pointee != *value_inner {
                        self.errors.push(ValidationError::StoreTypeMismatch {
                            function: name.to_string(),
                        });
                    }
                }
                Statement::Atomic { pointer, .. } => {
                    let ptr_inner = function.expr_inner(&module.types, pointer);
                    let is_atomic = match *ptr_inner {
                        TypeInner::Pointer { base, .. } => {
                            matches!(module.types[base].inner, TypeInner::Atomic(_))
                        }
                        _ => false,
                    };
                    if !is_atomic {
                        self.errors.push(ValidationError::AtomicOperandNotAtomic {
                            function: name.to_string(),
                        });
                    }
                }
                Statement::Return { value } => {
                    let matches = match (value, &function.result) {
                        (None, &None) => true,
                        (Some(value), &Some(ref result)) => {
                            let value_inner = function.expr_inner(&module.types, value);
                            *value_inner == module.types[result.ty].inner
                        }
                        _ => false,
                    };
                    if !matches {
                        self.errors.push(ValidationError::ReturnTypeMismatch {
                            function: name.to_string(),
                        });
                    }
                }
                Statement::Call {
                    function: callee,
                    ref arguments,
                    ..
                } => {
                    let callee_fun = &module.functions[callee];
                    let callee_name = function_name(callee_fun);
                    if arguments.len() != callee_fun.arguments.len() {
                        self.errors.push(ValidationError::CallArgumentCount {
                            function: name.to_string(),
                            callee: callee_name,
                            expected: callee_fun.arguments.len(),
                            found: arguments.len(),
                        });
                    } else {
                        for (index, (&arg, param)) in arguments
                            .iter()
                            .zip(callee_fun.arguments.iter())
                            .enumerate()
                        {
                            let arg_inner = function.expr_inner(&module.types, arg);
                            if *arg_inner != module.types[param.ty].inner {
                                self.errors.push(ValidationError::CallArgumentType {
                                    function: name.to_string(),
                                    callee: callee_name.clone(),
                                    index,
                                });
                            }
                        }
                    }
                }
                Statement::RayQuery { .. } => {
                    self.errors.push(ValidationError::RayQueryUnsupported {
                        function: name.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    fn check_flow(&mut self, name: &str, block: &Block, ctx: &FlowContext) {
        for stmt in block {
            match *stmt {
                Statement::Block(ref b) => self.check_flow(name, b, ctx),
                Statement::If {
                    ref accept,
                    ref reject,
                    ..
                } => {
                    self.check_flow(name, accept, ctx);
                    self.check_flow(name, reject, ctx);
                }
                Statement::Switch { ref cases, .. } => {
                    let inner = FlowContext {
                        in_switch: true,
                        in_loop: ctx.in_loop,
                        in_continuing: ctx.in_continuing,
                    };
                    for case in cases {
                        self.check_flow(name, &case.body, &inner);
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    ..
                } => {
                    let body_ctx = FlowContext {
                        in_loop: true,
                        in_switch: false,
                        in_continuing: false,
                    };
                    self.check_flow(name, body, &body_ctx);
                    let continuing_ctx = FlowContext {
                        in_loop: false,
                        in_switch: false,
                        in_continuing: true,
                    };
                    self.check_flow(name, continuing, &continuing_ctx);
                }
                Statement::Break => {
                    if !ctx.in_loop && !ctx.in_switch {
                        self.errors
                            .push(ValidationError::BreakOutsideOfLoopOrSwitch {
                                function: name.to_string(),
                            });
                    }
                }
                Statement::Continue => {
                    if !ctx.in_loop {
                        self.errors.push(ValidationError::ContinueOutsideOfLoop {
                            function: name.to_string(),
                        });
                    }
                }
                Statement::Return { .. } => {
                    if ctx.in_continuing {
                        self.errors.push(ValidationError::ReturnInContinuing {
                            function: name.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn check_bindings(&mut self, module: &Module) {
        let mut seen: Vec<(ResourceBinding, String)> = Vec::new();
        for (_, var) in module.global_variables.iter() {
            let name = var.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
            let inner = &module.types[var.ty].inner;
            let is_resource = matches!(
                var.space,
                AddressSpace::Uniform | AddressSpace::Storage { .. } | AddressSpace::Handle
            );
            match var.binding {
                Some(binding) if is_resource => {
                    let collision = seen
                        .iter()
                        .find(|entry| entry.0 == binding)
                        .map(|entry| entry.1.clone());
                    match collision {
                        Some(other) => self.errors.push(ValidationError::BindingCollision(
                            other,
                            name.clone(),
                            binding.group,
                            binding.binding,
                        )),
                        None => seen.push((binding, name.clone())),
                    }
                }
                Some(_) => self
                    .errors
                    .push(ValidationError::UnexpectedBinding(name.clone(), var.space)),
                None if is_resource => {
                    self.errors.push(ValidationError::MissingBinding(name.clone()))
                }
                None => {}
            }
            if inner.is_handle() && var.space != AddressSpace::Handle {
                self.errors
                    .push(ValidationError::HandleTypeOutsideHandleSpace(name.clone()));
            }
            if var.space == AddressSpace::Handle && !inner.is_handle() {
                self.errors
                    .push(ValidationError::NonHandleTypeInHandleSpace(name.clone()));
            }
            let has_runtime_array = match *inner {
                TypeInner::Array {
                    size: ArraySize::Dynamic,
                    ..
                } => true,
                TypeInner::Struct { ref members, .. } => members.iter().any(|member| {
                    matches!(
                        module.types[member.ty].inner,
                        TypeInner::Array {
                            size: ArraySize::Dynamic,
                            ..
                        }
                    )
                }),
                _ => false,
            };
            if has_runtime_array && !matches!(var.space, AddressSpace::Storage { .. }) {
                self.errors
                    .push(ValidationError::RuntimeArrayOutsideStorage(name));
            }
        }
    }

    fn check_entry_points(&mut self, module: &Module) {
        for (i, ep) in module.entry_points.iter().enumerate() {
            if module.entry_points[..i]
                .iter()
                .any(|other| other.name == ep.name && other.stage == ep.stage)
            {
                self.errors
                    .push(ValidationError::DuplicateEntryPoint(ep.name.clone()));
            }
            let function = &module.functions[ep.function];
            match ep.stage {
                ShaderStage::Compute => {
                    if ep.workgroup_size.iter().any(|&d| d == 0) {
                        self.errors
                            .push(ValidationError::ZeroWorkgroupSize(ep.name.clone()));
                    }
                    if function.result.is_some() {
                        self.errors
                            .push(ValidationError::ComputeEntryPointReturns(ep.name.clone()));
                    }
                }
                ShaderStage::Vertex => {
                    if !self.result_has_position(module, ep) {
                        self.errors
                            .push(ValidationError::MissingVertexPosition(ep.name.clone()));
                    }
                }
                ShaderStage::Fragment => {}
            }
            self.check_entry_point_io(module, ep, function);
        }
    }

    fn result_has_position(&self, module: &Module, ep: &EntryPoint) -> bool {
        let function = &module.functions[ep.function];
        let result = match function.result {
            Some(ref result) => result,
            None => return false,
        };
        match result.binding {
            Some(Binding::BuiltIn(BuiltIn::Position)) => true,
            Some(_) => false,
            None => match module.types[result.ty].inner {
                TypeInner::Struct { ref members, .. } => members.iter().any(|member| {
                    matches!(member.binding, Some(Binding::BuiltIn(BuiltIn::Position)))
                }),
                _ => false,
            },
        }
    }

    fn check_entry_point_io(&mut self, module: &Module, ep: &EntryPoint, function: &Function) {
        for arg in &function.arguments {
            let arg_name = arg.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
            match arg.binding {
                Some(Binding::BuiltIn(builtin)) => {
                    if !builtin_allowed(ep.stage, true, builtin) {
                        self.errors.push(ValidationError::InvalidBuiltInForStage(
                            ep.name.clone(),
                            builtin,
                        ));
                    }
                }
                Some(Binding::Location { .. }) => {}
                None => match module.types[arg.ty].inner {
                    TypeInner::Struct { ref members, .. } => {
                        for member in members {
                            match member.binding {
                                Some(Binding::BuiltIn(builtin)) => {
                                    if !builtin_allowed(ep.stage, true, builtin) {
                                        self.errors.push(
                                            ValidationError::InvalidBuiltInForStage(
                                                ep.name.clone(),
                                                builtin,
                                            ),
                                        );
                                    }
                                }
                                Some(Binding::Location { .. }) => {}
                                None => self.errors.push(
                                    ValidationError::UnboundEntryPointParameter(
                                        ep.name.clone(),
                                        arg_name.clone(),
                                    ),
                                ),
                            }
                        }
                    }
                    _ => self.errors.push(ValidationError::UnboundEntryPointParameter(
                        ep.name.clone(),
                        arg_name.clone(),
                    )),
                },
            }
        }
        if let Some(ref result) = function.result {
            match result.binding {
                Some(Binding::BuiltIn(builtin)) => {
                    if !builtin_allowed(ep.stage, false, builtin) {
                        self.errors.push(ValidationError::InvalidBuiltInForStage(
                            ep.name.clone(),
                            builtin,
                        ));
                    }
                }
                Some(Binding::Location { .. }) => {}
                None => match module.types[result.ty].inner {
                    TypeInner::Struct { ref members, .. } => {
                        for member in members {
                            match member.binding {
                                Some(Binding::BuiltIn(builtin)) => {
                                    if !builtin_allowed(ep.stage, false, builtin) {
                                        self.errors.push(
                                            ValidationError::InvalidBuiltInForStage(
                                                ep.name.clone(),
                                                builtin,
                                            ),
                                        );
                                    }
                                }
                                Some(Binding::Location { .. }) => {}
                                None => self.errors.push(
                                    ValidationError::UnboundEntryPointResult(ep.name.clone()),
                                ),
                            }
                        }
                    }
                    _ => self
                        .errors
                        .push(ValidationError::UnboundEntryPointResult(ep.name.clone())),
                },
            }
        }
    }
}

fn function_name(function: &Function) -> String {
    function
        .name
        .clone()
        .unwrap_or_else(|| "<unnamed>".to_string())
}

/// Which builtins are legal per stage and direction.
fn builtin_allowed(stage: ShaderStage, input: bool, builtin: BuiltIn) -> bool {
    use BuiltIn as Bi;
    match (stage, input, builtin) {
        (ShaderStage::Vertex, true, Bi::VertexIndex | Bi::InstanceIndex) => true,
        (ShaderStage::Vertex, false, Bi::Position) => true,
        (ShaderStage::Fragment, true, Bi::Position | Bi::FrontFacing | Bi::SampleIndex) => true,
        (ShaderStage::Fragment, true, Bi::SampleMask) => true,
        (ShaderStage::Fragment, false, Bi::FragDepth | Bi::SampleMask) => true,
        (
            ShaderStage::Compute,
            true,
            Bi::GlobalInvocationId
            | Bi::LocalInvocationId
            | Bi::LocalInvocationIndex
            | Bi::WorkGroupId
            | Bi::NumWorkGroups,
        ) => true,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ty::{Scalar, Type};

    #[test]
    fn empty_module_is_valid() {
        let module = Module::default();
        let errors = Validator::new(ValidationFlags::all()).validate(&module);
        assert!(errors.is_empty());
    }

    #[test]
    fn binding_collision_is_reported() {
        let mut module = Module::default();
        let ty = module.types.insert(Type {
            name: None,
            inner: TypeInner::Scalar(Scalar::F32),
        });
        for name in ["a", "b"] {
            module.global_variables.append(crate::module::GlobalVariable {
                name: Some(name.to_string()),
                space: AddressSpace::Uniform,
                binding: Some(ResourceBinding { group: 0, binding: 0 }),
                ty,
                init: None,
            });
        }
        let errors = Validator::new(ValidationFlags::all()).validate(&module);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BindingCollision(..))));
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let mut module = Module::default();
        let mut function = Function::default();
        function.name = Some("f".to_string());
        function.body.push(Statement::Break);
        module.functions.append(function);
        let errors = Validator::new(ValidationFlags::all()).validate(&module);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BreakOutsideOfLoopOrSwitch { .. })));
    }
}
