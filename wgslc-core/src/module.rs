//! The module: root of the intermediate representation.

use fnv::FnvHashMap;

use crate::arena::{Arena, Handle};
use crate::expr::Expression;
use crate::resolve::TypeResolution;
use crate::stmt::Block;
use crate::ty::{Bytes, Type, TypeArena};
use crate::AddressSpace;

/// A scalar constant value.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ScalarValue {
    Sint(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
}

/// The payload of a module-scope constant.
#[derive(PartialEq, Clone, Debug)]
pub enum ConstantInner {
    Scalar {
        width: Bytes,
        value: ScalarValue,
    },
    Composite {
        ty: Handle<Type>,
        components: Vec<Handle<Constant>>,
    },
}

/// A module-scope named constant.
#[derive(PartialEq, Clone, Debug)]
pub struct Constant {
    pub name: Option<String>,
    pub inner: ConstantInner,
}

/// An input or output with a fixed meaning for some stage.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum BuiltIn {
    // vertex
    Position,
    VertexIndex,
    InstanceIndex,
    // fragment
    FragDepth,
    FrontFacing,
    SampleIndex,
    SampleMask,
    // compute
    GlobalInvocationId,
    LocalInvocationId,
    LocalInvocationIndex,
    WorkGroupId,
    NumWorkGroups,
}

impl BuiltIn {
    /// Parse the WGSL attribute spelling.
    pub fn from_str(word: &str) -> Option<Self> {
        Some(match word {
            "position" => Self::Position,
            "vertex_index" => Self::VertexIndex,
            "instance_index" => Self::InstanceIndex,
            "frag_depth" => Self::FragDepth,
            "front_facing" => Self::FrontFacing,
            "sample_index" => Self::SampleIndex,
            "sample_mask" => Self::SampleMask,
            "global_invocation_id" => Self::GlobalInvocationId,
            "local_invocation_id" => Self::LocalInvocationId,
            "local_invocation_index" => Self::LocalInvocationIndex,
            "workgroup_id" => Self::WorkGroupId,
            "num_workgroups" => Self::NumWorkGroups,
            _ => return None,
        })
    }
}

/// How a user-defined IO value is interpolated across a primitive.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Interpolation {
    Perspective,
    Linear,
    Flat,
}

/// Where interpolation samples.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Sampling {
    Center,
    Centroid,
    Sample,
}

/// Binding of an entry-point input or output.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Binding {
    BuiltIn(BuiltIn),
    Location {
        location: u32,
        interpolation: Option<Interpolation>,
        sampling: Option<Sampling>,
    },
}

/// The `(group, binding)` pair locating a resource in the host API.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct ResourceBinding {
    pub group: u32,
    pub binding: u32,
}

/// A module-scope variable.
#[derive(PartialEq, Clone, Debug)]
pub struct GlobalVariable {
    pub name: Option<String>,
    pub space: AddressSpace,
    /// Present exactly when the variable is a host-bound resource.
    pub binding: Option<ResourceBinding>,
    pub ty: Handle<Type>,
    pub init: Option<Handle<Constant>>,
}

/// A function parameter.
#[derive(PartialEq, Clone, Debug)]
pub struct FunctionArgument {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    /// Present on entry-point parameters only.
    pub binding: Option<Binding>,
}

/// A function return value.
#[derive(PartialEq, Clone, Debug)]
pub struct FunctionResult {
    pub ty: Handle<Type>,
    /// Present on entry-point results only.
    pub binding: Option<Binding>,
}

/// A function-local variable.
#[derive(PartialEq, Clone, Debug)]
pub struct LocalVariable {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    pub init: Option<Handle<Expression>>,
}

/// A user-defined function in its lowered form.
#[derive(Clone, Debug, Default)]
pub struct Function {
    pub name: Option<String>,
    pub arguments: Vec<FunctionArgument>,
    pub result: Option<FunctionResult>,
    pub local_variables: Arena<LocalVariable>,
    /// The expression arena. Expressions reference each other by handle
    /// within this arena only.
    pub expressions: Arena<Expression>,
    /// Source names for expressions introduced by `let` bindings. Textual
    /// backends reference these by name instead of re-expanding them.
    pub named_expressions: FnvHashMap<Handle<Expression>, String>,
    /// One resolution per expression, filled in lockstep with `expressions`.
    pub expr_types: Vec<TypeResolution>,
    pub body: Block,
}

impl Function {
    /// The stored type resolution of an expression.
    pub fn resolution(&self, handle: Handle<Expression>) -> &TypeResolution {
        &self.expr_types[handle.index()]
    }

    /// The `TypeInner` of an expression, looking through the module type
    /// arena when the resolution is a handle.
    pub fn expr_inner<'a>(
        &'a self,
        types: &'a TypeArena,
        handle: Handle<Expression>,
    ) -> &'a crate::ty::TypeInner {
        self.resolution(handle).inner_with(types)
    }
}

/// Pipeline stage of an entry point.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// An exported stage entry function.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    /// Exported name. Unique per stage.
    pub name: String,
    pub stage: ShaderStage,
    /// Dispatch group size; all zeros except for compute.
    pub workgroup_size: [u32; 3],
    pub function: Handle<Function>,
}

/// The root of the intermediate representation. Built by the lowerer,
/// immutable for every downstream pass.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// All types, deduplicated structurally.
    pub types: TypeArena,
    pub constants: Arena<Constant>,
    pub global_variables: Arena<GlobalVariable>,
    pub functions: Arena<Function>,
    pub entry_points: Vec<EntryPoint>,
}

impl Module {
    /// Global variables referenced by `function`, directly or through
    /// callees, in declaration order.
    pub fn used_globals(&self, function: Handle<Function>) -> Vec<Handle<GlobalVariable>> {
        let mut used = vec![false; self.global_variables.len()];
        let mut visited = vec![false; self.functions.len()];
        self.collect_globals(function, &mut used, &mut visited);
        used.iter()
            .enumerate()
            .filter(|&(_, &u)| u)
            .map(|(i, _)| Handle::from_usize(i))
            .collect()
    }

    fn collect_globals(
        &self,
        function: Handle<Function>,
        used: &mut [bool],
        visited: &mut [bool],
    ) {
        if visited[function.index()] {
            return;
        }
        visited[function.index()] = true;
        for (_, expr) in self.functions[function].expressions.iter() {
            match *expr {
                Expression::GlobalVariable(handle) => used[handle.index()] = true,
                Expression::CallResult(callee) => self.collect_globals(callee, used, visited),
                _ => {}
            }
        }
        // Calls without results don't create a CallResult expression.
        self.collect_called(&self.functions[function].body, used, visited);
    }

    fn collect_called(&self, block: &Block, used: &mut [bool], visited: &mut [bool]) {
        use crate::stmt::Statement;
        for stmt in block {
            match *stmt {
                Statement::Call { function, .. } => {
                    self.collect_globals(function, used, visited)
                }
                Statement::Block(ref b) => self.collect_called(b, used, visited),
                Statement::If {
                    ref accept,
                    ref reject,
                    ..
                } => {
                    self.collect_called(accept, used, visited);
                    self.collect_called(reject, used, visited);
                }
                Statement::Switch { ref cases, .. } => {
                    for case in cases {
                        self.collect_called(&case.body, used, visited);
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    ..
                } => {
                    self.collect_called(body, used, visited);
                    self.collect_called(continuing, used, visited);
                }
                _ => {}
            }
        }
    }
}
