//! Golden scenario tests: each compiles a small WGSL shader and checks the
//! observable properties of the emitted code, decoding SPIR-V binaries at
//! the word level.

use spirv::Op;
use wgslc::spv::read::{decode, SpirvBinary};

fn compile(source: &str) -> SpirvBinary {
    let bytes = wgslc::compile(source, &wgslc::Options::default())
        .unwrap_or_else(|e| panic!("{}", e.emit_to_string(source)));
    SpirvBinary::from(bytes.as_slice())
}

fn ops(binary: &SpirvBinary) -> Vec<(Op, Vec<u32>)> {
    decode(binary).unwrap()
}

/// Result IDs of the instruction classes the writer emits, by operand
/// position.
fn result_ids(instructions: &[(Op, Vec<u32>)]) -> Vec<u32> {
    let mut ids = Vec::new();
    for &(op, ref operands) in instructions {
        match op {
            Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::TypeSampler
            | Op::TypeSampledImage
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypeStruct
            | Op::TypePointer
            | Op::TypeFunction
            | Op::Label
            | Op::ExtInstImport => ids.push(operands[0]),
            Op::Constant
            | Op::ConstantTrue
            | Op::ConstantFalse
            | Op::ConstantComposite
            | Op::ConstantNull
            | Op::Variable
            | Op::Function
            | Op::FunctionParameter
            | Op::FunctionCall
            | Op::Load
            | Op::AccessChain
            | Op::CompositeConstruct
            | Op::CompositeExtract => ids.push(operands[1]),
            _ => {}
        }
    }
    ids
}

fn is_terminator(op: Op) -> bool {
    matches!(
        op,
        Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable
    )
}

const VERTEX_SHADER: &str = "
@vertex
fn main(@builtin(vertex_index) idx: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}
";

const COMPUTE_SHADER: &str = "
@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {}
";

const ATOMIC_SHADER: &str = "
var<workgroup> shared_counter: atomic<u32>;
@group(0) @binding(0) var<storage, read_write> result: array<u32>;
@compute @workgroup_size(64)
fn main(@builtin(local_invocation_index) lid: u32) {
    if lid == 0u { atomicStore(&shared_counter, 0u); }
    workgroupBarrier();
    atomicAdd(&shared_counter, 1u);
    workgroupBarrier();
    if lid == 0u { result[0] = atomicLoad(&shared_counter); }
}
";

const SWITCH_SHADER: &str = "
fn classify(x: i32) -> i32 {
    var r: i32;
    switch x {
        case 0: { r = 0; }
        case 1, 2: { r = 1; }
        case 3, 4, 5: { r = 2; }
        default: { r = -1; }
    }
    return r;
}
";

// S1: a minimal vertex shader.
#[test]
fn minimal_vertex_shader() {
    let binary = compile(VERTEX_SHADER);
    let header = binary.header().unwrap();
    assert_eq!(header.magic, 0x0723_0203);
    assert_eq!(header.schema, 0);

    let instructions = ops(&binary);
    let entry_points: Vec<_> = instructions
        .iter()
        .filter(|&&(op, _)| op == Op::EntryPoint)
        .collect();
    assert_eq!(entry_points.len(), 1);
    let (_, ref operands) = *entry_points[0];
    assert_eq!(operands[0], spirv::ExecutionModel::Vertex as u32);
    // Operand 2 onward is the nul-padded name.
    assert_eq!(&operands[2].to_le_bytes(), b"main");

    // No execution mode for a vertex stage.
    assert!(!instructions
        .iter()
        .any(|&(op, _)| op == Op::ExecutionMode));

    // The returned value folds into a constant composite of 0, 0, 0, 1.
    let zero = 0.0f32.to_bits();
    let one = 1.0f32.to_bits();
    let scalar_ids: Vec<(u32, u32)> = instructions
        .iter()
        .filter(|&&(op, _)| op == Op::Constant)
        .map(|&(_, ref operands)| (operands[1], operands[2]))
        .collect();
    let composite = instructions
        .iter()
        .find(|&&(op, _)| op == Op::ConstantComposite)
        .expect("constant composite for the return value");
    let component_values: Vec<u32> = composite.1[2..]
        .iter()
        .map(|component| {
            scalar_ids
                .iter()
                .find(|&&(id, _)| id == *component)
                .expect("composite components are scalar constants")
                .1
        })
        .collect();
    assert_eq!(component_values, vec![zero, zero, zero, one]);
}

// S2: compute shader with a workgroup size.
#[test]
fn compute_shader_workgroup_size() {
    let binary = compile(COMPUTE_SHADER);
    let instructions = ops(&binary);
    let (_, ref ep) = *instructions
        .iter()
        .find(|&&(op, _)| op == Op::EntryPoint)
        .unwrap();
    assert_eq!(ep[0], spirv::ExecutionModel::GLCompute as u32);
    let (_, ref mode) = *instructions
        .iter()
        .find(|&&(op, _)| op == Op::ExecutionMode)
        .unwrap();
    assert_eq!(mode[1], spirv::ExecutionMode::LocalSize as u32);
    assert_eq!(&mode[2..5], &[64, 1, 1]);
}

// S3: atomics and barriers, across three backends.
#[test]
fn atomic_increment() {
    let binary = compile(ATOMIC_SHADER);
    let instructions = ops(&binary);
    let barriers = instructions
        .iter()
        .filter(|&&(op, _)| op == Op::ControlBarrier)
        .count();
    assert_eq!(barriers, 2);
    assert_eq!(
        instructions
            .iter()
            .filter(|&&(op, _)| op == Op::AtomicIAdd)
            .count(),
        1
    );
    assert!(instructions
        .iter()
        .any(|&(op, _)| op == Op::AtomicStore));

    let (module, _) = wgslc::lower(&wgslc::parse(ATOMIC_SHADER).unwrap()).unwrap();
    let (hlsl, _) = wgslc::generate_hlsl(&module, &wgslc::hlsl::Options::default()).unwrap();
    assert!(hlsl.contains("InterlockedAdd"));
    assert!(hlsl.contains("groupshared"));
    let (msl, _) = wgslc::generate_msl(&module, &wgslc::msl::Options::default()).unwrap();
    assert!(msl.contains("metal::atomic_uint"));
    assert!(msl.contains("atomic_fetch_add_explicit"));
    let (glsl, _) = wgslc::generate_glsl(
        &module,
        &wgslc::glsl::Options {
            entry_point: "main".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(glsl.contains("atomicAdd"));
    assert!(glsl.contains("barrier();"));
    assert!(glsl.contains("local_size_x = 64"));
}

// S4: switch with multiple selectors per case.
#[test]
fn switch_with_shared_bodies() {
    let binary = compile(SWITCH_SHADER);
    let instructions = ops(&binary);
    let (_, ref switch) = *instructions
        .iter()
        .find(|&&(op, _)| op == Op::Switch)
        .unwrap();
    // selector + default + six (literal, label) pairs
    assert_eq!(switch.len(), 2 + 6 * 2);

    let (module, _) = wgslc::lower(&wgslc::parse(SWITCH_SHADER).unwrap()).unwrap();
    assert_eq!(wgslc::validate(&module), vec![]);
    // Shared bodies flatten into separate, fall-through-free cases.
    let (hlsl, _) = wgslc::generate_hlsl(&module, &wgslc::hlsl::Options::default()).unwrap();
    assert!(hlsl.contains("switch"));
    assert!(hlsl.contains("case 1:"));
    assert!(hlsl.contains("case 2:"));
    assert!(hlsl.contains("default:"));
}

// S5: forward function references.
#[test]
fn forward_function_reference() {
    let binary = compile("fn main() { helper(); } fn helper() {}");
    let instructions = ops(&binary);
    let function_ids: Vec<u32> = instructions
        .iter()
        .filter(|&&(op, _)| op == Op::Function)
        .map(|&(_, ref operands)| operands[1])
        .collect();
    assert_eq!(function_ids.len(), 2);
    let (_, ref call) = *instructions
        .iter()
        .find(|&&(op, _)| op == Op::FunctionCall)
        .unwrap();
    assert!(function_ids.contains(&call[2]));
}

// S6: unused-variable warning, non-fatal.
#[test]
fn unused_variable_warning() {
    let source = "fn f() { let unused = 1; let _keep = 2; }";
    let (bytes, warnings) =
        wgslc::compile_with_warnings(source, &wgslc::Options::default()).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].to_string().contains("unused"));
    assert!(!warnings[0].to_string().contains("_keep"));
}

// T5 (approximated): the header bound is larger than any result id in use.
#[test]
fn id_bound_covers_all_results() {
    for source in [VERTEX_SHADER, COMPUTE_SHADER, ATOMIC_SHADER, SWITCH_SHADER] {
        let binary = compile(source);
        let bound = binary.header().unwrap().bound;
        for id in result_ids(&ops(&binary)) {
            assert!(id < bound, "id {} exceeds bound {}", id, bound);
        }
    }
}

// T6: every basic block ends with exactly one terminator.
#[test]
fn blocks_terminate_exactly_once() {
    for source in [VERTEX_SHADER, COMPUTE_SHADER, ATOMIC_SHADER, SWITCH_SHADER] {
        let instructions = ops(&compile(source));
        let mut in_block = false;
        for &(op, _) in &instructions {
            match op {
                Op::Label => {
                    assert!(!in_block, "label inside an unterminated block");
                    in_block = true;
                }
                Op::FunctionEnd => {
                    assert!(!in_block, "function ends inside an unterminated block");
                }
                _ if is_terminator(op) => {
                    assert!(in_block, "terminator outside of a block");
                    in_block = false;
                }
                _ => {}
            }
        }
    }
}

// T7: merge instructions immediately precede their branch.
#[test]
fn merges_are_followed_by_branches() {
    for source in [ATOMIC_SHADER, SWITCH_SHADER] {
        let instructions = ops(&compile(source));
        for window in instructions.windows(2) {
            let (op, _) = window[0];
            if op == Op::SelectionMerge {
                assert!(matches!(
                    window[1].0,
                    Op::BranchConditional | Op::Switch
                ));
            }
            if op == Op::LoopMerge {
                assert!(matches!(
                    window[1].0,
                    Op::Branch | Op::BranchConditional
                ));
            }
        }
    }
}

// T8: the interface of an entry point covers its IO variables.
#[test]
fn entry_point_interface_lists_io_variables() {
    let binary = compile(VERTEX_SHADER);
    let mut interface_ids = Vec::new();
    let mut io_variables = Vec::new();
    for instr in binary.instrs().unwrap() {
        let instr = instr.unwrap();
        match instr.op().unwrap() {
            Op::EntryPoint => {
                let mut operands = instr.operands();
                operands.read_u32().unwrap();
                operands.read_u32().unwrap();
                operands.read_str().unwrap();
                interface_ids = operands.read_rest().to_vec();
            }
            Op::Variable => {
                let words = instr.words();
                let class = words[3];
                if class == spirv::StorageClass::Input as u32
                    || class == spirv::StorageClass::Output as u32
                {
                    io_variables.push(words[2]);
                }
            }
            _ => {}
        }
    }
    // One input (vertex index), one output (position).
    assert_eq!(io_variables.len(), 2);
    for id in io_variables {
        assert!(interface_ids.contains(&id));
    }
}

// R2: compilation is deterministic, byte for byte.
#[test]
fn compilation_is_deterministic() {
    for source in [VERTEX_SHADER, ATOMIC_SHADER] {
        let first = wgslc::compile(source, &wgslc::Options::default()).unwrap();
        let second = wgslc::compile(source, &wgslc::Options::default()).unwrap();
        assert_eq!(first, second);

        let (module, _) = wgslc::lower(&wgslc::parse(source).unwrap()).unwrap();
        let (msl_a, _) = wgslc::generate_msl(&module, &wgslc::msl::Options::default()).unwrap();
        let (msl_b, _) = wgslc::generate_msl(&module, &wgslc::msl::Options::default()).unwrap();
        assert_eq!(msl_a, msl_b);
        let (hlsl_a, _) =
            wgslc::generate_hlsl(&module, &wgslc::hlsl::Options::default()).unwrap();
        let (hlsl_b, _) =
            wgslc::generate_hlsl(&module, &wgslc::hlsl::Options::default()).unwrap();
        assert_eq!(hlsl_a, hlsl_b);
    }
}

// Textual backends shape the vertex entry point per their conventions.
#[test]
fn textual_backends_shape_entry_points() {
    let (module, _) = wgslc::lower(&wgslc::parse(VERTEX_SHADER).unwrap()).unwrap();

    let (msl, info) = wgslc::generate_msl(&module, &wgslc::msl::Options::default()).unwrap();
    assert!(msl.contains("#include <metal_stdlib>"));
    assert!(msl.contains("using metal::uint;"));
    assert!(msl.starts_with("#include"));
    assert!(msl.contains("vertex "));
    assert!(msl.contains("[[position]]"));
    assert!(msl.contains("[[vertex_id]]"));
    assert_eq!(info.entry_point_names, vec!["main".to_string()]);
    assert!(!info.requires_sizes_buffer);

    let (glsl, _) = wgslc::generate_glsl(
        &module,
        &wgslc::glsl::Options {
            entry_point: "main".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(glsl.starts_with("#version 450 core"));
    assert!(glsl.contains("void main()"));
    assert!(glsl.contains("gl_Position"));
    assert!(glsl.contains("gl_VertexID"));

    let (hlsl, _) = wgslc::generate_hlsl(&module, &wgslc::hlsl::Options::default()).unwrap();
    assert!(hlsl.contains("SV_Position"));
    assert!(hlsl.contains("SV_VertexID"));
    assert!(hlsl.contains("float4"));
}

// Selecting a missing entry point is an error, not a panic.
#[test]
fn unknown_glsl_entry_point_is_an_error() {
    let (module, _) = wgslc::lower(&wgslc::parse(VERTEX_SHADER).unwrap()).unwrap();
    let result = wgslc::generate_glsl(
        &module,
        &wgslc::glsl::Options {
            entry_point: "missing".to_string(),
            ..Default::default()
        },
    );
    assert!(result.is_err());
}
