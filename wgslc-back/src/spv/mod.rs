//! SPIR-V binary backend.
//!
//! The writer assembles a module out of the fixed SPIR-V sections:
//! capabilities, extension imports, memory model, entry points, execution
//! modes, debug names, annotations, declarations, and function bodies. All
//! result IDs come from one monotonically increasing generator, so the final
//! bound is simply one past the last ID handed out.

mod instructions;
mod layout;
pub mod read;
mod writer;

pub use read::{Instrs, SpirvBinary};
pub use spirv::Capability;

use spirv::Word;
use thiserror::Error;

use wgslc_core::{Handle, Module, Type};

/// The five-word module header.
struct PhysicalLayout {
    magic_number: Word,
    version: Word,
    generator: Word,
    bound: Word,
    instruction_schema: Word,
}

/// SPIR-V magic, stored and written in little-endian order.
pub const MAGIC_NUMBER: Word = 0x0723_0203;

impl PhysicalLayout {
    fn new(version: (u8, u8)) -> Self {
        PhysicalLayout {
            magic_number: MAGIC_NUMBER,
            version: ((version.0 as u32) << 16) | ((version.1 as u32) << 8),
            generator: 0,
            bound: 0,
            instruction_schema: 0,
        }
    }

    fn in_words(&self, sink: &mut Vec<Word>) {
        sink.push(self.magic_number);
        sink.push(self.version);
        sink.push(self.generator);
        sink.push(self.bound);
        sink.push(self.instruction_schema);
    }
}

/// The instruction sections, in the order the specification requires them to
/// be concatenated.
#[derive(Default)]
struct LogicalLayout {
    capabilities: Vec<Word>,
    extensions: Vec<Word>,
    ext_inst_imports: Vec<Word>,
    memory_model: Vec<Word>,
    entry_points: Vec<Word>,
    execution_modes: Vec<Word>,
    debugs: Vec<Word>,
    annotations: Vec<Word>,
    declarations: Vec<Word>,
    function_definitions: Vec<Word>,
}

impl LogicalLayout {
    fn in_words(&self, sink: &mut Vec<Word>) {
        sink.extend(&self.capabilities);
        sink.extend(&self.extensions);
        sink.extend(&self.ext_inst_imports);
        sink.extend(&self.memory_model);
        sink.extend(&self.entry_points);
        sink.extend(&self.execution_modes);
        sink.extend(&self.debugs);
        sink.extend(&self.annotations);
        sink.extend(&self.declarations);
        sink.extend(&self.function_definitions);
    }
}

/// One instruction under construction.
pub(crate) struct Instruction {
    op: spirv::Op,
    wc: u32,
    type_id: Option<Word>,
    result_id: Option<Word>,
    operands: Vec<Word>,
}

#[derive(Default)]
struct IdGenerator(Word);

impl IdGenerator {
    fn next(&mut self) -> Word {
        self.0 += 1;
        self.0
    }
}

/// A basic block under construction. Every finished block carries exactly
/// one terminator.
struct Block {
    label_id: Word,
    body: Vec<Instruction>,
    termination: Option<Instruction>,
}

impl Block {
    fn new(label_id: Word) -> Self {
        Block {
            label_id,
            body: Vec::new(),
            termination: None,
        }
    }
}

bitflags::bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    pub struct WriterFlags: u32 {
        /// Include `OpName`/`OpSource` debug instructions.
        const DEBUG = 0x1;
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    /// (Major, Minor) target version of the SPIR-V binary.
    pub lang_version: (u8, u8),
    pub flags: WriterFlags,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lang_version: (1, 0),
            flags: WriterFlags::empty(),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("target SPIR-V {0}.{1} is not supported")]
    UnsupportedVersion(u8, u8),
    #[error("feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),
    #[error("module is not valid: {0}")]
    Validation(&'static str),
    #[error("type {0:?} cannot be emitted here")]
    UnexpectedType(Handle<Type>),
}

/// Write `module` to a vector of SPIR-V words.
pub fn write_vec(module: &Module, options: &Options) -> Result<Vec<Word>, Error> {
    let mut words = Vec::new();
    let mut writer = writer::Writer::new(options)?;
    writer.write(module, &mut words)?;
    Ok(words)
}

/// Write `module` to SPIR-V bytes in little-endian word order, the encoding
/// every Vulkan loader accepts.
pub fn write_bytes(module: &Module, options: &Options) -> Result<Vec<u8>, Error> {
    let words = write_vec(module, options)?;
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    Ok(bytes)
}
