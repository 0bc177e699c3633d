//! Word-level reading of SPIR-V binaries.
//!
//! The writer's inverse, in miniature: enough decoding to walk a module
//! instruction by instruction. Unit and scenario tests use it to check the
//! structure of emitted binaries without a full disassembler.

use num_traits::FromPrimitive;
use spirv::Op;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReadError {
    #[error("binary is shorter than the five-word header")]
    TruncatedHeader,
    #[error("instruction length is zero")]
    ZeroLengthInstruction,
    #[error("instruction is truncated")]
    TruncatedInstruction,
    #[error("opcode {0} is not a known instruction")]
    UnknownOpcode(u32),
}

/// The five-word module header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}

/// A SPIR-V program binary, stored as words.
#[derive(Clone, Debug, Default)]
pub struct SpirvBinary(Vec<u32>);

impl From<Vec<u32>> for SpirvBinary {
    fn from(words: Vec<u32>) -> Self {
        SpirvBinary(words)
    }
}

impl From<&[u8]> for SpirvBinary {
    /// Reassemble words from bytes, inferring endianness from the magic
    /// number's leading byte.
    fn from(bytes: &[u8]) -> Self {
        if bytes.len() < 4 {
            return SpirvBinary::default();
        }
        let from_bytes = match bytes[0] {
            0x03 => u32::from_le_bytes,
            0x07 => u32::from_be_bytes,
            _ => return SpirvBinary::default(),
        };
        bytes
            .chunks_exact(4)
            .map(|chunk| from_bytes(chunk.try_into().unwrap()))
            .collect::<Vec<u32>>()
            .into()
    }
}

impl SpirvBinary {
    pub fn words(&self) -> &[u32] {
        &self.0
    }

    pub fn header(&self) -> Result<Header, ReadError> {
        if self.0.len() < 5 {
            return Err(ReadError::TruncatedHeader);
        }
        Ok(Header {
            magic: self.0[0],
            version: self.0[1],
            generator: self.0[2],
            bound: self.0[3],
            schema: self.0[4],
        })
    }

    /// Iterate over the instructions after the header.
    pub fn instrs(&self) -> Result<Instrs<'_>, ReadError> {
        if self.0.len() < 5 {
            return Err(ReadError::TruncatedHeader);
        }
        Ok(Instrs { inner: &self.0[5..] })
    }
}

/// Iterator over the instruction words of a module.
pub struct Instrs<'a> {
    inner: &'a [u32],
}

impl<'a> Iterator for Instrs<'a> {
    type Item = Result<Instr<'a>, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let head = *self.inner.first()?;
        let len = (head >> 16) as usize;
        if len == 0 {
            self.inner = &[];
            return Some(Err(ReadError::ZeroLengthInstruction));
        }
        if len > self.inner.len() {
            self.inner = &[];
            return Some(Err(ReadError::TruncatedInstruction));
        }
        let (words, rest) = self.inner.split_at(len);
        self.inner = rest;
        Some(Ok(Instr { words }))
    }
}

/// One decoded instruction.
#[derive(Clone, Copy, Debug)]
pub struct Instr<'a> {
    words: &'a [u32],
}

impl<'a> Instr<'a> {
    pub fn opcode(&self) -> u32 {
        self.words[0] & 0xFFFF
    }

    pub fn op(&self) -> Result<Op, ReadError> {
        Op::from_u32(self.opcode()).ok_or(ReadError::UnknownOpcode(self.opcode()))
    }

    /// All words including the leading count/opcode word.
    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    /// An operand reader positioned after the opcode word.
    pub fn operands(&self) -> Operands<'a> {
        Operands(&self.words[1..])
    }
}

/// Cursor over an instruction's operand words.
pub struct Operands<'a>(&'a [u32]);

impl<'a> Operands<'a> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let (&first, rest) = self.0.split_first()?;
        self.0 = rest;
        Some(first)
    }

    /// Read a nul-terminated, word-padded string operand.
    pub fn read_str(&mut self) -> Option<String> {
        let mut bytes = Vec::new();
        let mut consumed = 0;
        'words: for &word in self.0 {
            consumed += 1;
            for byte in word.to_le_bytes() {
                if byte == 0 {
                    break 'words;
                }
                bytes.push(byte);
            }
        }
        self.0 = &self.0[consumed..];
        String::from_utf8(bytes).ok()
    }

    /// Remaining operands, consumed as a raw word slice.
    pub fn read_rest(&mut self) -> &'a [u32] {
        std::mem::take(&mut self.0)
    }
}

/// Collect `(op, operand words)` for every instruction; a convenience for
/// tests.
pub fn decode(binary: &SpirvBinary) -> Result<Vec<(Op, Vec<u32>)>, ReadError> {
    binary
        .instrs()?
        .map(|instr| {
            let instr = instr?;
            Ok((instr.op()?, instr.words()[1..].to_vec()))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_back_a_tiny_module() {
        // OpCapability Shader; OpMemoryModel Logical GLSL450.
        let words = vec![
            0x0723_0203,
            0x0001_0000,
            0,
            10,
            0,
            (2 << 16) | Op::Capability as u32,
            spirv::Capability::Shader as u32,
            (3 << 16) | Op::MemoryModel as u32,
            spirv::AddressingModel::Logical as u32,
            spirv::MemoryModel::GLSL450 as u32,
        ];
        let binary = SpirvBinary::from(words);
        let header = binary.header().unwrap();
        assert_eq!(header.magic, 0x0723_0203);
        assert_eq!(header.bound, 10);
        let ops: Vec<Op> = binary
            .instrs()
            .unwrap()
            .map(|i| i.unwrap().op().unwrap())
            .collect();
        assert_eq!(ops, vec![Op::Capability, Op::MemoryModel]);
    }

    #[test]
    fn byte_order_is_inferred() {
        let words = vec![0x0723_0203u32, 0, 0, 1, 0];
        let mut le = Vec::new();
        for word in &words {
            le.extend_from_slice(&word.to_le_bytes());
        }
        let binary = SpirvBinary::from(le.as_slice());
        assert_eq!(binary.words(), &words[..]);
    }

    #[test]
    fn string_operands_round_trip() {
        let mut instruction = crate::spv::Instruction::new(Op::Name);
        instruction.add_operand(7);
        instruction.add_string("entry");
        let mut words = Vec::new();
        instruction.to_words(&mut words);
        let instr = Instr { words: &words };
        let mut operands = instr.operands();
        assert_eq!(operands.read_u32(), Some(7));
        assert_eq!(operands.read_str().as_deref(), Some("entry"));
    }
}
