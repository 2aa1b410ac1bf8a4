//! Compiled shader stages for the console GPU instruction set.
//!
//! Each binary starts with a fixed [HEADER_SIZE] byte [IsaHeader]
//! followed by [code_size](IsaHeader::code_size) bytes of 64-bit [Instruction] words.
//! The header must be stripped before decoding instructions.
use std::io::Cursor;

use bilge::prelude::*;
use binrw::{BinRead, BinReaderExt, BinResult, BinWrite, Endian, VecArgs};

use crate::{error::MalformedBinaryError, ShaderStage};

/// The size in bytes of [IsaHeader] including the magic.
pub const HEADER_SIZE: usize = 48;

pub const MAX_REGISTERS: u32 = 256;

/// Swizzle that selects `xyzw` in order.
pub const IDENTITY_SWIZZLE: u8 = 0b11_10_01_00;

#[derive(Debug, BinRead, BinWrite, PartialEq, Clone)]
#[brw(magic(b"TBXI"))]
pub struct IsaHeader {
    pub version: u32,
    pub stage: ShaderStage,
    /// The size in bytes of the code following the header.
    pub code_size: u32,
    pub instruction_count: u32,
    /// The number of `R{i}` temporary registers.
    pub register_count: u32,
    /// Bit `i` is set if `in_attr{i}` is read.
    pub input_mask: u32,
    /// Bit `i` is set if output `i` is written.
    pub output_mask: u32,
    /// Bit `i` is set if sampler `i` is sampled.
    pub sampler_mask: u32,
    /// Bit `n` is set if constant buffer `n` is read.
    pub constant_buffer_mask: u32,
    pub reserved: [u32; 2],
}

/// A single 64-bit instruction word.
///
/// Destination channels in [dst_mask](Instruction::dst_mask) are written independently.
/// Each written channel reads the source channel selected by the corresponding swizzle.
#[bitsize(64)]
#[derive(DebugBits, TryFromBits, BinRead, BinWrite, PartialEq, Clone, Copy)]
#[br(try_map = |x: u64| x.try_into().map_err(|e| format!("{e:?}")))]
#[bw(map = |&x| u64::from(x))]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: u8,
    /// Channels `xyzw` written by this instruction starting from the least significant bit.
    pub dst_mask: u4,
    pub dst_kind: DestinationKind,
    /// The first operand or the constant buffer index for [Opcode::Ldc].
    pub src_a: u10,
    pub src_a_kind: OperandKind,
    /// Two bits per destination channel starting with `x`.
    pub swizzle_a: u8,
    pub negate_a: bool,
    /// The second operand, the `vec4` offset for [Opcode::Ldc], or the sampler for [Opcode::Tex].
    pub src_b: u10,
    pub src_b_kind: OperandKind,
    pub swizzle_b: u8,
    pub negate_b: bool,
}

#[bitsize(8)]
#[derive(Debug, TryFromBits, PartialEq, Eq, Clone, Copy)]
pub enum Opcode {
    Nop = 0x00,
    Mov = 0x01,
    Add = 0x02,
    Mul = 0x03,
    Min = 0x04,
    Max = 0x05,
    /// Reciprocal `1.0 / a`.
    Rcp = 0x06,
    /// Reciprocal square root.
    Rsq = 0x07,
    /// Four component dot product written to every channel in the mask.
    Dp4 = 0x08,
    /// Load constant `cb{a}.data[b]`.
    Ldc = 0x09,
    /// Sample 2D texture `b` at `a.xy`.
    Tex = 0x0A,
    End = 0x0F,
}

#[bitsize(2)]
#[derive(Debug, TryFromBits, PartialEq, Eq, Clone, Copy)]
pub enum DestinationKind {
    Register = 0,
    /// An exported output attribute.
    /// Vertex output 0 is the clip space position.
    Output = 1,
}

#[bitsize(2)]
#[derive(Debug, TryFromBits, PartialEq, Eq, Clone, Copy)]
pub enum OperandKind {
    Register = 0,
    Input = 1,
    /// The operand index itself as a float like `2.0`.
    Immediate = 2,
}

/// A decoded stage binary with its header and instruction words.
#[derive(Debug, PartialEq, Clone)]
pub struct IsaBinary {
    pub header: IsaHeader,
    pub instructions: Vec<Instruction>,
}

impl IsaHeader {
    /// Read the header and check its fields against the total binary size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedBinaryError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MalformedBinaryError::Truncated {
                size: bytes.len(),
                expected: HEADER_SIZE,
            });
        }

        let header: Self = Cursor::new(bytes).read_le()?;
        header.validate(bytes.len())?;
        Ok(header)
    }

    fn validate(&self, size: usize) -> Result<(), MalformedBinaryError> {
        if self.code_size as u64 != self.instruction_count as u64 * 8 {
            return Err(MalformedBinaryError::CodeSize {
                code_size: self.code_size,
                instruction_count: self.instruction_count,
            });
        }

        let expected = HEADER_SIZE + self.code_size as usize;
        if size < expected {
            return Err(MalformedBinaryError::Truncated { size, expected });
        }

        if self.register_count > MAX_REGISTERS {
            return Err(MalformedBinaryError::RegisterCount(self.register_count));
        }

        Ok(())
    }
}

/// Return the code following the fixed size header after validating the header.
pub fn strip_header(bytes: &[u8]) -> Result<&[u8], MalformedBinaryError> {
    let header = IsaHeader::from_bytes(bytes)?;
    Ok(&bytes[HEADER_SIZE..HEADER_SIZE + header.code_size as usize])
}

impl IsaBinary {
    /// Read and validate a binary including the header.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Self, MalformedBinaryError> {
        let bytes = bytes.as_ref();
        let header = IsaHeader::from_bytes(bytes)?;
        let code = strip_header(bytes)?;

        let instructions = Vec::<Instruction>::read_options(
            &mut Cursor::new(code),
            Endian::Little,
            VecArgs {
                count: header.instruction_count as usize,
                inner: (),
            },
        )?;

        for (i, instruction) in instructions.iter().enumerate() {
            for index in instruction.register_indices() {
                if index >= header.register_count {
                    return Err(MalformedBinaryError::RegisterIndex {
                        instruction: i,
                        index,
                        register_count: header.register_count,
                    });
                }
            }
        }

        Ok(Self {
            header,
            instructions,
        })
    }

    /// Create a binary and calculate the header fields from `instructions`.
    pub fn new(stage: ShaderStage, instructions: Vec<Instruction>) -> Self {
        let mut register_count = 0;
        let mut input_mask = 0;
        let mut output_mask = 0;
        let mut sampler_mask = 0;
        let mut constant_buffer_mask = 0;

        for i in &instructions {
            for index in i.register_indices() {
                register_count = register_count.max(index + 1);
            }
            for (kind, index) in i.operands() {
                if kind == OperandKind::Input {
                    input_mask |= 1u32.checked_shl(index).unwrap_or_default();
                }
            }
            if i.dst_kind() == DestinationKind::Output {
                output_mask |= 1u32.checked_shl(i.dst() as u32).unwrap_or_default();
            }
            match i.opcode() {
                Opcode::Tex => {
                    sampler_mask |= 1u32.checked_shl(i.src_b().value() as u32).unwrap_or_default()
                }
                Opcode::Ldc => {
                    constant_buffer_mask |=
                        1u32.checked_shl(i.src_a().value() as u32).unwrap_or_default()
                }
                _ => (),
            }
        }

        Self {
            header: IsaHeader {
                version: 1,
                stage,
                code_size: instructions.len() as u32 * 8,
                instruction_count: instructions.len() as u32,
                register_count,
                input_mask,
                output_mask,
                sampler_mask,
                constant_buffer_mask,
                reserved: [0; 2],
            },
            instructions,
        }
    }

    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        let mut writer = Cursor::new(Vec::new());
        self.header.write_le(&mut writer)?;
        self.instructions.write_le(&mut writer)?;
        Ok(writer.into_inner())
    }
}

impl Instruction {
    /// The source channel index for destination `channel` in `xyzw` order.
    pub fn swizzle_a_channel(&self, channel: usize) -> usize {
        swizzle_channel(self.swizzle_a(), channel)
    }

    pub fn swizzle_b_channel(&self, channel: usize) -> usize {
        swizzle_channel(self.swizzle_b(), channel)
    }

    pub fn writes_channel(&self, channel: usize) -> bool {
        (self.dst_mask().value() >> channel) & 1 != 0
    }

    /// The operands interpreted as register file accesses for this opcode.
    pub fn operands(&self) -> Vec<(OperandKind, u32)> {
        let a = (self.src_a_kind(), self.src_a().value() as u32);
        let b = (self.src_b_kind(), self.src_b().value() as u32);
        match self.opcode() {
            Opcode::Nop | Opcode::End | Opcode::Ldc => Vec::new(),
            Opcode::Mov | Opcode::Rcp | Opcode::Rsq | Opcode::Tex => vec![a],
            Opcode::Add | Opcode::Mul | Opcode::Min | Opcode::Max | Opcode::Dp4 => vec![a, b],
        }
    }

    fn register_indices(&self) -> Vec<u32> {
        let mut indices: Vec<_> = self
            .operands()
            .into_iter()
            .filter(|(kind, _)| *kind == OperandKind::Register)
            .map(|(_, index)| index)
            .collect();

        let writes = !matches!(self.opcode(), Opcode::Nop | Opcode::End);
        if writes && self.dst_kind() == DestinationKind::Register {
            indices.push(self.dst() as u32);
        }
        indices
    }
}

fn swizzle_channel(swizzle: u8, channel: usize) -> usize {
    ((swizzle >> (channel * 2)) & 0b11) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    use hexlit::hex;
    use pretty_assertions::assert_eq;

    fn mov_output(dst: u8, src: u16) -> Instruction {
        Instruction::new(
            Opcode::Mov,
            dst,
            u4::new(0b1111),
            DestinationKind::Output,
            u10::new(src),
            OperandKind::Input,
            IDENTITY_SWIZZLE,
            false,
            u10::new(0),
            OperandKind::Register,
            IDENTITY_SWIZZLE,
            false,
        )
    }

    #[test]
    fn read_write_header_only() {
        let bytes = hex!(
            54425849 01000000 00000000 00000000
            00000000 00000000 00000000 00000000
            00000000 00000000 00000000 00000000
        );
        let binary = IsaBinary::from_bytes(bytes).unwrap();
        assert_eq!(ShaderStage::Vertex, binary.header.stage);
        assert!(binary.instructions.is_empty());
        assert_eq!(bytes.to_vec(), binary.to_bytes().unwrap());
    }

    #[test]
    fn read_instructions_after_header() {
        let binary = IsaBinary::new(ShaderStage::Fragment, vec![mov_output(0, 1)]);
        let bytes = binary.to_bytes().unwrap();
        assert_eq!(HEADER_SIZE + 8, bytes.len());
        assert_eq!(8, strip_header(&bytes).unwrap().len());

        let parsed = IsaBinary::from_bytes(&bytes).unwrap();
        assert_eq!(binary, parsed);
        assert_eq!(0b10, parsed.header.input_mask);
        assert_eq!(0b1, parsed.header.output_mask);
        assert_eq!(0, parsed.header.register_count);
    }

    #[test]
    fn truncated_header() {
        let result = IsaBinary::from_bytes(&b"TBXI\x01\0\0\0"[..]);
        assert!(matches!(
            result,
            Err(MalformedBinaryError::Truncated {
                size: 8,
                expected: HEADER_SIZE
            })
        ));
    }

    #[test]
    fn truncated_code() {
        let binary = IsaBinary::new(ShaderStage::Vertex, vec![mov_output(0, 0); 2]);
        let bytes = binary.to_bytes().unwrap();
        let result = IsaBinary::from_bytes(&bytes[..bytes.len() - 4]);
        assert!(matches!(
            result,
            Err(MalformedBinaryError::Truncated { .. })
        ));
    }

    #[test]
    fn code_size_mismatch() {
        let mut binary = IsaBinary::new(ShaderStage::Vertex, vec![mov_output(0, 0)]);
        binary.header.code_size = 12;
        let bytes = binary.to_bytes().unwrap();
        assert!(matches!(
            IsaBinary::from_bytes(&bytes),
            Err(MalformedBinaryError::CodeSize {
                code_size: 12,
                instruction_count: 1
            })
        ));
    }

    #[test]
    fn unknown_stage() {
        let mut bytes = IsaBinary::new(ShaderStage::Vertex, Vec::new())
            .to_bytes()
            .unwrap();
        bytes[8] = 7;
        assert!(matches!(
            IsaBinary::from_bytes(&bytes),
            Err(MalformedBinaryError::Binrw(_))
        ));
    }

    #[test]
    fn unknown_opcode() {
        let mut bytes = IsaBinary::new(ShaderStage::Vertex, vec![mov_output(0, 0)])
            .to_bytes()
            .unwrap();
        bytes[HEADER_SIZE] = 0x7F;
        assert!(matches!(
            IsaBinary::from_bytes(&bytes),
            Err(MalformedBinaryError::Binrw(_))
        ));
    }

    #[test]
    fn register_out_of_range() {
        let mut binary = IsaBinary::new(
            ShaderStage::Vertex,
            vec![Instruction::new(
                Opcode::Mov,
                3,
                u4::new(0b0001),
                DestinationKind::Register,
                u10::new(0),
                OperandKind::Immediate,
                IDENTITY_SWIZZLE,
                false,
                u10::new(0),
                OperandKind::Register,
                IDENTITY_SWIZZLE,
                false,
            )],
        );
        assert_eq!(4, binary.header.register_count);

        binary.header.register_count = 2;
        let bytes = binary.to_bytes().unwrap();
        assert!(matches!(
            IsaBinary::from_bytes(&bytes),
            Err(MalformedBinaryError::RegisterIndex {
                instruction: 0,
                index: 3,
                register_count: 2
            })
        ));
    }

    #[test]
    fn swizzle_channels() {
        let i = Instruction::new(
            Opcode::Mov,
            0,
            u4::new(0b0101),
            DestinationKind::Register,
            u10::new(0),
            OperandKind::Register,
            0b00_01_10_11,
            false,
            u10::new(0),
            OperandKind::Register,
            IDENTITY_SWIZZLE,
            false,
        );
        assert_eq!(
            vec![3, 2, 1, 0],
            (0..4).map(|c| i.swizzle_a_channel(c)).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![true, false, true, false],
            (0..4).map(|c| i.writes_channel(c)).collect::<Vec<_>>()
        );
    }
}
