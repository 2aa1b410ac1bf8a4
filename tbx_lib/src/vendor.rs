//! Compiled shader stages containing vendor bytecode.
//!
//! The bytecode can only be decompiled by an external cross compiler.
//! The [constant_blocks](VendorBinary::constant_blocks) table stores byte ranges
//! into the [constant_data](VendorBinary::constant_data) for each immediate constant block.
use std::io::{Cursor, Write};

use binrw::{BinRead, BinReaderExt, BinResult, BinWrite, BinWriterExt};

use crate::{error::MalformedBinaryError, parse_offset32_count32, ShaderStage};

/// The size in bytes of the fixed fields including the magic.
pub const HEADER_SIZE: usize = 36;

#[derive(Debug, BinRead, PartialEq, Clone)]
#[br(magic(b"TBXV"))]
pub struct VendorBinary {
    pub version: u32,
    pub stage: ShaderStage,

    /// Bytecode passed unmodified to the external decompiler.
    #[br(parse_with = parse_offset32_count32)]
    pub bytecode: Vec<u8>,

    #[br(parse_with = parse_offset32_count32)]
    pub constant_blocks: Vec<ConstantBlockRange>,

    #[br(parse_with = parse_offset32_count32)]
    pub constant_data: Vec<u8>,
}

/// A range of `vec4` values in [constant_data](VendorBinary::constant_data).
#[derive(Debug, BinRead, BinWrite, PartialEq, Eq, Clone, Copy)]
pub struct ConstantBlockRange {
    /// The `k` in the `icb{k}` name used by decompiled code.
    pub index: u32,
    pub offset: u32,
    pub length: u32,
}

impl VendorBinary {
    /// Read and validate a binary including the header.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Self, MalformedBinaryError> {
        let bytes = bytes.as_ref();
        if bytes.len() < HEADER_SIZE {
            return Err(MalformedBinaryError::Truncated {
                size: bytes.len(),
                expected: HEADER_SIZE,
            });
        }

        let binary: Self = Cursor::new(bytes).read_le()?;
        binary.validate()?;
        Ok(binary)
    }

    fn validate(&self) -> Result<(), MalformedBinaryError> {
        for block in &self.constant_blocks {
            let start = block.offset as u64;
            let end = start + block.length as u64;
            if end > self.constant_data.len() as u64 {
                return Err(MalformedBinaryError::ConstantBlockRange {
                    index: block.index,
                    start,
                    end,
                    size: self.constant_data.len(),
                });
            }

            if block.length % 16 != 0 {
                return Err(MalformedBinaryError::ConstantBlockAlignment {
                    index: block.index,
                    length: block.length,
                });
            }
        }
        Ok(())
    }

    /// Create a binary with one constant block for each element of `constant_blocks`.
    pub fn new(stage: ShaderStage, bytecode: Vec<u8>, constant_blocks: &[Vec<[f32; 4]>]) -> Self {
        let mut constant_data = Vec::new();
        let constant_blocks = constant_blocks
            .iter()
            .enumerate()
            .map(|(i, values)| {
                let offset = constant_data.len() as u32;
                for value in values.iter().flatten() {
                    constant_data.extend_from_slice(&value.to_le_bytes());
                }
                ConstantBlockRange {
                    index: i as u32,
                    offset,
                    length: values.len() as u32 * 16,
                }
            })
            .collect();

        Self {
            version: 1,
            stage,
            bytecode,
            constant_blocks,
            constant_data,
        }
    }

    /// The `vec4` values for `block` in order.
    /// The range must have already been checked by [VendorBinary::from_bytes].
    pub fn constant_values(&self, block: &ConstantBlockRange) -> Vec<[f32; 4]> {
        let start = block.offset as usize;
        let end = start + block.length as usize;
        self.constant_data
            .get(start..end)
            .unwrap_or_default()
            .chunks_exact(16)
            .map(|vector| {
                let mut value = [0.0; 4];
                for (f, bytes) in value.iter_mut().zip(vector.chunks_exact(4)) {
                    *f = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
                value
            })
            .collect()
    }

    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        // Sections are stored in field order after the header.
        let bytecode_offset = HEADER_SIZE as u32;
        let table_offset = (bytecode_offset + self.bytecode.len() as u32).next_multiple_of(4);
        let data_offset = table_offset + self.constant_blocks.len() as u32 * 12;

        let mut writer = Cursor::new(Vec::new());
        writer.write_all(b"TBXV")?;
        writer.write_le(&self.version)?;
        writer.write_le(&self.stage)?;
        writer.write_le(&bytecode_offset)?;
        writer.write_le(&(self.bytecode.len() as u32))?;
        writer.write_le(&table_offset)?;
        writer.write_le(&(self.constant_blocks.len() as u32))?;
        writer.write_le(&data_offset)?;
        writer.write_le(&(self.constant_data.len() as u32))?;

        writer.write_all(&self.bytecode)?;
        let padding = table_offset as usize - writer.get_ref().len();
        writer.write_all(&vec![0u8; padding])?;
        writer.write_le(&self.constant_blocks)?;
        writer.write_all(&self.constant_data)?;

        Ok(writer.into_inner())
    }
}
