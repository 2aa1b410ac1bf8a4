//! A library for reading and writing precompiled console GPU shader stage binaries.
//!
//! Shader archives embed one binary per program stage.
//! The layout of each binary depends on the archive's format marker:
//!
//! | Flavor | Module | Magic | Translation |
//! | --- | --- | --- | --- |
//! | ISA | [isa] | `TBXI` | decoded directly into GLSL |
//! | Vendor | [vendor] | `TBXV` | decompiled by an external tool |
//!
//! # Design
//! Each binary is represented by Rust types generated from their binrw attribute annotations.
//! Parsing is followed by a single validation pass that checks sizes and ranges
//! against the length of the input buffer.
//! Invalid binaries are rejected with [MalformedBinaryError](error::MalformedBinaryError)
//! at load time rather than in later code that assumes the layout is valid.
//!
//! ```rust no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("shader.vert.bin")?;
//! let binary = tbx_lib::isa::IsaBinary::from_bytes(&bytes)?;
//! println!("{:?} with {} instructions", binary.header.stage, binary.instructions.len());
//! # Ok(())
//! # }
//! ```
use std::io::SeekFrom;

use binrw::{file_ptr::FilePtrArgs, BinRead, BinResult, BinWrite, VecArgs};
use log::trace;

pub mod error;
pub mod isa;
pub mod vendor;

/// The archive format marker that selects how stage binaries are translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryFlavor {
    /// Instruction words decoded directly by [isa].
    Isa,
    /// Vendor bytecode that requires an external cross compiler.
    Vendor,
}

impl BinaryFlavor {
    /// Detect the flavor from the magic at the start of a stage binary.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        match bytes.get(..4)? {
            b"TBXI" => Some(Self::Isa),
            b"TBXV" => Some(Self::Vendor),
            _ => None,
        }
    }

    /// A single byte identifier used when hashing binaries of this flavor.
    pub fn marker(&self) -> u8 {
        match self {
            BinaryFlavor::Isa => 0,
            BinaryFlavor::Vendor => 1,
        }
    }
}

/// The programmable stage for a shader binary.
#[derive(
    BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter,
)]
#[brw(repr(u32))]
pub enum ShaderStage {
    Vertex = 0,
    /// Also called the pixel stage.
    Fragment = 1,
}

impl ShaderStage {
    /// The prefix for stage specific names like `vp_3` or `fp_s0`.
    pub fn prefix(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vp",
            ShaderStage::Fragment => "fp",
        }
    }

    /// The file extension for source code of this stage.
    pub fn extension(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

fn parse_offset32_count32<T, R, Args>(
    reader: &mut R,
    endian: binrw::Endian,
    args: FilePtrArgs<Args>,
) -> BinResult<Vec<T>>
where
    for<'a> T: BinRead<Args<'a> = Args> + 'static,
    R: std::io::Read + std::io::Seek,
    Args: Clone,
{
    let pos = reader.stream_position()?;
    let offset = u32::read_options(reader, endian, ())?;
    let count = u32::read_options(reader, endian, ())?;

    if offset == 0 && count != 0 {
        return Err(binrw::Error::AssertFail {
            pos,
            message: format!("unexpected null offset for count {count}"),
        });
    }

    parse_vec(reader, endian, args, offset as u64, count as usize)
}

fn parse_vec<T, R, Args>(
    reader: &mut R,
    endian: binrw::Endian,
    args: FilePtrArgs<Args>,
    offset: u64,
    count: usize,
) -> BinResult<Vec<T>>
where
    for<'a> T: BinRead<Args<'a> = Args> + 'static,
    R: std::io::Read + std::io::Seek,
    Args: Clone,
{
    let saved_pos = reader.stream_position()?;

    reader.seek(SeekFrom::Start(offset + args.offset))?;
    trace!(
        "{:?}: {:?}",
        std::any::type_name::<Vec<T>>(),
        reader.stream_position()?
    );

    let values = Vec::<T>::read_options(
        reader,
        endian,
        VecArgs {
            count,
            inner: args.inner,
        },
    )?;

    reader.seek(SeekFrom::Start(saved_pos))?;

    Ok(values)
}
