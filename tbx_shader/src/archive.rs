//! The in memory representation of a shader archive.
//!
//! Archives are created by the container parsing code and only store what is needed
//! to select a variant and bind its resources.
//! Stage binaries are stored once in a pool and referenced by index
//! since many variants share the same vertex or fragment binary.
use std::collections::BTreeMap;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tbx_lib::{BinaryFlavor, ShaderStage};

#[derive(Debug, PartialEq, Clone)]
pub struct ShaderArchive {
    pub name: String,
    /// The format of every binary in [binaries](#structfield.binaries).
    pub flavor: BinaryFlavor,
    pub binaries: Vec<Vec<u8>>,
    pub programs: IndexMap<SmolStr, ShaderProgram>,
    /// An option iterated over all of its choices to produce one program per render pass.
    pub pass_axis: Option<SmolStr>,
}

/// A precompiled program with one variant for each valid combination of option choices.
#[derive(Debug, PartialEq, Clone)]
pub struct ShaderProgram {
    pub option_space: OptionSpace,
    pub variants: Vec<ProgramVariant>,
    pub uniform_blocks: Vec<UniformBlockDescriptor>,
    pub samplers: Vec<SamplerDescriptor>,
}

/// Indices into [ShaderArchive::binaries] for each stage.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct ProgramVariant {
    pub vertex: usize,
    pub fragment: usize,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct OptionSpace {
    pub axes: Vec<OptionAxis>,
    /// Variant indices for each combination of choice indices in axis order.
    /// Variants use a mixed radix index over all axes if there is no table.
    pub table: Option<BTreeMap<Vec<usize>, usize>>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OptionAxis {
    pub name: SmolStr,
    pub choices: Vec<SmolStr>,
}

/// A uniform block like `cb3` that is declared as `vp_3` or `fp_3` after patching.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UniformBlockDescriptor {
    pub name: SmolStr,
    /// The constant buffer slot in each stage.
    pub locations: StageLocations,
    pub members: Vec<UniformMember>,
}

/// A uniform value stored at a byte range in a [UniformBlockDescriptor].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UniformMember {
    pub name: SmolStr,
    pub offset: u32,
    pub size: u32,
}

/// A texture sampler declared as `vp_s{n}` or `fp_s{n}`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SamplerDescriptor {
    pub name: SmolStr,
    pub locations: StageLocations,
}

/// The slot for each stage or `None` if the stage does not use the resource.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct StageLocations {
    pub vertex: Option<u32>,
    pub fragment: Option<u32>,
}

/// Borrowed binaries for each stage of a single variant.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct StageBinaries<'a> {
    pub flavor: BinaryFlavor,
    pub vertex: &'a [u8],
    pub fragment: &'a [u8],
}

/// A binary for a single stage.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct StageBinary<'a> {
    pub flavor: BinaryFlavor,
    pub stage: ShaderStage,
    pub bytes: &'a [u8],
}

impl ShaderArchive {
    /// The binaries for `variant` or `None` if the indices are out of range.
    pub fn stage_binaries(&self, variant: &ProgramVariant) -> Option<StageBinaries<'_>> {
        Some(StageBinaries {
            flavor: self.flavor,
            vertex: self.binaries.get(variant.vertex)?,
            fragment: self.binaries.get(variant.fragment)?,
        })
    }
}

impl OptionSpace {
    pub fn axis(&self, name: &str) -> Option<&OptionAxis> {
        self.axes.iter().find(|a| a.name == name)
    }
}

impl OptionAxis {
    pub fn new<I, T>(name: impl Into<SmolStr>, choices: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SmolStr>,
    {
        Self {
            name: name.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }

    pub fn choice_index(&self, value: &str) -> Option<usize> {
        self.choices.iter().position(|c| c == value)
    }
}

impl UniformBlockDescriptor {
    /// The name of the uniform member containing the byte at `offset` if any.
    pub fn member_at(&self, offset: u32) -> Option<&UniformMember> {
        self.members
            .iter()
            .find(|m| offset >= m.offset && offset - m.offset < m.size)
    }
}

impl StageLocations {
    /// Convert archive locations that use `-1` for unused stages.
    pub fn from_raw(vertex: i32, fragment: i32) -> Self {
        Self {
            vertex: u32::try_from(vertex).ok(),
            fragment: u32::try_from(fragment).ok(),
        }
    }

    pub fn get(&self, stage: ShaderStage) -> Option<u32> {
        match stage {
            ShaderStage::Vertex => self.vertex,
            ShaderStage::Fragment => self.fragment,
        }
    }

    /// Returns `true` if no stage uses the resource.
    pub fn is_unused(&self) -> bool {
        self.vertex.is_none() && self.fragment.is_none()
    }
}

impl<'a> StageBinaries<'a> {
    pub fn get(&self, stage: ShaderStage) -> StageBinary<'a> {
        StageBinary {
            flavor: self.flavor,
            stage,
            bytes: match stage {
                ShaderStage::Vertex => self.vertex,
                ShaderStage::Fragment => self.fragment,
            },
        }
    }
}
