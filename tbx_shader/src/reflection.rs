//! Find the constant buffer values and samplers used by each shader stage.
//!
//! Binaries decoded in process produce reflection from the decoded [Graph].
//! Decompiled binaries and programs loaded from disk only have GLSL,
//! so reflection is recovered by scanning the source for `cb{n}.data[i].xyzw` accesses.
use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;
use smol_str::SmolStr;
use tbx_lib::ShaderStage;

use crate::{
    archive::UniformBlockDescriptor,
    graph::{Expr, Graph},
};

const VEC4_SIZE: u32 = 16;

static CONSTANT_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcb(\d+)\.data\[(\d+)\](?:\.([xyzw]{1,4}))?").expect("static regex must compile")
});

static SAMPLER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:vp|fp)_s(\d+)\b").expect("static regex must compile"));

/// A read of a single channel of `cb{block}.data[index]`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct ConstantAccess {
    pub block: u32,
    /// The `vec4` index into the block.
    pub index: u32,
    /// The channel index in `xyzw` order.
    pub channel: u32,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct StageReflection {
    pub constant_accesses: BTreeSet<ConstantAccess>,
    /// Sampler slots like `0` for `fp_s0`.
    pub samplers: BTreeSet<u32>,
}

/// The names of uniform members read by each stage.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct UsedUniforms {
    pub vertex: Vec<SmolStr>,
    pub fragment: Vec<SmolStr>,
}

impl ConstantAccess {
    /// The offset in bytes from the start of the block or `None` if the offset overflows.
    pub fn byte_offset(&self) -> Option<u32> {
        self.index
            .checked_mul(VEC4_SIZE)?
            .checked_add(self.channel * 4)
    }
}

impl StageReflection {
    /// Collect accesses from the parameters and texture functions in `graph`.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut reflection = Self::default();
        for expr in graph.exprs() {
            match expr {
                Expr::Parameter {
                    name,
                    field: Some(field),
                    index: Some(index),
                    channel,
                } if field == "data" => {
                    let block = name.strip_prefix("cb").and_then(|b| b.parse().ok());
                    let index = match &**index {
                        Expr::Int(i) => u32::try_from(*i).ok(),
                        _ => None,
                    };
                    if let (Some(block), Some(index)) = (block, index) {
                        for channel in channel_indices(*channel) {
                            reflection.constant_accesses.insert(ConstantAccess {
                                block,
                                index,
                                channel,
                            });
                        }
                    }
                }
                Expr::Func { name, args, .. } if name == "texture" => {
                    if let Some(Expr::Global { name, .. }) = args.first() {
                        if let Some(slot) = sampler_slot(name) {
                            reflection.samplers.insert(slot);
                        }
                    }
                }
                _ => (),
            }
        }
        reflection
    }

    /// Scan GLSL `source` for constant buffer accesses and sampler uses.
    pub fn from_source(source: &str) -> Self {
        let mut reflection = Self::default();

        for captures in CONSTANT_ACCESS.captures_iter(source) {
            let block = captures[1].parse();
            let index = captures[2].parse();
            if let (Ok(block), Ok(index)) = (block, index) {
                let channels: Vec<_> = match captures.get(3) {
                    Some(swizzle) => swizzle
                        .as_str()
                        .chars()
                        .flat_map(|c| channel_indices(Some(c)))
                        .collect(),
                    None => channel_indices(None).collect(),
                };
                for channel in channels {
                    reflection.constant_accesses.insert(ConstantAccess {
                        block,
                        index,
                        channel,
                    });
                }
            }
        }

        // Declarations don't count as uses.
        for line in source
            .lines()
            .filter(|l| !l.trim_start().starts_with("uniform"))
        {
            for captures in SAMPLER_NAME.captures_iter(line) {
                if let Ok(slot) = captures[1].parse() {
                    reflection.samplers.insert(slot);
                }
            }
        }

        reflection
    }

    /// Map accesses back to uniform names using the member byte ranges of `blocks`.
    pub fn used_uniforms(
        &self,
        stage: ShaderStage,
        blocks: &[UniformBlockDescriptor],
    ) -> Vec<SmolStr> {
        let mut names = BTreeSet::new();
        for access in &self.constant_accesses {
            for block in blocks
                .iter()
                .filter(|b| b.locations.get(stage) == Some(access.block))
            {
                if let Some(member) = access.byte_offset().and_then(|o| block.member_at(o)) {
                    names.insert(member.name.clone());
                }
            }
        }
        names.into_iter().collect()
    }
}

fn channel_indices(channel: Option<char>) -> std::ops::Range<u32> {
    match channel {
        Some('x') => 0..1,
        Some('y') => 1..2,
        Some('z') => 2..3,
        Some('w') => 3..4,
        Some(_) => 0..0,
        // Accessing the entire vec4.
        None => 0..4,
    }
}

fn sampler_slot(name: &str) -> Option<u32> {
    let (_, slot) = name.split_once("_s")?;
    slot.parse().ok()
}
