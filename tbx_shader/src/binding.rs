//! Assign binding points for the uniform blocks and samplers of a program.
//!
//! Descriptor locations are per stage, so each stage is bound independently.
//! A block used only by the fragment stage is never bound for the vertex stage.
use std::{collections::BTreeSet, sync::LazyLock};

use log::trace;
use regex::Regex;
use smol_str::SmolStr;
use strum::IntoEnumIterator;
use tbx_lib::ShaderStage;

use crate::{
    archive::{SamplerDescriptor, UniformBlockDescriptor},
    cache::TranslatedShader,
    translate::external::sampler_name,
};

static UNIFORM_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\buniform\s+(\w+)\s*\{").expect("static regex must compile"));

static SAMPLER_UNIFORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\buniform\s+(?:(?:lowp|mediump|highp)\s+)?\w*sampler\w*\s+(\w+)\s*;")
        .expect("static regex must compile")
});

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UniformBlockBinding {
    /// The name of the [UniformBlockDescriptor].
    pub name: SmolStr,
    pub stage: ShaderStage,
    /// The block name in the patched source like `vp_3`.
    pub block_name: String,
    pub binding: u32,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SamplerBinding {
    /// The name of the [SamplerDescriptor].
    pub name: SmolStr,
    pub stage: ShaderStage,
    /// The sampler uniform in the patched source like `fp_s0`.
    pub uniform_name: String,
    pub texture_unit: u32,
}

/// The bindings to apply before drawing with a program.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct BindingPlan {
    pub uniform_blocks: Vec<UniformBlockBinding>,
    pub samplers: Vec<SamplerBinding>,
}

#[derive(Debug, Default)]
struct DeclaredNames {
    uniform_blocks: BTreeSet<String>,
    samplers: BTreeSet<String>,
}

impl BindingPlan {
    /// Bind each descriptor for every stage that has a location and declares the resource.
    pub fn new(
        shader: &TranslatedShader,
        uniform_blocks: &[UniformBlockDescriptor],
        samplers: &[SamplerDescriptor],
    ) -> Self {
        let mut plan = Self::default();

        for stage in ShaderStage::iter() {
            let declared = DeclaredNames::from_source(shader.source(stage));

            for block in uniform_blocks {
                let Some(location) = block.locations.get(stage) else {
                    continue;
                };
                let block_name = format!("{}_{location}", stage.prefix());
                if declared.uniform_blocks.contains(&block_name) {
                    plan.uniform_blocks.push(UniformBlockBinding {
                        name: block.name.clone(),
                        stage,
                        block_name,
                        binding: plan.uniform_blocks.len() as u32,
                    });
                } else {
                    trace!("Skipping undeclared uniform block {block_name} for {:?}", block.name);
                }
            }

            for sampler in samplers {
                let Some(location) = sampler.locations.get(stage) else {
                    continue;
                };
                let uniform_name = sampler_name(stage, location);
                if declared.samplers.contains(&uniform_name) {
                    plan.samplers.push(SamplerBinding {
                        name: sampler.name.clone(),
                        stage,
                        uniform_name,
                        texture_unit: plan.samplers.len() as u32,
                    });
                } else {
                    trace!("Skipping undeclared sampler {uniform_name} for {:?}", sampler.name);
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.uniform_blocks.is_empty() && self.samplers.is_empty()
    }

    pub fn uniform_block(&self, name: &str, stage: ShaderStage) -> Option<&UniformBlockBinding> {
        self.uniform_blocks
            .iter()
            .find(|b| b.name == name && b.stage == stage)
    }

    pub fn sampler(&self, name: &str, stage: ShaderStage) -> Option<&SamplerBinding> {
        self.samplers
            .iter()
            .find(|s| s.name == name && s.stage == stage)
    }
}

impl DeclaredNames {
    fn from_source(source: &str) -> Self {
        Self {
            uniform_blocks: UNIFORM_BLOCK
                .captures_iter(source)
                .map(|c| c[1].to_string())
                .collect(),
            samplers: SAMPLER_UNIFORM
                .captures_iter(source)
                .map(|c| c[1].to_string())
                .collect(),
        }
    }
}
