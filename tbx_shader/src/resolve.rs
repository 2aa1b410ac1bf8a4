//! Select precompiled program variants from material option choices.
//!
//! Resolution never falls back to a default choice.
//! Any axis without a chosen value produces an error instead of a potentially incorrect program.
use std::collections::BTreeMap;

use log::trace;
use smol_str::SmolStr;

use crate::{
    archive::{OptionSpace, ProgramVariant, ShaderProgram},
    error::ResolveVariantError,
};

/// The chosen value for each option axis by name.
pub type Options = BTreeMap<SmolStr, SmolStr>;

pub const SKIN_WEIGHT_COUNT: &str = "skin_weight_count";
pub const ASSIGN_TYPE: &str = "assign_type";
pub const SYSTEM_ID: &str = "system_id";

/// Options determined by the renderer rather than the material.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct DynamicOptions {
    pub skin_weight_count: Option<u32>,
    pub assign_type: Option<u32>,
    pub system_id: Option<u32>,
}

/// A single variant selected for one choice of the pass axis.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResolvedPass {
    pub pass: SmolStr,
    pub variant_index: usize,
    pub variant: ProgramVariant,
}

impl DynamicOptions {
    /// Add values only for axes that `space` declares.
    pub fn apply(&self, space: &OptionSpace, options: &mut Options) {
        let values = [
            (SKIN_WEIGHT_COUNT, self.skin_weight_count),
            (ASSIGN_TYPE, self.assign_type),
            (SYSTEM_ID, self.system_id),
        ];
        for (name, value) in values {
            if let Some(value) = value {
                if space.axis(name).is_some() {
                    options.insert(name.into(), value.to_string().into());
                }
            }
        }
    }
}

impl OptionSpace {
    /// Find the variant index for the `chosen` value of each axis.
    pub fn resolve(&self, chosen: &Options) -> Result<usize, ResolveVariantError> {
        let choices = self
            .axes
            .iter()
            .map(|axis| {
                let value = chosen
                    .get(&axis.name)
                    .ok_or_else(|| ResolveVariantError::MissingAxis(axis.name.clone()))?;
                axis.choice_index(value)
                    .ok_or_else(|| ResolveVariantError::UnknownChoice {
                        axis: axis.name.clone(),
                        value: value.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.variant_index(choices)
    }

    fn variant_index(&self, choices: Vec<usize>) -> Result<usize, ResolveVariantError> {
        match &self.table {
            Some(table) => table
                .get(&choices)
                .copied()
                .ok_or(ResolveVariantError::MissingCombination { choices }),
            None => {
                // The first axis is the most significant digit.
                self.axes
                    .iter()
                    .zip(&choices)
                    .try_fold(0usize, |index, (axis, choice)| {
                        index
                            .checked_mul(axis.choices.len())
                            .and_then(|i| i.checked_add(*choice))
                    })
                    .ok_or(ResolveVariantError::IndexOverflow { choices })
            }
        }
    }
}

impl ShaderProgram {
    /// Resolve a single variant for `chosen` options.
    pub fn resolve(&self, chosen: &Options) -> Result<usize, ResolveVariantError> {
        let index = self.option_space.resolve(chosen)?;
        self.check_index(index)?;
        Ok(index)
    }

    /// Resolve one variant for each choice of `pass_axis`.
    ///
    /// All other axes must have a chosen value.
    /// Passes without a matching variant are skipped,
    /// so the result may be empty if no pass should be rendered.
    pub fn resolve_passes(
        &self,
        pass_axis: &str,
        chosen: &Options,
    ) -> Result<Vec<ResolvedPass>, ResolveVariantError> {
        let space = &self.option_space;
        let pass_index = space
            .axes
            .iter()
            .position(|a| a.name == pass_axis)
            .ok_or_else(|| ResolveVariantError::MissingPassAxis(pass_axis.into()))?;

        for axis in space.axes.iter().filter(|a| a.name != pass_axis) {
            let value = chosen
                .get(&axis.name)
                .ok_or_else(|| ResolveVariantError::MissingAxis(axis.name.clone()))?;
            if axis.choice_index(value).is_none() {
                return Err(ResolveVariantError::UnknownChoice {
                    axis: axis.name.clone(),
                    value: value.clone(),
                });
            }
        }

        let mut options = chosen.clone();
        let mut passes = Vec::new();
        for pass in &space.axes[pass_index].choices {
            options.insert(pass_axis.into(), pass.clone());

            match space.resolve(&options).and_then(|i| self.check_index(i).map(|_| i)) {
                Ok(variant_index) => passes.push(ResolvedPass {
                    pass: pass.clone(),
                    variant_index,
                    variant: self.variants[variant_index],
                }),
                Err(
                    e @ (ResolveVariantError::MissingCombination { .. }
                    | ResolveVariantError::InvalidIndex { .. }
                    | ResolveVariantError::IndexOverflow { .. }),
                ) => {
                    trace!("Skipping pass {pass:?}: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(passes)
    }

    fn check_index(&self, index: usize) -> Result<(), ResolveVariantError> {
        if index < self.variants.len() {
            Ok(())
        } else {
            Err(ResolveVariantError::InvalidIndex {
                index,
                count: self.variants.len(),
            })
        }
    }
}
