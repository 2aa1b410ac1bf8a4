//! Per title rendering behavior.
//!
//! Games using the same shader archive format still differ in how materials select options,
//! how render info maps to render state, and which textures the renderer provides.
//! A [TitleStrategy] customizes only these steps and shares the rest of the pipeline.
use log::trace;
use tbx_shader::{
    archive::OptionSpace,
    binding::BindingPlan,
    resolve::{DynamicOptions, Options},
};

use crate::{
    material::{Material, TextureBinding},
    pipeline::{RenderInfo, RenderState},
    resources::ResourceSet,
};

pub trait TitleStrategy {
    /// The option choices used to resolve variants of the material's program.
    fn derive_options(
        &self,
        material: &Material,
        dynamic: &DynamicOptions,
        space: &OptionSpace,
    ) -> Options;

    fn derive_render_state(&self, render_info: &RenderInfo) -> RenderState;

    /// Bind textures for samplers in `plan` not assigned by `material`.
    fn bind_external_textures(
        &self,
        material: &Material,
        plan: &BindingPlan,
        resources: &ResourceSet,
    ) -> Vec<TextureBinding>;
}

/// Use the material's options and render info as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStrategy;

impl TitleStrategy for DefaultStrategy {
    fn derive_options(
        &self,
        material: &Material,
        dynamic: &DynamicOptions,
        space: &OptionSpace,
    ) -> Options {
        let mut options = material.options.clone();
        dynamic.apply(space, &mut options);
        options
    }

    fn derive_render_state(&self, render_info: &RenderInfo) -> RenderState {
        RenderState::from_render_info(render_info)
    }

    fn bind_external_textures(
        &self,
        material: &Material,
        plan: &BindingPlan,
        resources: &ResourceSet,
    ) -> Vec<TextureBinding> {
        plan.samplers
            .iter()
            .filter(|s| !material.textures.contains_key(&s.name))
            .filter_map(|s| match resources.external_texture(&s.name) {
                Some(texture) => Some(TextureBinding {
                    sampler: s.name.clone(),
                    texture_unit: s.texture_unit,
                    texture,
                }),
                None => {
                    trace!("No texture assigned to sampler {:?}", s.name);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use tbx_shader::{
        archive::OptionAxis,
        binding::SamplerBinding,
        config::ShaderCacheConfig,
        error::LoadConfigError,
        resolve::{ASSIGN_TYPE, SKIN_WEIGHT_COUNT},
        ShaderStage,
    };

    use crate::resources::TextureHandle;

    fn material() -> Material {
        Material {
            name: "body".to_string(),
            options: [("uv_count".into(), "2".into())].into_iter().collect(),
            textures: [("diffuse".into(), TextureHandle(1))].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn derive_options_declared_dynamic_axes() {
        let space = OptionSpace {
            axes: vec![
                OptionAxis::new("uv_count", ["1", "2"]),
                OptionAxis::new(SKIN_WEIGHT_COUNT, ["0", "1", "2", "4"]),
            ],
            table: None,
        };
        let dynamic = DynamicOptions {
            skin_weight_count: Some(4),
            assign_type: Some(1),
            system_id: None,
        };

        let options = DefaultStrategy.derive_options(&material(), &dynamic, &space);
        assert_eq!(Some(&"2".into()), options.get("uv_count"));
        assert_eq!(Some(&"4".into()), options.get(SKIN_WEIGHT_COUNT));
        assert_eq!(None, options.get(ASSIGN_TYPE));
    }

    #[test]
    fn bind_external_textures_skips_material_textures() -> Result<(), LoadConfigError> {
        let config = ShaderCacheConfig::from_json("{}")?;
        let mut resources = ResourceSet::new(&config, |path: &std::path::Path| -> Result<
            tbx_shader::archive::ShaderArchive,
            crate::error::LoadArchiveError,
        > {
            Err(crate::error::LoadArchiveError::Parse {
                path: path.to_owned(),
                message: String::new(),
            })
        });
        resources.set_external_texture("shadow_map", TextureHandle(7));
        resources.set_external_texture("diffuse", TextureHandle(8));

        let sampler = |name: &str, texture_unit: u32| SamplerBinding {
            name: name.into(),
            stage: ShaderStage::Fragment,
            uniform_name: format!("fp_s{texture_unit}"),
            texture_unit,
        };
        let plan = BindingPlan {
            uniform_blocks: Vec::new(),
            samplers: vec![
                sampler("diffuse", 0),
                sampler("shadow_map", 1),
                sampler("cube_map", 2),
            ],
        };

        assert_eq!(
            vec![TextureBinding {
                sampler: "shadow_map".into(),
                texture_unit: 1,
                texture: TextureHandle(7)
            }],
            DefaultStrategy.bind_external_textures(&material(), &plan, &resources)
        );
        Ok(())
    }
}
