//! Fixed function render state derived from material render info.
use indexmap::IndexMap;
use log::warn;
use smol_str::SmolStr;
use strum::{Display, EnumString};

/// Material render info values by name like `blend_mode` or `cull_mode`.
pub type RenderInfo = IndexMap<SmolStr, SmolStr>;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Opaque,
    AlphaBlend,
    Additive,
    Multiplicative,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CullMode {
    #[default]
    Back,
    Front,
    Disabled,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DepthFunc {
    /// Depth testing is disabled and every fragment passes.
    Disabled,
    Less,
    #[default]
    LessEqual,
    Equal,
    Always,
}

/// The non shader components of a pipeline for use with pipeline caching.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct RenderState {
    pub blend_mode: BlendMode,
    pub cull_mode: CullMode,
    pub depth_func: DepthFunc,
    pub depth_write: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::Opaque,
            cull_mode: CullMode::Back,
            depth_func: DepthFunc::LessEqual,
            depth_write: true,
        }
    }
}

impl RenderState {
    /// Read known values from `render_info`.
    ///
    /// Missing or unrecognized values use the [Default] state.
    pub fn from_render_info(render_info: &RenderInfo) -> Self {
        let default = Self::default();
        let blend_mode = parse_value(render_info, "blend_mode").unwrap_or(default.blend_mode);
        Self {
            blend_mode,
            cull_mode: parse_value(render_info, "cull_mode").unwrap_or(default.cull_mode),
            depth_func: parse_value(render_info, "depth_func").unwrap_or(default.depth_func),
            // Transparent meshes shouldn't occlude meshes drawn after them.
            depth_write: parse_value(render_info, "depth_write")
                .unwrap_or(blend_mode == BlendMode::Opaque),
        }
    }

    pub fn blend_state(&self) -> Option<wgpu::BlendState> {
        blend_state(self.blend_mode)
    }

    pub fn cull_face(&self) -> Option<wgpu::Face> {
        cull_mode(self.cull_mode)
    }

    pub fn depth_compare(&self) -> wgpu::CompareFunction {
        depth_compare(self.depth_func)
    }

    pub fn is_transparent(&self) -> bool {
        self.blend_mode != BlendMode::Opaque
    }
}

fn parse_value<T: std::str::FromStr>(render_info: &RenderInfo, name: &str) -> Option<T> {
    let value = render_info.get(name)?;
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Unrecognized render info value {value:?} for {name:?}");
            None
        }
    }
}

fn cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::Back => Some(wgpu::Face::Back),
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Disabled => None,
    }
}

fn depth_compare(func: DepthFunc) -> wgpu::CompareFunction {
    match func {
        DepthFunc::Disabled => wgpu::CompareFunction::Always,
        DepthFunc::Less => wgpu::CompareFunction::Less,
        DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthFunc::Equal => wgpu::CompareFunction::Equal,
        DepthFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Opaque => None,
        BlendMode::AlphaBlend => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        }),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }),
        BlendMode::Multiplicative => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Zero,
                dst_factor: wgpu::BlendFactor::Src,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Zero,
                dst_factor: wgpu::BlendFactor::Src,
                operation: wgpu::BlendOperation::Add,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn render_info<const N: usize>(values: [(&str, &str); N]) -> RenderInfo {
        values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect()
    }

    #[test]
    fn render_state_defaults() {
        let state = RenderState::from_render_info(&RenderInfo::new());
        assert_eq!(RenderState::default(), state);
        assert_eq!(None, state.blend_state());
        assert_eq!(Some(wgpu::Face::Back), state.cull_face());
        assert_eq!(wgpu::CompareFunction::LessEqual, state.depth_compare());
    }

    #[test]
    fn render_state_alpha_blend() {
        let state = RenderState::from_render_info(&render_info([
            ("blend_mode", "alpha_blend"),
            ("cull_mode", "disabled"),
        ]));
        assert_eq!(
            RenderState {
                blend_mode: BlendMode::AlphaBlend,
                cull_mode: CullMode::Disabled,
                depth_func: DepthFunc::LessEqual,
                depth_write: false,
            },
            state
        );
        assert_eq!(
            Some(wgpu::BlendFactor::OneMinusSrcAlpha),
            state.blend_state().map(|b| b.color.dst_factor)
        );
        assert_eq!(None, state.cull_face());
        assert!(state.is_transparent());
    }

    #[test]
    fn render_state_explicit_depth() {
        let state = RenderState::from_render_info(&render_info([
            ("blend_mode", "additive"),
            ("depth_write", "true"),
            ("depth_func", "disabled"),
        ]));
        assert!(state.depth_write);
        assert_eq!(wgpu::CompareFunction::Always, state.depth_compare());
        assert_eq!(
            Some(wgpu::BlendFactor::One),
            state.blend_state().map(|b| b.color.dst_factor)
        );
    }

    #[test]
    fn render_state_invalid_values() {
        let state = RenderState::from_render_info(&render_info([
            ("blend_mode", "translucent"),
            ("cull_mode", "FRONT"),
            ("depth_write", "yes"),
        ]));
        assert_eq!(RenderState::default(), state);
    }
}
