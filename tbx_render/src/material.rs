use std::path::PathBuf;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tbx_shader::resolve::Options;

use crate::{pipeline::RenderInfo, resources::TextureHandle};

/// The shader assignment and parameters for a mesh from the material editor.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Material {
    pub name: String,
    /// The file containing the shader archive.
    pub shader_archive: PathBuf,
    /// The name of the program in the shader archive.
    pub program: SmolStr,
    pub options: Options,
    pub render_info: RenderInfo,
    /// Textures by sampler name.
    pub textures: IndexMap<SmolStr, TextureHandle>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TextureBinding {
    pub sampler: SmolStr,
    pub texture_unit: u32,
    pub texture: TextureHandle,
}
