//! Per mesh program state.
//!
//! Each mesh moves through the states of [MeshState] in order.
//! Changes to the material only repeat the steps that depend on the changed values.
//! Errors never abort rendering of other meshes.
//! A mesh without any valid passes is [MeshState::Invalid] and is not drawn.
use std::{path::PathBuf, sync::Arc};

use log::{debug, error};
use smol_str::SmolStr;
use tbx_shader::{
    archive::{ShaderArchive, ShaderProgram},
    binding::BindingPlan,
    cache::TranslatedShader,
    error::error_chain,
    reflection::UsedUniforms,
    resolve::{DynamicOptions, Options, ResolvedPass},
};

use crate::{
    error::{CreatePassError, ReloadProgramError},
    material::{Material, TextureBinding},
    pipeline::{RenderInfo, RenderState},
    resources::ResourceSet,
    strategy::TitleStrategy,
    vertex::{MeshAttribute, VertexLayout},
};

/// The loading steps for a mesh in the order they run.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub enum MeshState {
    Unloaded,
    /// Apply vertex layout fixups.
    LoadMesh,
    /// Derive blend, cull, and depth state from the material render info.
    ReloadRenderState,
    /// Resolve variants and create a program for each pass.
    ReloadProgram,
    Ready,
    Invalid,
}

/// A compiled program and its bindings for one pass.
#[derive(Debug, Clone)]
pub struct ProgramPass {
    pub pass: SmolStr,
    pub variant_index: usize,
    pub shader: Arc<TranslatedShader>,
    pub bindings: BindingPlan,
    pub textures: Vec<TextureBinding>,
    /// Uniforms read by the program for filtering parameters in the material editor.
    pub used_uniforms: UsedUniforms,
}

#[derive(Debug)]
pub struct RenderMesh {
    pub name: String,
    material: Material,
    attributes: Vec<MeshAttribute>,
    dynamic: DynamicOptions,
    state: MeshState,
    layout: VertexLayout,
    render_state: RenderState,
    passes: Vec<ProgramPass>,
}

impl RenderMesh {
    pub fn new(
        name: impl Into<String>,
        material: Material,
        attributes: Vec<MeshAttribute>,
        dynamic: DynamicOptions,
    ) -> Self {
        Self {
            name: name.into(),
            material,
            attributes,
            dynamic,
            state: MeshState::Unloaded,
            layout: VertexLayout::default(),
            render_state: RenderState::default(),
            passes: Vec::new(),
        }
    }

    pub fn state(&self) -> MeshState {
        self.state
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn render_state(&self) -> RenderState {
        self.render_state
    }

    pub fn passes(&self) -> &[ProgramPass] {
        &self.passes
    }

    /// Returns `true` if the mesh has at least one pass to draw.
    pub fn is_visible(&self) -> bool {
        self.state == MeshState::Ready && !self.passes.is_empty()
    }

    pub fn set_options(&mut self, options: Options) {
        if self.material.options != options {
            self.material.options = options;
            self.reenter(MeshState::ReloadProgram);
        }
    }

    pub fn set_render_info(&mut self, render_info: RenderInfo) {
        if self.material.render_info != render_info {
            self.material.render_info = render_info;
            self.reenter(MeshState::ReloadRenderState);
        }
    }

    pub fn set_skin_weight_count(&mut self, count: Option<u32>) {
        if self.dynamic.skin_weight_count != count {
            self.dynamic.skin_weight_count = count;
            self.reenter(MeshState::ReloadProgram);
        }
    }

    /// Use a different program or archive file.
    pub fn set_shader(&mut self, shader_archive: PathBuf, program: SmolStr) {
        self.material.shader_archive = shader_archive;
        self.material.program = program;
        self.reenter(MeshState::Unloaded);
    }

    /// Reload the mesh after the shader archive file changed.
    pub fn reload_archive(&mut self, resources: &mut ResourceSet) {
        resources.invalidate_archive(&self.material.shader_archive);
        self.reenter(MeshState::Unloaded);
    }

    fn reenter(&mut self, state: MeshState) {
        self.state = self.state.min(state);
    }

    /// Run the remaining loading steps until the mesh is [MeshState::Ready] or [MeshState::Invalid].
    pub fn update(
        &mut self,
        resources: &mut ResourceSet,
        strategy: &dyn TitleStrategy,
    ) -> MeshState {
        loop {
            self.state = match self.state {
                MeshState::Unloaded => {
                    self.passes.clear();
                    MeshState::LoadMesh
                }
                MeshState::LoadMesh => {
                    self.layout = VertexLayout::new(&self.attributes);
                    MeshState::ReloadRenderState
                }
                MeshState::ReloadRenderState => {
                    self.render_state = strategy.derive_render_state(&self.material.render_info);
                    MeshState::ReloadProgram
                }
                MeshState::ReloadProgram => self.reload_program(resources, strategy),
                MeshState::Ready | MeshState::Invalid => return self.state,
            };
        }
    }

    #[tracing::instrument(skip_all)]
    fn reload_program(
        &mut self,
        resources: &mut ResourceSet,
        strategy: &dyn TitleStrategy,
    ) -> MeshState {
        self.passes.clear();

        let archive = match resources.archive(&self.material.shader_archive) {
            Ok(archive) => archive,
            Err(e) => {
                self.log_error(&ReloadProgramError::from(e));
                return MeshState::Invalid;
            }
        };

        let (program, resolved) =
            match self.resolve_passes(&archive, resources.pass_axis(), strategy) {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.log_error(&e);
                    return MeshState::Invalid;
                }
            };

        for pass in resolved {
            let name = pass.pass.clone();
            match self.create_pass(&archive, program, pass, resources, strategy) {
                Ok(pass) => self.passes.push(pass),
                Err(e) => error!(
                    "Error creating pass {name:?} for mesh {:?} with material {:?}: {}",
                    self.name,
                    self.material.name,
                    error_chain(&e)
                ),
            }
        }

        // Programs without any bound resources can't render anything meaningful.
        if self.passes.iter().all(|p| p.bindings.is_empty()) {
            self.passes.clear();
        }

        if self.passes.is_empty() {
            debug!(
                "No passes to render for mesh {:?} with material {:?}",
                self.name, self.material.name
            );
            MeshState::Invalid
        } else {
            MeshState::Ready
        }
    }

    fn resolve_passes<'a>(
        &self,
        archive: &'a ShaderArchive,
        pass_axis: Option<&str>,
        strategy: &dyn TitleStrategy,
    ) -> Result<(&'a ShaderProgram, Vec<ResolvedPass>), ReloadProgramError> {
        let program = archive.programs.get(&self.material.program).ok_or_else(|| {
            ReloadProgramError::MissingProgram {
                archive: archive.name.clone(),
                program: self.material.program.clone(),
            }
        })?;

        let options = strategy.derive_options(&self.material, &self.dynamic, &program.option_space);

        // The configured pass option only applies to programs that declare it.
        let pass_axis = pass_axis
            .filter(|a| program.option_space.axis(a).is_some())
            .or(archive.pass_axis.as_deref());

        let passes = match pass_axis {
            Some(pass_axis) => program.resolve_passes(pass_axis, &options)?,
            None => {
                let variant_index = program.resolve(&options)?;
                vec![ResolvedPass {
                    pass: self.material.program.clone(),
                    variant_index,
                    variant: program.variants[variant_index],
                }]
            }
        };
        Ok((program, passes))
    }

    fn create_pass(
        &self,
        archive: &ShaderArchive,
        program: &ShaderProgram,
        resolved: ResolvedPass,
        resources: &mut ResourceSet,
        strategy: &dyn TitleStrategy,
    ) -> Result<ProgramPass, CreatePassError> {
        let binaries = archive.stage_binaries(&resolved.variant).ok_or(
            CreatePassError::MissingBinary {
                vertex: resolved.variant.vertex,
                fragment: resolved.variant.fragment,
            },
        )?;
        let shader = resources.shader_cache_mut().get_or_create(&binaries)?;

        let bindings = BindingPlan::new(&shader, &program.uniform_blocks, &program.samplers);

        let mut textures: Vec<_> = bindings
            .samplers
            .iter()
            .filter_map(|s| {
                let texture = self.material.textures.get(&s.name)?;
                Some(TextureBinding {
                    sampler: s.name.clone(),
                    texture_unit: s.texture_unit,
                    texture: *texture,
                })
            })
            .collect();
        textures.extend(strategy.bind_external_textures(&self.material, &bindings, resources));

        Ok(ProgramPass {
            pass: resolved.pass,
            variant_index: resolved.variant_index,
            used_uniforms: shader.used_uniforms(program),
            shader,
            bindings,
            textures,
        })
    }

    fn log_error(&self, e: &ReloadProgramError) {
        error!(
            "Error reloading program for mesh {:?} with material {:?}: {}",
            self.name,
            self.material.name,
            error_chain(e)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reenter_earlier_state_only() {
        let mut mesh = RenderMesh::new(
            "mesh0",
            Material::default(),
            Vec::new(),
            DynamicOptions::default(),
        );
        mesh.state = MeshState::Ready;

        mesh.set_skin_weight_count(Some(2));
        assert_eq!(MeshState::ReloadProgram, mesh.state());

        mesh.set_render_info(
            [("cull_mode".into(), "front".into())]
                .into_iter()
                .collect(),
        );
        assert_eq!(MeshState::ReloadRenderState, mesh.state());

        // Options don't move the mesh to a later state.
        mesh.set_options([("a".into(), "1".into())].into_iter().collect());
        assert_eq!(MeshState::ReloadRenderState, mesh.state());

        mesh.set_shader("b.bin".into(), "body".into());
        assert_eq!(MeshState::Unloaded, mesh.state());
    }

    #[test]
    fn unchanged_values_keep_state() {
        let mut mesh = RenderMesh::new(
            "mesh0",
            Material::default(),
            Vec::new(),
            DynamicOptions::default(),
        );
        mesh.state = MeshState::Invalid;
        mesh.set_skin_weight_count(None);
        mesh.set_options(Options::new());
        mesh.set_render_info(RenderInfo::new());
        assert_eq!(MeshState::Invalid, mesh.state());
    }
}
