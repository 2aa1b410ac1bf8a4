//! Resources shared by every mesh with an explicit lifetime.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use log::{debug, trace};
use smol_str::SmolStr;
use tbx_shader::{archive::ShaderArchive, cache::ShaderCache, config::ShaderCacheConfig};

use crate::error::LoadArchiveError;

/// A texture created and owned by the application.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TextureHandle(pub u32);

/// Parse shader archives from the container files that embed them.
pub trait ArchiveLoader {
    fn load(&self, path: &Path) -> Result<ShaderArchive, LoadArchiveError>;
}

impl<F> ArchiveLoader for F
where
    F: Fn(&Path) -> Result<ShaderArchive, LoadArchiveError>,
{
    fn load(&self, path: &Path) -> Result<ShaderArchive, LoadArchiveError> {
        self(path)
    }
}

/// The shader cache, loaded archives, and textures shared by all meshes.
///
/// Create a single [ResourceSet] after the graphics context and pass it to each mesh.
pub struct ResourceSet {
    shader_cache: ShaderCache,
    loader: Box<dyn ArchiveLoader>,
    archives: HashMap<PathBuf, Arc<ShaderArchive>>,
    external_textures: IndexMap<SmolStr, TextureHandle>,
    pass_axis: Option<SmolStr>,
}

impl ResourceSet {
    pub fn new<L: ArchiveLoader + 'static>(config: &ShaderCacheConfig, loader: L) -> Self {
        Self::with_cache(
            ShaderCache::new(config),
            loader,
            config.pass_axis.as_deref().map(Into::into),
        )
    }

    pub fn with_cache<L: ArchiveLoader + 'static>(
        shader_cache: ShaderCache,
        loader: L,
        pass_axis: Option<SmolStr>,
    ) -> Self {
        Self {
            shader_cache,
            loader: Box::new(loader),
            archives: HashMap::new(),
            external_textures: IndexMap::new(),
            pass_axis,
        }
    }

    /// The archive at `path` loaded at most once until [Self::invalidate_archive].
    pub fn archive(&mut self, path: &Path) -> Result<Arc<ShaderArchive>, LoadArchiveError> {
        if let Some(archive) = self.archives.get(path) {
            return Ok(archive.clone());
        }

        let archive = Arc::new(self.loader.load(path)?);
        debug!(
            "Loaded shader archive {:?} with {} programs",
            archive.name,
            archive.programs.len()
        );
        self.archives.insert(path.to_owned(), archive.clone());
        Ok(archive)
    }

    /// Reload the archive at `path` the next time it is requested.
    pub fn invalidate_archive(&mut self, path: &Path) {
        if self.archives.remove(path).is_some() {
            trace!("Invalidated shader archive {path:?}");
        }
    }

    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shader_cache
    }

    pub fn shader_cache_mut(&mut self) -> &mut ShaderCache {
        &mut self.shader_cache
    }

    /// The option iterated for passes, overriding the archive's pass option.
    pub fn pass_axis(&self) -> Option<&str> {
        self.pass_axis.as_deref()
    }

    /// Set a texture that isn't assigned by materials like a shadow map or environment cube map.
    pub fn set_external_texture(&mut self, name: impl Into<SmolStr>, texture: TextureHandle) {
        self.external_textures.insert(name.into(), texture);
    }

    pub fn external_texture(&self, name: &str) -> Option<TextureHandle> {
        self.external_textures.get(name).copied()
    }

    /// Release all archives, programs, and textures.
    pub fn clear(&mut self) {
        debug!(
            "Releasing {} shader archives, {} programs, and {} textures",
            self.archives.len(),
            self.shader_cache.len(),
            self.external_textures.len()
        );
        self.archives.clear();
        self.shader_cache.clear();
        self.external_textures.clear();
    }
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        self.clear();
    }
}
