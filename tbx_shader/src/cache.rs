//! A content addressed cache of translated, patched, and compiled shader programs.
//!
//! Programs are identified by a BLAKE3 hash of the stage binaries.
//! Identical binaries in different archives or variants share a single program.
//!
//! Patched sources are persisted to the cache directory as `{hash}.vert.glsl` and `{hash}.frag.glsl`.
//! Later runs compile the persisted sources without running the translator again.
//! Errors accessing the cache directory are logged and the cache continues in memory only.
use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, trace, warn};
use rayon::prelude::*;
use strum::IntoEnumIterator;
use tbx_lib::ShaderStage;

use crate::{
    archive::{ShaderProgram, StageBinaries},
    compile::{GlslValidator, ProgramCompiler, ProgramHandle},
    config::ShaderCacheConfig,
    error::{error_chain, CacheIoError, CreateProgramError},
    patch::{patch, PatchOptions},
    reflection::{StageReflection, UsedUniforms},
    translate::{BytecodeTranslator, Translate, TranslatedStage},
};

/// A BLAKE3 digest of the flavor and both stage binaries.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

/// A compiled program and the patched source for each stage.
#[derive(Debug, PartialEq, Clone)]
pub struct TranslatedShader {
    pub hash: ContentHash,
    pub vertex_source: String,
    pub fragment_source: String,
    pub program: ProgramHandle,
    pub vertex_reflection: StageReflection,
    pub fragment_reflection: StageReflection,
}

pub struct ShaderCache {
    cache_dir: Option<PathBuf>,
    translator: Box<dyn Translate + Send + Sync>,
    compiler: Box<dyn ProgramCompiler + Send>,
    patch_options: PatchOptions,
    programs: HashMap<ContentHash, Arc<TranslatedShader>>,
    /// Binaries that will never translate and aren't worth retrying.
    malformed: HashSet<ContentHash>,
}

/// The results of [ShaderCache::warm_up].
#[derive(Debug, Default)]
pub struct WarmUpReport {
    /// Programs translated for the first time.
    pub created: usize,
    /// Programs compiled from persisted sources.
    pub loaded: usize,
    pub failed: Vec<(ContentHash, CreateProgramError)>,
}

impl ContentHash {
    /// Hash the binaries in a fixed order with the length of each binary.
    pub fn new(binaries: &StageBinaries) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[binaries.flavor.marker()]);
        for stage in ShaderStage::iter() {
            let bytes = binaries.get(stage).bytes;
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", blake3::Hash::from(self.0).to_hex())
    }
}

impl TranslatedShader {
    pub fn source(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex_source,
            ShaderStage::Fragment => &self.fragment_source,
        }
    }

    pub fn reflection(&self, stage: ShaderStage) -> &StageReflection {
        match stage {
            ShaderStage::Vertex => &self.vertex_reflection,
            ShaderStage::Fragment => &self.fragment_reflection,
        }
    }

    /// The uniform names read by each stage of `program`.
    pub fn used_uniforms(&self, program: &ShaderProgram) -> UsedUniforms {
        UsedUniforms {
            vertex: self
                .vertex_reflection
                .used_uniforms(ShaderStage::Vertex, &program.uniform_blocks),
            fragment: self
                .fragment_reflection
                .used_uniforms(ShaderStage::Fragment, &program.uniform_blocks),
        }
    }
}

impl ShaderCache {
    /// Create a cache using the default translator and [GlslValidator].
    pub fn new(config: &ShaderCacheConfig) -> Self {
        Self::with_translator(
            config.cache_dir.clone(),
            BytecodeTranslator::from_config(config),
            GlslValidator::default(),
            config.patch_options(),
        )
    }

    pub fn with_translator<T, C>(
        cache_dir: Option<PathBuf>,
        translator: T,
        compiler: C,
        patch_options: PatchOptions,
    ) -> Self
    where
        T: Translate + Send + Sync + 'static,
        C: ProgramCompiler + Send + 'static,
    {
        let cache_dir = cache_dir.and_then(|dir| match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn_memory_only(&CacheIoError::CreateDir {
                    path: dir,
                    source: e,
                });
                None
            }
        });

        Self {
            cache_dir,
            translator: Box::new(translator),
            compiler: Box::new(compiler),
            patch_options,
            programs: HashMap::new(),
            malformed: HashSet::new(),
        }
    }

    /// The directory for persisted sources or `None` if the cache is memory only.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn get(&self, hash: &ContentHash) -> Option<Arc<TranslatedShader>> {
        self.programs.get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Remove programs from memory without deleting persisted sources.
    pub fn clear(&mut self) {
        self.programs.clear();
        self.malformed.clear();
    }

    /// Return the program for `binaries` and translate only if the program is not cached.
    #[tracing::instrument(skip_all)]
    pub fn get_or_create(
        &mut self,
        binaries: &StageBinaries,
    ) -> Result<Arc<TranslatedShader>, CreateProgramError> {
        let hash = ContentHash::new(binaries);
        if let Some(shader) = self.programs.get(&hash) {
            trace!("Shader cache hit for {hash}");
            return Ok(shader.clone());
        }

        if self.malformed.contains(&hash) {
            return Err(CreateProgramError::Malformed(hash));
        }

        if let Some(shader) = self.load_persisted(hash) {
            return Ok(shader);
        }

        let stages = translate_stages(&*self.translator, binaries);
        self.finish(hash, stages)
    }

    /// Create programs for all unique `programs` and translate on multiple threads.
    #[tracing::instrument(skip_all)]
    pub fn warm_up(&mut self, programs: &[StageBinaries]) -> WarmUpReport {
        let mut report = WarmUpReport::default();

        // Each hash is translated at most once even if many variants share binaries.
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for binaries in programs {
            let hash = ContentHash::new(binaries);
            if self.programs.contains_key(&hash) || !seen.insert(hash) {
                continue;
            }
            if self.malformed.contains(&hash) {
                report.failed.push((hash, CreateProgramError::Malformed(hash)));
            } else {
                pending.push((hash, *binaries));
            }
        }

        pending.retain(|(hash, _)| match self.load_persisted(*hash) {
            Some(_) => {
                report.loaded += 1;
                false
            }
            None => true,
        });

        let translator = &*self.translator;
        let translated: Vec<_> = pending
            .par_iter()
            .map(|(hash, binaries)| (*hash, translate_stages(translator, binaries)))
            .collect();

        // Patching and compiling may not be thread safe for all compilers.
        for (hash, stages) in translated {
            match self.finish(hash, stages) {
                Ok(_) => report.created += 1,
                Err(e) => {
                    warn!("Error creating program {hash}: {}", error_chain(&e));
                    report.failed.push((hash, e));
                }
            }
        }

        debug!(
            "Warmed up {} programs with {} loaded and {} failed",
            report.created,
            report.loaded,
            report.failed.len()
        );
        report
    }

    fn load_persisted(&mut self, hash: ContentHash) -> Option<Arc<TranslatedShader>> {
        let dir = self.cache_dir.as_ref()?;
        let (vertex_source, fragment_source) = match read_sources(dir, &hash, &self.patch_options) {
            Ok(sources) => sources?,
            Err(e) => {
                warn!("{}", error_chain(&e));
                return None;
            }
        };

        match self.compiler.compile(&vertex_source, &fragment_source) {
            Ok(program) => {
                debug!("Loaded persisted shader {hash}");
                let shader = Arc::new(TranslatedShader {
                    hash,
                    vertex_reflection: StageReflection::from_source(&vertex_source),
                    fragment_reflection: StageReflection::from_source(&fragment_source),
                    vertex_source,
                    fragment_source,
                    program,
                });
                self.programs.insert(hash, shader.clone());
                Some(shader)
            }
            Err(e) => {
                warn!("Error compiling persisted shader {hash}: {e}");
                None
            }
        }
    }

    fn finish(
        &mut self,
        hash: ContentHash,
        stages: Result<(TranslatedStage, TranslatedStage), CreateProgramError>,
    ) -> Result<Arc<TranslatedShader>, CreateProgramError> {
        match stages {
            Ok((vertex, fragment)) => self.insert_translated(hash, vertex, fragment),
            Err(e) => {
                if let CreateProgramError::Translate { source, .. } = &e {
                    if source.is_malformed() {
                        self.malformed.insert(hash);
                    }
                }
                Err(e)
            }
        }
    }

    fn insert_translated(
        &mut self,
        hash: ContentHash,
        vertex: TranslatedStage,
        fragment: TranslatedStage,
    ) -> Result<Arc<TranslatedShader>, CreateProgramError> {
        let vertex_source = patch_stage(&vertex.source, ShaderStage::Vertex, &self.patch_options)?;
        let fragment_source =
            patch_stage(&fragment.source, ShaderStage::Fragment, &self.patch_options)?;

        let program = self.compiler.compile(&vertex_source, &fragment_source)?;

        self.persist(&hash, &vertex_source, &fragment_source);

        let shader = Arc::new(TranslatedShader {
            hash,
            vertex_reflection: vertex
                .reflection
                .unwrap_or_else(|| StageReflection::from_source(&vertex_source)),
            fragment_reflection: fragment
                .reflection
                .unwrap_or_else(|| StageReflection::from_source(&fragment_source)),
            vertex_source,
            fragment_source,
            program,
        });
        self.programs.insert(hash, shader.clone());
        Ok(shader)
    }

    fn persist(&mut self, hash: &ContentHash, vertex: &str, fragment: &str) {
        let result = match &self.cache_dir {
            Some(dir) => write_sources(dir, hash, &self.patch_options, vertex, fragment),
            None => return,
        };
        if let Err(e) = result {
            warn_memory_only(&e);
            self.cache_dir = None;
        }
    }
}

fn translate_stages(
    translator: &(dyn Translate + Send + Sync),
    binaries: &StageBinaries,
) -> Result<(TranslatedStage, TranslatedStage), CreateProgramError> {
    let vertex = translate_stage(translator, binaries, ShaderStage::Vertex)?;
    let fragment = translate_stage(translator, binaries, ShaderStage::Fragment)?;
    Ok((vertex, fragment))
}

fn translate_stage(
    translator: &(dyn Translate + Send + Sync),
    binaries: &StageBinaries,
    stage: ShaderStage,
) -> Result<TranslatedStage, CreateProgramError> {
    translator
        .translate(&binaries.get(stage))
        .map_err(|source| CreateProgramError::Translate { stage, source })
}

fn patch_stage(
    source: &str,
    stage: ShaderStage,
    options: &PatchOptions,
) -> Result<String, CreateProgramError> {
    patch(source, stage, options).map_err(|source| CreateProgramError::Patch { stage, source })
}

/// The path of the persisted source for `stage`.
///
/// Sources patched with different `options` are stored in different files.
pub fn source_path(
    dir: &Path,
    hash: &ContentHash,
    stage: ShaderStage,
    options: &PatchOptions,
) -> PathBuf {
    let tag = if options.debug_overlay { ".overlay" } else { "" };
    dir.join(format!("{hash}{tag}.{}.glsl", stage.extension()))
}

fn write_sources(
    dir: &Path,
    hash: &ContentHash,
    options: &PatchOptions,
    vertex: &str,
    fragment: &str,
) -> Result<(), CacheIoError> {
    for (stage, source) in [(ShaderStage::Vertex, vertex), (ShaderStage::Fragment, fragment)] {
        let path = source_path(dir, hash, stage, options);

        // Write to a temporary file first to avoid leaving partially written sources.
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, source).map_err(|e| CacheIoError::Write {
            path: temp.clone(),
            source: e,
        })?;
        fs::rename(&temp, &path).map_err(|e| CacheIoError::Write { path, source: e })?;
    }
    Ok(())
}

fn read_sources(
    dir: &Path,
    hash: &ContentHash,
    options: &PatchOptions,
) -> Result<Option<(String, String)>, CacheIoError> {
    let read = |stage| {
        let path = source_path(dir, hash, stage, options);
        match fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheIoError::Read { path, source: e }),
        }
    };

    match (read(ShaderStage::Vertex)?, read(ShaderStage::Fragment)?) {
        (Some(vertex), Some(fragment)) => Ok(Some((vertex, fragment))),
        _ => Ok(None),
    }
}

fn warn_memory_only(e: &CacheIoError) {
    warn!(
        "Shader cache will only store programs in memory. {}",
        error_chain(e)
    );
}
