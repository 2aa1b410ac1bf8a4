use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::LoadConfigError, patch::PatchOptions};

/// Settings for creating a [ShaderCache](crate::cache::ShaderCache).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderCacheConfig {
    /// The directory for patched sources or `None` to only cache programs in memory.
    pub cache_dir: Option<PathBuf>,
    /// The executable used to decompile vendor binaries.
    pub decompiler_path: PathBuf,
    /// The directory for temporary bytecode files passed to the decompiler.
    pub temp_dir: Option<PathBuf>,
    pub debug_overlay: bool,
    /// Iterate this option to create passes instead of using the archive's pass option.
    pub pass_axis: Option<String>,
}

impl Default for ShaderCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            decompiler_path: PathBuf::from("tbx-decompiler"),
            temp_dir: None,
            debug_overlay: false,
            pass_axis: None,
        }
    }
}

impl ShaderCacheConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| LoadConfigError::Io {
            path: path.to_owned(),
            source: e,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, LoadConfigError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    pub fn patch_options(&self) -> PatchOptions {
        PatchOptions {
            debug_overlay: self.debug_overlay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_defaults() {
        assert_eq!(
            ShaderCacheConfig::default(),
            ShaderCacheConfig::from_json("{}").unwrap()
        );
    }

    #[test]
    fn config_from_json() {
        let config = ShaderCacheConfig::from_json(indoc! {r#"
            {
                "cache_dir": "cache/shaders",
                "decompiler_path": "tools/decompiler",
                "debug_overlay": true,
                "pass_axis": "pass"
            }
        "#})
        .unwrap();
        assert_eq!(
            ShaderCacheConfig {
                cache_dir: Some(PathBuf::from("cache/shaders")),
                decompiler_path: PathBuf::from("tools/decompiler"),
                temp_dir: None,
                debug_overlay: true,
                pass_axis: Some("pass".to_string()),
            },
            config
        );
        assert!(config.patch_options().debug_overlay);
    }

    #[test]
    fn config_invalid_json() {
        assert!(matches!(
            ShaderCacheConfig::from_json("{\"debug_overlay\": 1}"),
            Err(LoadConfigError::Json(_))
        ));
    }

    #[test]
    fn config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ShaderCacheConfig::from_file(dir.path().join("missing.json")),
            Err(LoadConfigError::Io { .. })
        ));
    }
}
