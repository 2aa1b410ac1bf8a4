//! Translate stage binaries into GLSL 450 source.
//!
//! Translation is a pure function of the binary bytes.
//! The [ShaderCache](crate::cache::ShaderCache) relies on this to reuse results by content hash.
use std::path::PathBuf;

use tbx_lib::BinaryFlavor;

use crate::{
    archive::StageBinary, config::ShaderCacheConfig, error::TranslateError,
    reflection::StageReflection,
};

pub mod external;
pub mod isa;

pub use external::{ProcessTool, ShaderTool, ToolOutput, VendorTranslator};

/// Unpatched GLSL for a single stage.
#[derive(Debug, PartialEq, Clone)]
pub struct TranslatedStage {
    pub source: String,
    /// Accesses found while decoding or `None` if only the source text is available.
    pub reflection: Option<StageReflection>,
}

pub trait Translate {
    fn translate(&self, binary: &StageBinary) -> Result<TranslatedStage, TranslateError>;
}

/// Translate binaries of either flavor.
#[derive(Debug)]
pub struct BytecodeTranslator<T = ProcessTool> {
    pub vendor: VendorTranslator<T>,
}

impl BytecodeTranslator<ProcessTool> {
    pub fn from_config(config: &ShaderCacheConfig) -> Self {
        Self {
            vendor: VendorTranslator {
                tool: ProcessTool {
                    path: config.decompiler_path.clone(),
                },
                temp_dir: config.temp_dir.clone(),
            },
        }
    }
}

impl<T: ShaderTool> BytecodeTranslator<T> {
    pub fn new(tool: T, temp_dir: Option<PathBuf>) -> Self {
        Self {
            vendor: VendorTranslator { tool, temp_dir },
        }
    }
}

impl<T: ShaderTool> Translate for BytecodeTranslator<T> {
    fn translate(&self, binary: &StageBinary) -> Result<TranslatedStage, TranslateError> {
        if let Some(actual) = BinaryFlavor::from_magic(binary.bytes) {
            if actual != binary.flavor {
                return Err(TranslateError::FlavorMismatch {
                    expected: binary.flavor,
                    actual,
                });
            }
        }

        match binary.flavor {
            BinaryFlavor::Isa => isa::translate_isa(binary),
            BinaryFlavor::Vendor => self.vendor.translate(binary),
        }
    }
}
