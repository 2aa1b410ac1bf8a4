use std::path::PathBuf;

use smol_str::SmolStr;
use tbx_lib::{BinaryFlavor, ShaderStage};
use thiserror::Error;

use crate::cache::ContentHash;

pub use tbx_lib::error::MalformedBinaryError;

/// No program variant exists for the chosen options.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ResolveVariantError {
    #[error("option {0:?} is required but was not chosen")]
    MissingAxis(SmolStr),

    #[error("value {value:?} is not a choice for option {axis:?}")]
    UnknownChoice { axis: SmolStr, value: SmolStr },

    #[error("no variant is defined for choice indices {choices:?}")]
    MissingCombination { choices: Vec<usize> },

    #[error("variant index for choice indices {choices:?} does not fit in usize")]
    IndexOverflow { choices: Vec<usize> },

    #[error("variant index {index} is out of range for {count} variants")]
    InvalidIndex { index: usize, count: usize },

    #[error("pass option {0:?} is not declared by the program")]
    MissingPassAxis(SmolStr),
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("error reading shader binary")]
    Malformed(#[from] MalformedBinaryError),

    #[error("binary for stage {actual:?} was provided as stage {expected:?}")]
    StageMismatch {
        expected: ShaderStage,
        actual: ShaderStage,
    },

    #[error("{actual:?} binary was provided as {expected:?} binary")]
    FlavorMismatch {
        expected: BinaryFlavor,
        actual: BinaryFlavor,
    },

    #[error("shader decompiler {0:?} was not found")]
    MissingTool(PathBuf),

    #[error("shader decompiler exited with code {code:?}: {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("shader decompiler produced no output")]
    EmptyOutput,

    #[error("shader decompiler output is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("error running shader decompiler")]
    Io(#[from] std::io::Error),
}

impl TranslateError {
    /// Malformed binaries will never translate successfully and should not be retried.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            TranslateError::Malformed(_)
                | TranslateError::StageMismatch { .. }
                | TranslateError::FlavorMismatch { .. }
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PatchError {
    #[error("source has already been patched")]
    AlreadyPatched,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CompileError {
    #[error("error parsing {stage:?} source: {message}")]
    Parse { stage: ShaderStage, message: String },

    #[error("error linking program: {0}")]
    Link(String),
}

#[derive(Debug, Error)]
pub enum CreateProgramError {
    #[error("error translating {stage:?} binary")]
    Translate {
        stage: ShaderStage,
        #[source]
        source: TranslateError,
    },

    #[error("error patching {stage:?} source")]
    Patch {
        stage: ShaderStage,
        #[source]
        source: PatchError,
    },

    #[error("error compiling program")]
    Compile(#[from] CompileError),

    #[error("binaries for {0} previously failed to parse")]
    Malformed(ContentHash),
}

#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("error creating cache directory {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error writing cache file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading cache file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("error reading config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing config JSON")]
    Json(#[from] serde_json::Error),
}

/// Format `e` and each of its sources on a single line for logging.
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(e) = source {
        message += &format!(": {e}");
        source = e.source();
    }
    message
}
