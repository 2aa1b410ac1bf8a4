use std::path::PathBuf;

use smol_str::SmolStr;
use thiserror::Error;

pub use tbx_shader::error::{CreateProgramError, ResolveVariantError};

#[derive(Debug, Error)]
pub enum LoadArchiveError {
    #[error("error reading shader archive {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing shader archive {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum ReloadProgramError {
    #[error("error loading shader archive")]
    LoadArchive(#[from] LoadArchiveError),

    #[error("program {program:?} not found in shader archive {archive:?}")]
    MissingProgram { archive: String, program: SmolStr },

    #[error("error resolving shader variant")]
    Resolve(#[from] ResolveVariantError),
}

#[derive(Debug, Error)]
pub enum CreatePassError {
    #[error("binary index out of range for vertex {vertex} and fragment {fragment}")]
    MissingBinary { vertex: usize, fragment: usize },

    #[error("error creating program")]
    CreateProgram(#[from] CreateProgramError),
}
