//! Shader archives store precompiled binaries for every combination of material options.
//! tbx_shader selects the variant for a material's options
//! and translates the stage binaries into GLSL that can be compiled on the host.
//!
//! Translation is expensive, especially for binaries that require an external decompiler.
//! The [ShaderCache](cache::ShaderCache) stores programs by the hash of their binaries
//! and persists the patched sources to disk, so each unique program is translated at most once.
//!
//! The main steps are:
//! 1. [resolve] option choices to a variant or one variant per pass
//! 2. [translate] each stage binary into GLSL
//! 3. [patch] the GLSL to use the binding conventions of the renderer
//! 4. [compile] the program and store it in the [cache]
//! 5. create a [binding] plan for the program's uniform blocks and samplers
pub mod archive;
pub mod binding;
pub mod cache;
pub mod compile;
pub mod config;
pub mod error;
pub mod graph;
pub mod patch;
pub mod reflection;
pub mod resolve;
pub mod translate;

pub use tbx_lib::{BinaryFlavor, ShaderStage};
