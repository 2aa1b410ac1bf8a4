//! Decompile vendor binaries with an external cross compiler.
//!
//! The tool takes the path to a file containing only the bytecode
//! and writes GLSL to stdout.
//! The output needs some cleanup to be compatible with the rest of the pipeline.
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::LazyLock,
};

use log::{trace, warn};
use regex::Regex;
use tbx_lib::{vendor::VendorBinary, ShaderStage};

use crate::{archive::StageBinary, error::TranslateError};

use super::TranslatedStage;

static SAMPLER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bs(\d+)\b").expect("static regex must compile"));

/// The captured result of running a [ShaderTool].
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// An external decompiler invoked with the path of a bytecode file.
pub trait ShaderTool {
    fn run(&self, bytecode_path: &Path) -> Result<ToolOutput, TranslateError>;
}

/// Run the decompiler executable at [path](#structfield.path) as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTool {
    pub path: PathBuf,
}

impl ShaderTool for ProcessTool {
    fn run(&self, bytecode_path: &Path) -> Result<ToolOutput, TranslateError> {
        let output = Command::new(&self.path)
            .arg(bytecode_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranslateError::MissingTool(self.path.clone()),
                _ => TranslateError::Io(e),
            })?;

        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[derive(Debug)]
pub struct VendorTranslator<T> {
    pub tool: T,
    /// The directory for temporary bytecode files or the system default if `None`.
    pub temp_dir: Option<PathBuf>,
}

impl<T: ShaderTool> VendorTranslator<T> {
    pub fn translate(&self, binary: &StageBinary) -> Result<TranslatedStage, TranslateError> {
        let vendor = VendorBinary::from_bytes(binary.bytes)?;
        if vendor.stage != binary.stage {
            return Err(TranslateError::StageMismatch {
                expected: binary.stage,
                actual: vendor.stage,
            });
        }

        let glsl = self.decompile(&vendor.bytecode)?;
        Ok(TranslatedStage {
            source: post_process(&glsl, &vendor),
            reflection: None,
        })
    }

    fn decompile(&self, bytecode: &[u8]) -> Result<String, TranslateError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tbx").suffix(".bin");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytecode)?;
        file.flush()?;

        // Close the handle so the tool can open the file on all platforms.
        let path = file.into_temp_path();
        trace!("Decompiling {path:?}");
        let output = self.tool.run(&path);

        // The file is removed regardless of whether decompilation succeeded.
        if let Err(e) = path.close() {
            warn!("Error removing temporary bytecode file: {e}");
        }

        let output = output?;
        if !output.success {
            return Err(TranslateError::ToolFailed {
                code: output.code,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let glsl = String::from_utf8(output.stdout)?;
        if glsl.trim().is_empty() {
            return Err(TranslateError::EmptyOutput);
        }
        Ok(glsl)
    }
}

/// Remove extensions, rename samplers, and inline immediate constant blocks.
pub fn post_process(glsl: &str, binary: &VendorBinary) -> String {
    let prefix = binary.stage.prefix();

    let mut output = String::new();
    let mut constants_written = false;
    for line in glsl.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#extension") {
            continue;
        }

        output += &SAMPLER_NAME.replace_all(line, format!("{prefix}_s$1"));
        output += "\n";

        if trimmed.starts_with("#version") && !constants_written {
            output += &constant_blocks_glsl(binary);
            constants_written = true;
        }
    }

    if !constants_written {
        output = constant_blocks_glsl(binary) + &output;
    }

    output
}

fn constant_blocks_glsl(binary: &VendorBinary) -> String {
    let mut glsl = String::new();
    for block in &binary.constant_blocks {
        let values = binary.constant_values(block);
        if values.is_empty() {
            continue;
        }

        let elements: Vec<_> = values
            .iter()
            .map(|v| {
                let [x, y, z, w] = v.map(float_literal);
                format!("vec4({x}, {y}, {z}, {w})")
            })
            .collect();
        glsl += &format!(
            "const vec4 icb{}[{}] = vec4[{}]({});\n",
            block.index,
            values.len(),
            values.len(),
            elements.join(", ")
        );
    }
    glsl
}

// NaN and infinity have no GLSL literal, so preserve the exact bits instead.
fn float_literal(value: f32) -> String {
    if value.is_finite() {
        format!("{value:?}")
    } else {
        format!("uintBitsToFloat(0x{:08x}u)", value.to_bits())
    }
}

/// The stage prefix used for renamed samplers.
pub fn sampler_name(stage: ShaderStage, slot: u32) -> String {
    format!("{}_s{slot}", stage.prefix())
}
