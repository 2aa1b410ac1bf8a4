//! Compile patched stage sources into a program.
//!
//! Applications provide their own [ProgramCompiler] for the graphics API in use.
//! [GlslValidator] only checks that each stage parses.
use glsl_lang::{ast::TranslationUnit, parse::DefaultParse};
use tbx_lib::ShaderStage;

use crate::error::CompileError;

/// An identifier for a compiled program.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

pub trait ProgramCompiler {
    fn compile(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle, CompileError>;
}

/// Parse each stage with glsl-lang and assign sequential handles.
#[derive(Debug, Default)]
pub struct GlslValidator {
    next_handle: u32,
}

impl ProgramCompiler for GlslValidator {
    fn compile(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle, CompileError> {
        parse_stage(vertex, ShaderStage::Vertex)?;
        parse_stage(fragment, ShaderStage::Fragment)?;

        let handle = ProgramHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }
}

fn parse_stage(source: &str, stage: ShaderStage) -> Result<TranslationUnit, CompileError> {
    TranslationUnit::parse(&shader_source_no_directives(source)).map_err(|e| CompileError::Parse {
        stage,
        message: e.to_string(),
    })
}

/// Remove the `#version` and `#extension` directives not supported by the parser.
pub fn shader_source_no_directives(glsl: &str) -> String {
    glsl.lines()
        .filter(|l| {
            let l = l.trim_start();
            !l.starts_with("#version") && !l.starts_with("#extension")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const VERTEX: &str = indoc! {"
        // tbx: patched
        #version 450
        layout(std140) uniform vp_0 {
            vec4 data[4096];
        } cb0;
        layout(location = 0) in vec4 in_attr0;
        void main() {
            vec4 R0 = vec4(0.0);
            R0.x = cb0.data[1].x;
            gl_Position.x = R0.x * in_attr0.x;
            return;
        }
    "};

    const FRAGMENT: &str = indoc! {"
        #version 450
        #extension GL_ARB_separate_shader_objects : enable
        const vec4 icb0[2] = vec4[2](vec4(0.0, 0.5, 1.0, 2.0), vec4(1.0, 1.0, 1.0, 1.0));
        uniform sampler2D fp_s0;
        layout(location = 0) out vec4 out_attr0;
        void main() {
            out_attr0.x = texture(fp_s0, vec2(icb0[1].x, 0.5)).x;
            return;
        }
    "};

    #[test]
    fn compile_sequential_handles() {
        let mut compiler = GlslValidator::default();
        assert_eq!(
            ProgramHandle(0),
            compiler.compile(VERTEX, FRAGMENT).unwrap()
        );
        assert_eq!(
            ProgramHandle(1),
            compiler.compile(VERTEX, FRAGMENT).unwrap()
        );
    }

    #[test]
    fn compile_invalid_fragment() {
        let mut compiler = GlslValidator::default();
        let result = compiler.compile(VERTEX, "void main() { out_attr0 = ; }");
        assert!(matches!(
            result,
            Err(CompileError::Parse {
                stage: ShaderStage::Fragment,
                ..
            })
        ));

        // Failed programs don't use a handle.
        assert_eq!(
            ProgramHandle(0),
            compiler.compile(VERTEX, FRAGMENT).unwrap()
        );
    }

    #[test]
    fn remove_directives() {
        assert_eq!(
            "const vec4 icb0[2] = vec4[2](vec4(0.0, 0.5, 1.0, 2.0), vec4(1.0, 1.0, 1.0, 1.0));",
            shader_source_no_directives(FRAGMENT).lines().next().unwrap()
        );
    }
}
