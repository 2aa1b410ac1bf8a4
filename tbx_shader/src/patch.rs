//! Rewrite translated GLSL to match the binding conventions of the renderer.
//!
//! Constant buffers become uniform blocks named by stage and slot like `vp_3` or `fp_3`.
//! The uniform block names are unique across stages,
//! so both stages of a program can be bound without conflicts.
use std::{ops::Range, sync::LazyLock};

use log::warn;
use regex::{Captures, Regex};
use tbx_lib::ShaderStage;

use crate::error::PatchError;

/// The first line of every patched source.
pub const PATCH_MARKER: &str = "// tbx: patched";

/// The fixed length for arrays with an unspecified size.
pub const ARRAY_CAPACITY: usize = 4096;

/// The highest constant buffer slot supported for each stage.
pub const MAX_CONSTANT_BUFFER: u32 = 19;

pub const DEBUG_HIGHLIGHT: &str = "tbx_debug_highlight";

static STORAGE_BUFFER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"layout\s*\([^)]*\)\s*(?:(?:readonly|restrict|coherent)\s+)*buffer\s+CBUFFER_DATA_(\d+)\s*\{([^}]*)\}\s*(\w+)\s*;",
    )
    .expect("static regex must compile")
});

static BUFFER_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bbuffer\s+\w+\s*\{[^}]*\}").expect("static regex must compile")
});

static UNSIZED_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*\[\s*\]\s*;").expect("static regex must compile"));

static FRAGMENT_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bout\s+vec4\s+out_attr0\s*;").expect("static regex must compile")
});

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct PatchOptions {
    /// Blend a highlight color into the first fragment output for selection in the editor.
    pub debug_overlay: bool,
}

/// Patch translated `source` for `stage`.
///
/// Returns [PatchError::AlreadyPatched] if `source` is already the output of this function.
pub fn patch(source: &str, stage: ShaderStage, options: &PatchOptions) -> Result<String, PatchError> {
    if is_patched(source) {
        return Err(PatchError::AlreadyPatched);
    }

    let prefix = stage.prefix();
    let mut patched = STORAGE_BUFFER
        .replace_all(source, |c: &Captures| {
            let slot: Option<u32> = c[1].parse().ok();
            match slot {
                Some(n) if n <= MAX_CONSTANT_BUFFER => format!(
                    "layout(std140) uniform {prefix}_{n} {{{}}} {};",
                    sized_arrays(&c[2]),
                    &c[3]
                ),
                _ => {
                    warn!(
                        "Constant buffer slot {} exceeds {MAX_CONSTANT_BUFFER} and will not be converted",
                        &c[1]
                    );
                    c[0].to_string()
                }
            }
        })
        .into_owned();

    patched = size_unsized_arrays(&patched);

    if options.debug_overlay && stage == ShaderStage::Fragment {
        patched = insert_debug_overlay(&patched);
    }

    Ok(format!("{PATCH_MARKER}\n{patched}"))
}

/// Returns `true` if `source` starts with [PATCH_MARKER].
pub fn is_patched(source: &str) -> bool {
    source.lines().next().map(str::trim) == Some(PATCH_MARKER)
}

fn sized_arrays(block_body: &str) -> String {
    UNSIZED_ARRAY
        .replace_all(block_body, format!("$1[{ARRAY_CAPACITY}];"))
        .into_owned()
}

fn size_unsized_arrays(source: &str) -> String {
    // Storage buffers support runtime sized arrays.
    let buffers: Vec<Range<usize>> = BUFFER_BLOCK
        .find_iter(source)
        .map(|m| m.range())
        .collect();

    let mut output = String::new();
    let mut last = 0;
    for captures in UNSIZED_ARRAY.captures_iter(source) {
        let (Some(m), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if buffers.iter().any(|b| b.contains(&m.start())) {
            continue;
        }
        output += &source[last..m.start()];
        output += &format!("{}[{ARRAY_CAPACITY}];", name.as_str());
        last = m.end();
    }
    output += &source[last..];
    output
}

fn insert_debug_overlay(source: &str) -> String {
    // Stages without color outputs like depth only passes have nothing to highlight.
    if !FRAGMENT_OUTPUT.is_match(source) {
        warn!("Skipping debug overlay for fragment source without out_attr0");
        return source.to_string();
    }

    let blend = format!(
        "out_attr0.rgb = mix(out_attr0.rgb, {DEBUG_HIGHLIGHT}.rgb, {DEBUG_HIGHLIGHT}.a);"
    );

    // Insert the blend at the indentation of the final return.
    let mut output = match source.rfind("return;") {
        Some(i) => {
            let line_start = source[..i].rfind('\n').map(|n| n + 1).unwrap_or(0);
            let indent = &source[line_start..i];
            if indent.trim().is_empty() {
                format!("{}{blend}\n{indent}{}", &source[..i], &source[i..])
            } else {
                format!("{}{blend} {}", &source[..i], &source[i..])
            }
        }
        None => match source.rfind('}') {
            Some(i) => format!("{}    {blend}\n{}", &source[..i], &source[i..]),
            None => source.to_string(),
        },
    };

    let uniform = format!("uniform vec4 {DEBUG_HIGHLIGHT};\n");
    match version_line_end(&output) {
        Some(end) => output.insert_str(end, &uniform),
        None => output.insert_str(0, &uniform),
    }
    output
}

fn version_line_end(source: &str) -> Option<usize> {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        if line.trim_start().starts_with("#version") {
            return Some(offset + line.len());
        }
        offset += line.len();
    }
    None
}
