use thiserror::Error;

/// A stage binary with header fields that are out of range or truncated.
#[derive(Debug, Error)]
pub enum MalformedBinaryError {
    #[error("error reading binary")]
    Binrw(#[from] binrw::Error),

    #[error("binary has {size} bytes but at least {expected} bytes are required")]
    Truncated { size: usize, expected: usize },

    #[error("code size {code_size} does not match {instruction_count} instructions")]
    CodeSize {
        code_size: u32,
        instruction_count: u32,
    },

    #[error("register count {0} exceeds the maximum of 256")]
    RegisterCount(u32),

    #[error("instruction {instruction} uses register {index} but only {register_count} registers are declared")]
    RegisterIndex {
        instruction: usize,
        index: u32,
        register_count: u32,
    },

    #[error("constant block {index} range {start}..{end} is outside {size} bytes of constant data")]
    ConstantBlockRange {
        index: u32,
        start: u64,
        end: u64,
        size: usize,
    },

    #[error("constant block {index} length {length} is not a multiple of 16 bytes")]
    ConstantBlockAlignment { index: u32, length: u32 },
}
