/// Errors produced by the `lxdvm-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A memory or disk size string could not be parsed.
    #[error("invalid memory size '{value}'")]
    InvalidMemorySize { value: String },

    /// A VM description field failed validation.
    #[error("description validation failed for field '{field}': {reason}")]
    InvalidDescription { field: String, reason: String },
}
