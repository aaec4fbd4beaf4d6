use thiserror::Error;

/// Typed failures surfaced by the review core. Provider failures travel as
/// `anyhow::Error` with one of these at the root where the distinction
/// matters to the caller (retry vs. give up vs. look elsewhere).
#[derive(Debug, Error)]
pub enum AssayError {
    /// No session stored under the requested id (or it expired).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The combined diff has no section for the requested file.
    #[error("no diff found for file: {0}")]
    DiffNotFound(String),

    /// The session's exclusivity flag is set; the caller may retry later.
    #[error("session busy (review in progress)")]
    Busy,

    /// A required environment variable is missing or unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}
