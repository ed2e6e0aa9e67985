//! Run-fatal error type. Per the error-handling propagation policy (§7),
//! this is the *only* tier surfaced as an `Err` from the orchestrator;
//! everything else is captured into the goal or result bundle instead of
//! aborting the run.

use thiserror::Error;

/// Errors that abort a run outright.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An enabled source id has no corresponding entry in the registry.
    #[error("unknown source referenced in configuration: {0}")]
    UnknownSource(String),

    /// An enabled source requires an API key that was not supplied.
    #[error("source '{0}' requires an API key that was not configured")]
    MissingApiKey(String),

    /// A structured LLM response failed to validate against its schema after
    /// exhausting the local retry budget.
    #[error("LLM response for template '{template}' did not match the expected schema: {reason}")]
    InvalidLlmOutput {
        /// Template that produced the bad response.
        template: String,
        /// Why validation failed.
        reason: String,
    },

    /// A prompt invocation exceeded its timeout with no retries left.
    #[error("prompt invocation '{template}' timed out after {elapsed_ms}ms")]
    PromptTimeout {
        /// Template that timed out.
        template: String,
        /// How long the call ran before timing out.
        elapsed_ms: u64,
    },

    /// Programmer error: an internal contract was violated.
    #[error("internal contract violation: {0}")]
    Internal(String),
}

/// Result type used throughout the recon crates.
pub type Result<T> = std::result::Result<T, AgentError>;
