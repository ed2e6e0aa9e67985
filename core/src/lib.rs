//! Trait abstractions and shared data model for the `recon` research agent.
//!
//! This crate hosts the contracts every other `recon` crate programs against:
//! the [`model`] data types that flow through the engine, the out-of-scope
//! collaborator traits ([`source::SourceAdapter`], [`prompt::LlmClient`],
//! [`prompt::TemplateRenderer`], [`event::EventSink`]), and the run-fatal
//! [`error::AgentError`]. The orchestration engine itself lives in
//! `recon-agent`.

pub mod error;
pub mod event;
pub mod model;
pub mod prompt;
pub mod source;

pub use error::{AgentError, Result};
