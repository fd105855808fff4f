//! Core types and error definitions for the Cadence sprint coordinator.
//!
//! This crate provides the foundational types shared across all Cadence crates:
//! the error taxonomy, identifier aliases, the wall-clock abstraction, and the
//! severity scale used by escalation and conflict records.
//!
//! # Main types
//!
//! - [`CadenceError`]: Unified error enum for every coordinator operation.
//! - [`CadenceResult`]: Convenience alias for `Result<T, CadenceError>`.
//! - [`clock::Clock`]: Injectable wall-clock time source.
//! - [`severity::Severity`]: Four-level severity scale for findings.

/// Wall-clock abstraction with a system and a manual implementation.
pub mod clock;
/// Severity scale shared by escalation and conflict records.
pub mod severity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use severity::Severity;

use uuid::Uuid;

// --- Identifiers ---

/// Identifier of a task in the dependency graph.
pub type TaskId = Uuid;

/// Identifier of a registered agent (e.g. `"developer-1"`).
pub type AgentId = String;

/// Identifier of a virtual sprint (e.g. `"sprint-1"`).
pub type SprintId = String;

// --- Error types ---

/// Top-level error type for the Cadence coordinator.
///
/// Every variant except the ambient ones (`Config`, `Json`, `Io`) is an
/// expected condition of normal operation and is returned, never panicked.
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// A task with the same id is already present in the graph.
    #[error("Duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// An agent with the same id is already registered.
    #[error("Duplicate agent: {0}")]
    DuplicateAgent(AgentId),

    /// The referenced entity (task, agent, or sprint) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Adding the edge `from -> to` would close a dependency cycle.
    #[error("Circular dependency: {from} -> {to}")]
    CircularDependency {
        /// Dependent task of the rejected edge.
        from: TaskId,
        /// Prerequisite task of the rejected edge.
        to: TaskId,
    },

    /// A sprint with this id is already running.
    #[error("Sprint already active: {0}")]
    AlreadyActive(SprintId),

    /// The sprint has not been started or has already been stopped.
    #[error("Sprint not active: {0}")]
    SprintNotActive(SprintId),

    /// Input rejected by a precondition check.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CadenceError`].
pub type CadenceResult<T> = Result<T, CadenceError>;

impl CadenceError {
    /// Shorthand for a [`CadenceError::NotFound`] naming the entity kind and id.
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        CadenceError::NotFound(format!("{kind} {id}"))
    }
}
