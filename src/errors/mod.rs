// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Error types
//!
//! Errors are grouped by the phase that raises them: building a pipeline,
//! resolving deferred step properties, talking to the compute backend, and
//! the cache/artifact stores. Build errors are fatal to the whole pipeline;
//! resolution and backend errors are fatal only to the step that hit them.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for trainflow operations
pub type TrainflowResult<T> = Result<T, TrainflowError>;

/// Errors raised while assembling a pipeline definition
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum BuildError {
    #[error("Step id '{id}' is declared more than once")]
    #[diagnostic(
        code(trainflow::duplicate_step_id),
        help("Step ids must be unique across the whole pipeline, including condition branches")
    )]
    DuplicateStepId { id: String },

    #[error("Step '{step}' references '{target}', which {reason}")]
    #[diagnostic(
        code(trainflow::dangling_reference),
        help("Check the step id and output name, and that the step is visible from '{step}'")
    )]
    DanglingReference {
        step: String,
        target: String,
        reason: String,
    },

    #[error("Dependency cycle detected: {}", steps.join(" -> "))]
    #[diagnostic(
        code(trainflow::cycle),
        help("Property references and depends_on entries must form a directed acyclic graph")
    )]
    Cycle { steps: Vec<String> },

    #[error("'{name}' is not a valid name")]
    #[diagnostic(
        code(trainflow::invalid_name),
        help("Use letters, digits, '_', '.' and '-', starting with a letter or digit")
    )]
    InvalidName { name: String },

    #[error("Step '{step}' uses undeclared parameter '{parameter}'")]
    #[diagnostic(code(trainflow::unknown_parameter))]
    UnknownParameter { step: String, parameter: String },

    #[error("Parameter '{name}' is invalid: {reason}")]
    #[diagnostic(code(trainflow::invalid_parameter))]
    InvalidParameter { name: String, reason: String },

    #[error("Step '{step}' is invalid: {reason}")]
    #[diagnostic(code(trainflow::invalid_step))]
    InvalidStep { step: String, reason: String },
}

/// Errors raised while resolving a property reference or condition operand
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum ResolutionError {
    #[error("Step '{step}' has not succeeded (status: {status})")]
    #[diagnostic(code(trainflow::unresolved))]
    Unresolved { step: String, status: String },

    #[error("Path '{path}' not found in output '{output}' of step '{step}'")]
    #[diagnostic(code(trainflow::path_not_found))]
    PathNotFound {
        step: String,
        output: String,
        path: String,
    },

    #[error("Type mismatch in {context}: expected {expected}, found {found}")]
    #[diagnostic(code(trainflow::type_mismatch))]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("Document at '{location}' could not be parsed: {message}")]
    #[diagnostic(code(trainflow::malformed_document))]
    MalformedDocument { location: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Errors reported by, or while talking to, the compute backend
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum BackendError {
    #[error("Backend rejected step '{step}': {message}")]
    #[diagnostic(code(trainflow::submission_rejected))]
    SubmissionRejected { step: String, message: String },

    #[error("Step '{step}' failed: {message}")]
    #[diagnostic(code(trainflow::execution_failed))]
    ExecutionFailed { step: String, message: String },

    #[error("Step '{step}' completed without producing output '{output}'")]
    #[diagnostic(code(trainflow::output_missing))]
    OutputMissing { step: String, output: String },

    #[error("Backend unavailable: {message}")]
    #[diagnostic(
        code(trainflow::backend_unavailable),
        help("Check that the compute backend is reachable and its tools are installed")
    )]
    Unavailable { message: String },
}

/// Cache store failure; always degraded to a cache miss by the caller
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
#[error("Cache error: {message}")]
#[diagnostic(code(trainflow::cache_error))]
pub struct CacheError {
    pub message: String,
}

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Artifact store failure
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
#[error("Artifact store error at '{location}': {message}")]
#[diagnostic(code(trainflow::store_error))]
pub struct StoreError {
    pub location: String,
    pub message: String,
}

impl StoreError {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Why a step ended in `failed`
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum StepFailure {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backend(#[from] BackendError),
}

impl StepFailure {
    /// Short error-kind label used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution(ResolutionError::Unresolved { .. }) => "unresolved",
            Self::Resolution(ResolutionError::PathNotFound { .. }) => "path_not_found",
            Self::Resolution(ResolutionError::TypeMismatch { .. }) => "type_mismatch",
            Self::Resolution(ResolutionError::MalformedDocument { .. }) => "malformed_document",
            Self::Resolution(ResolutionError::Store(_)) => "store",
            Self::Backend(BackendError::SubmissionRejected { .. }) => "submission_rejected",
            Self::Backend(BackendError::ExecutionFailed { .. }) => "execution_failed",
            Self::Backend(BackendError::OutputMissing { .. }) => "output_missing",
            Self::Backend(BackendError::Unavailable { .. }) => "backend_unavailable",
        }
    }
}

/// Main error type for trainflow
#[derive(Error, Debug, Diagnostic)]
pub enum TrainflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Phase errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    // ─────────────────────────────────────────────────────────────────────────
    // Registry errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline '{name}' is not registered")]
    #[diagnostic(
        code(trainflow::pipeline_not_registered),
        help("Register it first with 'trainflow create <definition>'")
    )]
    PipelineNotRegistered { name: String },

    #[error("Invalid parameter override '{raw}': {reason}")]
    #[diagnostic(
        code(trainflow::invalid_override),
        help("Overrides are written as NAME=VALUE and must match the declared parameter type")
    )]
    InvalidOverride { raw: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline definition not found: {path}")]
    #[diagnostic(code(trainflow::definition_not_found))]
    DefinitionNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(trainflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(trainflow::invalid_config))]
    InvalidConfig { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(trainflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(trainflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(trainflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(trainflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for TrainflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for TrainflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrainflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json {
            message: e.to_string(),
        }
    }
}

impl From<toml::de::Error> for TrainflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml {
            message: e.to_string(),
        }
    }
}

impl TrainflowError {
    /// Recovery hint for errors the CLI knows how to explain
    pub fn suggestion(&self) -> Option<RecoverySuggestion> {
        match self {
            Self::Build(BuildError::Cycle { steps }) => {
                Some(RecoverySuggestion::fix_cycle(steps))
            }
            Self::Build(BuildError::DanglingReference { step, target, .. }) => {
                Some(RecoverySuggestion::fix_dangling_reference(step, target))
            }
            Self::PipelineNotRegistered { name } => Some(RecoverySuggestion::register_pipeline(name)),
            _ => None,
        }
    }
}
