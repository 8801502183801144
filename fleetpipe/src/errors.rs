//! Error types for the fleetpipe engine.
//!
//! The engine keeps a three-level contextual error trail: per-host action
//! errors are combined into a task error, a failing task's error is wrapped
//! with the module name, and a module failure is wrapped with the pipeline
//! name. Nothing along the way loses an individual host's message.

use std::io;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A pipeline aborted because one of its modules failed.
    #[error("Pipeline[{name}] exec failed: {source}")]
    Pipeline {
        /// The pipeline name.
        name: String,
        /// The module failure that aborted the pipeline.
        #[source]
        source: Box<EngineError>,
    },

    /// A module aborted because one of its tasks failed.
    #[error("Module[{name}] exec failed: {source}")]
    Module {
        /// The module name.
        name: String,
        /// The task failure that aborted the module.
        #[source]
        source: Box<EngineError>,
    },

    /// One or more hosts failed a task after retries were exhausted.
    ///
    /// The message holds one `failed: [<host>] <message>` line per host.
    #[error("{0}")]
    Task(String),

    /// A cache-derived precondition could not be evaluated because the key
    /// was never populated by a prior task.
    #[error("cache key '{0}' was never populated")]
    CacheMiss(String),

    /// A module precondition check failed before any task ran.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A filesystem operation failed. Work directory errors are fatal since
    /// no remote work can proceed without one.
    #[error("{context}: {source}")]
    Io {
        /// What the engine was doing when the error occurred.
        context: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// Wraps a module failure with the enclosing pipeline's name.
    #[must_use]
    pub fn pipeline(name: impl Into<String>, source: EngineError) -> Self {
        Self::Pipeline {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Wraps a task failure with the enclosing module's name.
    #[must_use]
    pub fn module(name: impl Into<String>, source: EngineError) -> Self {
        Self::Module {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Creates an IO error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_trail_keeps_every_level() {
        let task = EngineError::Task("failed: [node1] connection refused".to_string());
        let module = EngineError::module("DeployEtcd", task);
        let pipeline = EngineError::pipeline("CreateCluster", module);

        let message = pipeline.to_string();
        assert!(message.contains("Pipeline[CreateCluster] exec failed"));
        assert!(message.contains("Module[DeployEtcd] exec failed"));
        assert!(message.contains("failed: [node1] connection refused"));
    }

    #[test]
    fn test_cache_miss_message() {
        let err = EngineError::CacheMiss("etcd.cluster-exists".to_string());
        assert_eq!(
            err.to_string(),
            "cache key 'etcd.cluster-exists' was never populated"
        );
    }
}
