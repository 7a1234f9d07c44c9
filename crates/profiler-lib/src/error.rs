//! Error types shared across the profiler core

use thiserror::Error;

/// Errors raised by the remote-collaborator clients
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Non-2xx status on a submit request
    #[error("{endpoint} returned {status}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Non-200 status while polling a stage
    #[error("poll of {endpoint} returned {status}")]
    PollStatus { endpoint: String, status: u16 },

    /// The remote collaborator reported an error for the stage
    #[error("{0}")]
    Remote(String),

    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("unable to find {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Errors raised by document and snapshot stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} document {key} not found")]
    NotFound { collection: String, key: String },

    #[error("invalid document key {0:?}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the cluster lease manager
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Max clusters reached")]
    MaxClusters,

    #[error("Cluster {0} is already unreserved")]
    AlreadyUnreserved(String),

    #[error("Run {0} already holds a cluster")]
    AlreadyReserved(String),

    #[error("Unable to find cluster for run {0}")]
    UnknownRun(String),

    #[error("Cluster {run_id} is {state}")]
    InvalidState { run_id: String, state: String },

    #[error("Unable to deploy cluster: {0}")]
    Deploy(String),

    #[error("Unable to delete cluster {deployment_id}: {reason}")]
    Teardown {
        deployment_id: String,
        reason: String,
    },

    #[error("Unable to persist cluster state: {0}")]
    Snapshot(String),

    #[error("Cluster manager shut down before a result was delivered")]
    Dropped,
}

/// Errors raised while constructing or executing a profile run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("invalid run: {0}")]
    Invalid(String),

    #[error("run task aborted: {0}")]
    Aborted(String),
}

/// Errors raised when admitting a job
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
