//! Error types for the App Operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not one of the classified cases below
    #[error("Kubernetes API error: {0}")]
    KubeError(#[source] kube::Error),

    /// Object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Object already exists on create
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Optimistic concurrency check failed
    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Secret error
    #[error("Secret error: {0}")]
    SecretError(String),

    /// The kubeconfig secret for a remote cluster does not exist (yet)
    #[error("kubeconfig secret {namespace}/{name} not found")]
    CredentialsMissing { namespace: String, name: String },

    /// A watch stream yielded something that could not be decoded
    #[error("watch error: {0}")]
    WatchError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Returns true when the object was already absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true when a write lost an optimistic concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns true when retrying the same operation can succeed without a
    /// change to the object being reconciled.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict { .. }
            | Error::CredentialsMissing { .. }
            | Error::WatchError(_) => true,
            Error::KubeError(e) => !matches!(e, kube::Error::Api(resp) if resp.code < 500),
            _ => false,
        }
    }

    /// Classify a kube client error for the object it was issued against.
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Error::AlreadyExists {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: resp.message.clone(),
            },
            _ => Error::KubeError(err),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
