//! Error types for the record store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("failed to update {kind} {namespace}/{name} after {attempts} attempts due to {last}")]
    AttemptsExhausted {
        kind: String,
        namespace: String,
        name: String,
        attempts: u32,
        last: String,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a kube error for the object it concerned.
    pub fn from_kube(kind: &str, namespace: &str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err)
                if api_err.code == 409 && api_err.reason == "AlreadyExists" =>
            {
                StoreError::AlreadyExists {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: api_err.message.clone(),
            },
            _ => StoreError::Api(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::AttemptsExhausted { .. } => true,
            StoreError::NotFound { .. } | StoreError::AlreadyExists { .. } => true,
            StoreError::Api(kube::Error::Api(api_err)) => {
                let code = api_err.code;
                if (400..500).contains(&code) {
                    return code == 409 || code == 429;
                }
                true
            }
            StoreError::Api(_) => true,
            StoreError::Serialization(_) => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
