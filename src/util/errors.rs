use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("{kind} {namespace}/{name} not found")]
    ProfileNotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("RenderError: {0}")]
    RenderError(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kubeerror",
            Error::SerializationError(_) => "serializationerror",
            Error::ProfileNotFound { .. } => "profilenotfound",
            Error::MetadataMissing(_) => "metadatamissing",
            Error::RenderError(_) => "rendererror",
        }
        .to_string()
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::KubeError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
