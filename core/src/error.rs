use thiserror::Error;

/// Every failure the engine can surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unsupported document structure: {0}")]
    Structure(String),

    #[error("field {path} holds a {found}, expected text")]
    Type { path: String, found: &'static str },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index error: {source}")]
    Index {
        #[source]
        source: Box<EngineError>,
    },

    #[error("malformed query: {0}")]
    Query(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("incompatible data layout: expected version {expected}, found {found}")]
    IncompatibleLayout { expected: u32, found: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn index(cause: EngineError) -> Self {
        match cause {
            // never double-wrap
            EngineError::Index { .. } => cause,
            other => EngineError::Index { source: Box::new(other) },
        }
    }

    /// The underlying failure, looking through an `Index` wrapper.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::Index { source } => source.root_cause(),
            other => other,
        }
    }

    /// True when the caller sent something the engine cannot accept, as opposed
    /// to a storage failure on our side.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.root_cause(),
            EngineError::Structure(_)
                | EngineError::Type { .. }
                | EngineError::Query(_)
                | EngineError::InvalidNamespace(_)
                | EngineError::Json(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), EngineError::NotFound(_))
    }
}
