//! Error types for coinjar-core operations.
//! Keep CoinJarFfiError minimal and stable to avoid breaking FFI clients.

use std::path::PathBuf;

use coinjar_protocol::Resource;

// ═══════════════════════════════════════════════════════════════════════════════
// FFI-Compatible Error (for Swift/Kotlin/Python)
// ═══════════════════════════════════════════════════════════════════════════════

/// FFI-safe error type carrying only a message.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoinJarFfiError {
    #[error("{message}")]
    General { message: String },
}

impl From<String> for CoinJarFfiError {
    fn from(message: String) -> Self {
        CoinJarFfiError::General { message }
    }
}

impl From<&str> for CoinJarFfiError {
    fn from(message: &str) -> Self {
        CoinJarFfiError::General {
            message: message.to_string(),
        }
    }
}

impl From<JarError> for CoinJarFfiError {
    fn from(err: JarError) -> Self {
        CoinJarFfiError::General {
            message: err.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Internal Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors surfaced by local operations (storage, configuration, conversion).
///
/// Jar mutations themselves never fail: invalid input is a no-op and storage
/// failures are logged. This type covers the setup paths around them.
#[derive(Debug, thiserror::Error)]
pub enum JarError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found; set COINJAR_HOME or pass a root explicitly")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration write failed: {path}: {source}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Record Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid slider formula: {0}")]
    Formula(#[from] FormulaError),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Convenience type alias for Results using JarError.
pub type Result<T> = std::result::Result<T, JarError>;

impl From<JarError> for String {
    fn from(err: JarError) -> String {
        err.to_string()
    }
}

/// Failures talking to the room endpoint.
///
/// The gateway logs these and moves on; they never reach jar callers.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid endpoint URL {url}: {details}")]
    InvalidUrl { url: String, details: String },

    #[error("Request for {resource} failed: {details}")]
    Transport { resource: Resource, details: String },

    #[error("Server rejected {resource}: HTTP {status}")]
    Status { resource: Resource, status: u16 },

    #[error("Server rejected {resource}: unauthorized")]
    Unauthorized { resource: Resource },

    #[error("Malformed response for {resource}: {details}")]
    Malformed { resource: Resource, details: String },
}

/// Parse and evaluation failures for the record slider formula.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormulaError {
    #[error("unexpected character '{found}' at {position}")]
    UnexpectedChar { found: char, position: usize },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("trailing input at {0}")]
    TrailingInput(usize),

    #[error("expression exceeds {limit} nested groups or operators")]
    TooComplex { limit: usize },

    #[error("expression did not evaluate to a finite number")]
    NotFinite,
}
