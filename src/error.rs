use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a conversion request.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The engine never accepted a connection within the retry policy.
    #[error("engine unreachable after {attempts} connection attempts")]
    Connection { attempts: u32 },

    /// None of the candidate input filters could load the document.
    #[error("cannot open {}: no input filter accepted it (tried {tried:?})", input.display())]
    Open { input: PathBuf, tried: Vec<String> },

    #[error("PDF export failed: {0}")]
    Export(String),

    #[error("conversion exceeded timeout of {timeout:?}")]
    Timeout { timeout: Duration },

    /// The engine process died or the bridge to it was lost. Resubmitting is safe.
    #[error("engine process failure: {0}")]
    Process(String),

    #[error("failed to launch engine `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConversionError::Process(_))
    }

    /// Short machine-readable name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversionError::Connection { .. } => "connection",
            ConversionError::Open { .. } => "open",
            ConversionError::Export(_) => "export",
            ConversionError::Timeout { .. } => "timeout",
            ConversionError::Process(_) => "process",
            ConversionError::Launch { .. } => "launch",
            ConversionError::Io(_) => "io",
        }
    }
}

/// Failures of a single call across the engine bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bridge message: {0}")]
    Protocol(String),

    /// The engine answered but refused the call.
    #[error("engine rejected call: {0}")]
    Remote(String),

    #[error("bridge disconnected")]
    Disconnected,
}

impl BridgeError {
    /// Whether the bridge itself is gone, as opposed to one call being refused.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::Remote(_))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(err.to_string())
    }
}
