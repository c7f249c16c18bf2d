use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Out of memory while producing output")]
    ResourceExhausted,

    #[error("Malformed output: {0}")]
    Malformed(String),

    #[error("I/O error writing output: {0}")]
    Io(#[from] std::io::Error),
}

impl OutputError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl From<std::collections::TryReserveError> for OutputError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::ResourceExhausted
    }
}
