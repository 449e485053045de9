use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("Sheet '{sheet_name}' not found. Available sheets: {available:?}")]
    SheetNotFound {
        sheet_name: String,
        available: Vec<String>,
    },

    #[error("Unsupported file format: {extension}. Supported formats: .csv")]
    UnsupportedFormat { extension: String },

    #[error("Corrupt or unreadable file: {message}")]
    CorruptFile { message: String },

    #[error("File size ({size_mb:.2} MB) exceeds maximum allowed size ({max_mb} MB)")]
    FileTooLarge { size_mb: f64, max_mb: u64 },

    #[error("Retrieval unavailable: {message}")]
    RetrievalUnavailable { message: String },

    #[error("Could not parse reasoning step: {message}")]
    ParseError { message: String },

    #[error("Column '{column}' not found. Available columns: {available:?}")]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("No data: {message}")]
    NoData { message: String },

    #[error("Invalid filter expression: {message}")]
    InvalidFilter { message: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Maximum iterations ({max_iterations}) reached without a final answer")]
    MaxIterationsExceeded { max_iterations: usize },

    #[error("Reasoner call timed out after {seconds}s")]
    ReasonerTimeout { seconds: u64 },

    #[error("Reasoner unavailable: {message}")]
    ReasonerUnavailable { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl AgentError {
    /// Whether the error stays inside the reasoning loop as an observation
    /// instead of surfacing to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::ParseError { .. }
                | AgentError::ColumnNotFound { .. }
                | AgentError::TypeMismatch { .. }
                | AgentError::InsufficientData { .. }
                | AgentError::NoData { .. }
                | AgentError::InvalidFilter { .. }
                | AgentError::UnknownTool { .. }
                | AgentError::ReasonerTimeout { .. }
        )
    }
}
