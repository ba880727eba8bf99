//! Error types with structured codes for job-control operations.

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for job-control operations (for machine-readable errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum JobErrorCode {
    /// Process or pipe creation failed
    Launch = 5000,
    /// Job table has no free slot
    TableFull = 5001,
    /// Unknown job id given to fg/bg
    InvalidJobReference = 5002,
    /// Forwarding a signal to a process group failed
    SignalDelivery = 5003,
    /// Argument vector is empty or not representable as a C string
    InvalidCommand = 5004,
    /// Another job already owns the foreground
    ForegroundBusy = 5005,
    /// Signal relay could not be installed
    Relay = 5006,
}

/// Errors surfaced by the job-control engine.
///
/// None of these are fatal to the shell: the caller reports them and keeps
/// reading commands.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("[{code}] Launch failed: {message}")]
    Launch { code: u32, message: String },

    #[error("[{code}] Job table full: {message}")]
    TableFull { code: u32, message: String },

    #[error("[{code}] No such job: {message}")]
    InvalidJobReference { code: u32, message: String },

    #[error("[{code}] Signal delivery failed: {message}")]
    SignalDelivery { code: u32, message: String },

    #[error("[{code}] Invalid command: {message}")]
    InvalidCommand { code: u32, message: String },

    #[error("[{code}] Foreground busy: {message}")]
    ForegroundBusy { code: u32, message: String },

    #[error("[{code}] Signal relay: {message}")]
    Relay { code: u32, message: String },
}

impl JobError {
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            code: JobErrorCode::Launch as u32,
            message: message.into(),
        }
    }

    pub fn table_full(message: impl Into<String>) -> Self {
        Self::TableFull {
            code: JobErrorCode::TableFull as u32,
            message: message.into(),
        }
    }

    pub fn invalid_job_reference(message: impl Into<String>) -> Self {
        Self::InvalidJobReference {
            code: JobErrorCode::InvalidJobReference as u32,
            message: message.into(),
        }
    }

    pub fn signal_delivery(message: impl Into<String>) -> Self {
        Self::SignalDelivery {
            code: JobErrorCode::SignalDelivery as u32,
            message: message.into(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            code: JobErrorCode::InvalidCommand as u32,
            message: message.into(),
        }
    }

    pub fn foreground_busy(message: impl Into<String>) -> Self {
        Self::ForegroundBusy {
            code: JobErrorCode::ForegroundBusy as u32,
            message: message.into(),
        }
    }

    pub fn relay(message: impl Into<String>) -> Self {
        Self::Relay {
            code: JobErrorCode::Relay as u32,
            message: message.into(),
        }
    }

    /// The structured code carried by this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::Launch { code, .. }
            | Self::TableFull { code, .. }
            | Self::InvalidJobReference { code, .. }
            | Self::SignalDelivery { code, .. }
            | Self::InvalidCommand { code, .. }
            | Self::ForegroundBusy { code, .. }
            | Self::Relay { code, .. } => *code,
        }
    }

    /// The detail text without the code and category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Launch { message, .. }
            | Self::TableFull { message, .. }
            | Self::InvalidJobReference { message, .. }
            | Self::SignalDelivery { message, .. }
            | Self::InvalidCommand { message, .. }
            | Self::ForegroundBusy { message, .. }
            | Self::Relay { message, .. } => message,
        }
    }
}
