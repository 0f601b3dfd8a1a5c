use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ProcessError,
    InvalidOutput,
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ProcessError => "process_error",
            FailureReason::InvalidOutput => "invalid_output",
            FailureReason::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl GenerationFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn process_error(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::ProcessError, detail)
    }

    pub fn invalid_output(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::InvalidOutput, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::Timeout, detail)
    }
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "basket generation failed (reason={})", self.reason)
        } else {
            write!(
                f,
                "basket generation failed (reason={}): {}",
                self.reason, self.detail
            )
        }
    }
}

impl std::error::Error for GenerationFailure {}
