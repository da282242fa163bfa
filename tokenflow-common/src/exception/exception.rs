use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;

use strum_macros::AsRefStr;
use thiserror::Error;

pub type FlowResult<T> = std::result::Result<T, ErrorCode>;

#[derive(Error)]
pub struct ErrorCode {
    code: u16,
    display_text: String,
    backtrace: Option<ErrorCodeBacktrace>,
}

/// The coarse failure families an engine error belongs to. Callers use the category to decide
/// whether an Execution may stay WAITING, must move to ERROR, or the branch has to terminate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
pub enum ErrorCategory {
    /// Malformed input rejected at registration or evaluation time.
    Validation,
    /// A variable, event reference or stored record could not be resolved.
    Resolution,
    /// Fork/join synchronization could not proceed.
    Synchronization,
    /// Externally supplied task logic failed.
    Delegate,
    Internal,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> String {
        self.display_text.clone()
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code {
            2000..=2099 => ErrorCategory::Validation,
            2100..=2199 => ErrorCategory::Resolution,
            2200..=2299 => ErrorCategory::Synchronization,
            2300..=2399 => ErrorCategory::Delegate,
            c if c == Self::ILLEGAL_ARGUMENT_CODE => ErrorCategory::Validation,
            c if c == Self::NOT_FOUND_CODE => ErrorCategory::Resolution,
            c if c == Self::CONFLICT_CODE => ErrorCategory::Synchronization,
            _ => ErrorCategory::Internal,
        }
    }

    /// An unresolved event reference leaves the Execution WAITING, every other failure is
    /// terminal for the branch that produced it.
    pub fn is_recoverable(&self) -> bool {
        self.code == Self::UNRESOLVED_EVENT_REF_CODE
    }

    pub fn create(
        code: u16,
        display_text: String,
        backtrace: Option<ErrorCodeBacktrace>,
    ) -> ErrorCode {
        ErrorCode {
            code,
            display_text,
            backtrace,
        }
    }
}

impl Clone for ErrorCode {
    fn clone(&self) -> Self {
        ErrorCode::create(self.code, self.message(), self.backtrace.clone())
    }
}

impl std::fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Code: {}, category = {}, displayText = {}.",
            self.code(),
            self.category().as_ref(),
            self.message(),
        )?;

        match self.backtrace.as_ref() {
            None => Ok(()),
            Some(ErrorCodeBacktrace::Origin(backtrace)) => {
                if backtrace.status() == BacktraceStatus::Disabled {
                    write!(
                        f,
                        "\n\n<Backtrace disabled by default. Please use RUST_BACKTRACE=1 to enable> "
                    )
                } else {
                    write!(f, "\n\n{}", backtrace)
                }
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Code: {}, displayText = {}.", self.code(), self.message())
    }
}

#[derive(Clone)]
pub enum ErrorCodeBacktrace {
    Origin(Arc<Backtrace>),
}

impl std::fmt::Display for ErrorCodeBacktrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCodeBacktrace::Origin(backtrace) => write!(f, "{:?}", backtrace),
        }
    }
}
