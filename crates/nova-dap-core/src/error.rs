use thiserror::Error;

use crate::dispatch::PartialFailure;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("jdwp: {0}")]
    Jdwp(#[from] nova_jdwp::JdwpError),
    #[error(transparent)]
    PartialFailure(#[from] PartialFailure),
    #[error("unknown breakpoint {0}")]
    UnknownBreakpoint(String),
    #[error("breakpoint was disposed before it could be verified")]
    Disposed,
}

impl DebugError {
    /// Whether the error only means the target VM went away.
    pub fn is_target_gone(&self) -> bool {
        match self {
            DebugError::Jdwp(err) => err.is_target_gone(),
            DebugError::PartialFailure(failure) => failure.is_target_gone(),
            DebugError::UnknownBreakpoint(_) | DebugError::Disposed => false,
        }
    }
}
