use std::fmt;

use thiserror::Error;

pub type ThreadId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type ObjectId = u64;
pub type RequestId = i32;

pub type Result<T> = std::result::Result<T, JdwpError>;

/// Class-file access flag marking a `native` method.
pub const ACC_NATIVE: u32 = 0x0100;
/// Class-file access flag marking an `abstract` method.
pub const ACC_ABSTRACT: u32 = 0x0400;

/// Line number reported for locations without line information (native
/// methods, synthetic scaffolding).
pub const LINE_UNAVAILABLE: i32 = -1;

#[derive(Clone, Debug, Error)]
pub enum JdwpError {
    #[error("target VM disconnected")]
    Disconnected,
    #[error("absent debug information")]
    AbsentInformation,
    #[error("class not prepared")]
    ClassNotPrepared,
    #[error("invalid thread {0}")]
    InvalidThread(ThreadId),
    #[error("thread {0} is not suspended")]
    ThreadNotSuspended(ThreadId),
    #[error("object {0} has been collected")]
    ObjectCollected(ObjectId),
    #[error("invalid event request {0}")]
    InvalidRequest(RequestId),
    #[error("request cancelled")]
    Cancelled,
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("VM returned error code {0}")]
    VmError(u16),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl JdwpError {
    /// The connection is gone (or the session is shutting it down); any
    /// cleanup the caller wanted is already implied.
    pub fn is_target_gone(&self) -> bool {
        matches!(self, JdwpError::Disconnected | JdwpError::Cancelled)
    }

    /// Errors that callers degrade to an empty/partial result instead of
    /// surfacing to the client.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            JdwpError::Disconnected
                | JdwpError::Cancelled
                | JdwpError::Timeout
                | JdwpError::AbsentInformation
                | JdwpError::ClassNotPrepared
                | JdwpError::InvalidThread(_)
                | JdwpError::ThreadNotSuspended(_)
                | JdwpError::ObjectCollected(_)
        )
    }
}

/// A code location inside a loaded type.
///
/// This is the unit breakpoint resolution deduplicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

impl Location {
    pub fn method_entry(class_id: ReferenceTypeId, method_id: MethodId) -> Self {
        Self {
            class_id,
            method_id,
            index: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.class_id, self.method_id, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceType {
    pub id: ReferenceTypeId,
    /// Binary name with `.` separators, e.g. `com.example.Outer$Inner`.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    /// JVM descriptor, e.g. `(ILjava/lang/String;)V`.
    pub signature: String,
    pub generic_signature: Option<String>,
    pub mod_bits: u32,
}

impl MethodInfo {
    pub fn is_native(&self) -> bool {
        self.mod_bits & ACC_NATIVE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.mod_bits & ACC_ABSTRACT != 0
    }
}

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

/// One raw frame of a suspended thread's call stack.
///
/// Captured by a stack walk and never mutated; it goes stale the moment the
/// owning thread resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub thread: ThreadId,
    pub index: usize,
    pub location: Location,
    pub method: MethodInfo,
}

impl FrameInfo {
    pub fn declaring_type(&self) -> ReferenceTypeId {
        self.location.class_id
    }

    pub fn is_native(&self) -> bool {
        self.method.is_native()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPolicy {
    None,
    EventThread,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JdwpEvent {
    ClassPrepare {
        request_id: RequestId,
        ref_type: ReferenceType,
    },
    Breakpoint {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    VmDeath,
}

impl JdwpEvent {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            JdwpEvent::ClassPrepare { request_id, .. }
            | JdwpEvent::Breakpoint { request_id, .. } => Some(*request_id),
            JdwpEvent::VmDeath => None,
        }
    }
}
