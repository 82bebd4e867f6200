//! Target VM facade for Nova's debug adapter core.
//!
//! `nova-dap-core` consumes this crate to talk to the debuggee: thread stack
//! walks, class/method lookups, line tables and event requests. The byte-level
//! JDWP encoding lives behind implementations of [`JdwpClient`]; the trait is
//! shaped after the JDI-level operations the adapter actually needs so the
//! engine can be exercised against [`MockJdwpClient`] without a JVM.

mod types;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use types::{
    FrameInfo, JdwpError, JdwpEvent, Location, MethodId, MethodInfo, ObjectId, ReferenceType,
    ReferenceTypeId, RequestId, Result, SuspendPolicy, ThreadId, ThreadInfo, ACC_ABSTRACT,
    ACC_NATIVE, LINE_UNAVAILABLE,
};

// The mock VM is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
#[cfg(any(test, feature = "test-support"))]
pub use mock::{MockClass, MockJdwpClient, MockMethod};

/// Mock-friendly interface to a running VM.
///
/// Every call is a (potentially slow) round trip to the target. Implementations
/// must bound each call with their own timeout/cancellation and report it as
/// [`JdwpError::Timeout`] / [`JdwpError::Cancelled`]; callers never block on
/// anything else.
#[async_trait]
pub trait JdwpClient: Send + Sync {
    /// Subscribe to the asynchronous event stream of the VM.
    fn subscribe_events(&self) -> broadcast::Receiver<JdwpEvent>;

    async fn find_thread(&self, thread: ThreadId) -> Result<Option<ThreadInfo>>;

    async fn frame_count(&self, thread: ThreadId) -> Result<usize>;

    async fn frames(&self, thread: ThreadId, start: usize, count: usize) -> Result<Vec<FrameInfo>>;

    /// Loaded types whose binary name equals `name`.
    async fn classes_by_name(&self, name: &str) -> Result<Vec<ReferenceType>>;

    async fn methods(&self, type_id: ReferenceTypeId) -> Result<Vec<MethodInfo>>;

    /// Loaded nested, local and anonymous types of `type_id`.
    async fn nested_types(&self, type_id: ReferenceTypeId) -> Result<Vec<ReferenceType>>;

    /// Code locations for `line` inside `method`.
    ///
    /// Fails with [`JdwpError::AbsentInformation`] when the method carries no
    /// line table.
    async fn line_locations(
        &self,
        type_id: ReferenceTypeId,
        method: &MethodInfo,
        line: i32,
    ) -> Result<Vec<Location>>;

    /// Source line of `location`, or [`LINE_UNAVAILABLE`].
    async fn line_number(&self, location: &Location) -> Result<i32>;

    /// `SourceFile` attribute of the type, e.g. `Main.java`.
    async fn source_name(&self, type_id: ReferenceTypeId) -> Result<String>;

    async fn source_paths(&self, type_id: ReferenceTypeId) -> Result<Vec<String>>;

    /// JVM signature of the type, e.g. `Lcom/example/Main;`.
    async fn signature(&self, type_id: ReferenceTypeId) -> Result<String>;

    async fn create_class_prepare_request(&self, pattern: &str) -> Result<RequestId>;

    async fn create_breakpoint_request(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> Result<RequestId>;

    /// Only report every `count`th hit; `0` removes the filter.
    async fn set_hit_count_filter(&self, request: RequestId, count: u32) -> Result<()>;

    async fn enable_request(&self, request: RequestId) -> Result<()>;

    async fn disable_request(&self, request: RequestId) -> Result<()>;

    async fn delete_requests(&self, requests: &[RequestId]) -> Result<()>;
}
