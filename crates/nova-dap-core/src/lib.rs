//! Breakpoint resolution and stack-trace assembly for Nova's Java debug adapter.
//!
//! This crate sits between the DAP front end and a [`nova_jdwp::JdwpClient`]:
//!
//! - [`breakpoints`] turns user breakpoints into VM breakpoint requests and
//!   keeps them current as classes load.
//! - [`stack_trace`] turns a suspended thread's raw frames into DAP frames
//!   with resolved sources, display names and recyclable frame ids.
//!
//! [`DebugSession`] owns both along with the caches they share. Protocol
//! framing, launch/attach and expression evaluation live elsewhere.

pub mod breakpoints;
pub mod config;
pub mod dap;
pub mod dispatch;
mod error;
pub mod event_bus;
pub mod format;
pub mod frame_ids;
pub mod logging;
mod session;
pub mod source;
pub mod stack_frames;
pub mod stack_trace;

pub use breakpoints::{
    Breakpoint, BreakpointManager, BreakpointSpec, InstallHandle, ResolverState, WatchKind,
    WatchRequest,
};
pub use config::{ConfigError, DebugConfig, LoggingConfig};
pub use dispatch::{BatchDispatcher, DispatchMode, PartialFailure};
pub use error::{DebugError, DebugResult};
pub use event_bus::{Delivery, EventBus, Subscription, SubscriptionHandle};
pub use session::DebugSession;
pub use source::{ClientPathConverter, SourceLookupProvider};
