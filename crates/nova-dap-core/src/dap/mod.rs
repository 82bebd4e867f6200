//! Client-facing (DAP) shapes produced by the engine.

pub mod types;

pub use types::{
    PresentationHint, Source, StackFrame, StackTraceArguments, StackTraceResponseBody,
};
