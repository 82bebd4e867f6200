use std::sync::Arc;

use nova_jdwp::{JdwpClient, ThreadId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::breakpoints::{Breakpoint, BreakpointManager, BreakpointSpec, InstallHandle};
use crate::config::DebugConfig;
use crate::dap::{StackTraceArguments, StackTraceResponseBody};
use crate::dispatch::BatchDispatcher;
use crate::error::DebugResult;
use crate::event_bus::{EventBus, Subscription};
use crate::frame_ids::FrameRef;
use crate::source::{ClientPathConverter, PathConvention, SourceLookupProvider, SourceResolver};
use crate::stack_trace::{FrameSettings, StackTraceAssembler};

/// Everything the engine keeps for one debuggee connection.
///
/// The VM connection is shared with the rest of the adapter and is never
/// closed here. Caches, frame ids and breakpoints live exactly as long as
/// the session.
pub struct DebugSession {
    config: DebugConfig,
    bus: EventBus,
    breakpoints: BreakpointManager,
    stack_traces: StackTraceAssembler,
    shutdown: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl DebugSession {
    /// Must be called from within a Tokio runtime: the VM event pump is
    /// spawned immediately.
    pub fn new(vm: Arc<dyn JdwpClient>, config: DebugConfig) -> Self {
        let dispatcher = BatchDispatcher::new(config.dispatch_mode());
        let bus = EventBus::default();
        let shutdown = CancellationToken::new();
        let pump = bus.attach(vm.subscribe_events(), shutdown.clone());

        let convention = PathConvention {
            debugger_paths_are_uri: config.debugger_paths_are_uri,
            client_paths_are_uri: config.client_paths_are_uri,
        };
        let sources = SourceResolver::new(
            config.source_cache_capacity,
            Arc::new(convention),
            config.source_paths.clone(),
        );
        let stack_traces = StackTraceAssembler::new(
            vm.clone(),
            dispatcher,
            sources,
            FrameSettings::from(&config),
        );
        let breakpoints = BreakpointManager::new(vm, dispatcher, bus.clone());

        tracing::debug!(
            target: "nova.dap",
            mode = ?dispatcher.mode(),
            source_roots = config.source_paths.len(),
            "debug session created"
        );

        Self {
            config,
            bus,
            breakpoints,
            stack_traces,
            shutdown,
            pump: Some(pump),
        }
    }

    pub fn with_source_lookup(mut self, provider: Arc<dyn SourceLookupProvider>) -> Self {
        self.stack_traces.sources_mut().set_provider(provider);
        self
    }

    pub fn with_path_converter(mut self, converter: Arc<dyn ClientPathConverter>) -> Self {
        self.stack_traces.sources_mut().set_converter(converter);
        self
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Subscribe to every VM event seen by this session.
    pub fn events(&self) -> Subscription {
        self.bus.subscribe(|_| true)
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    pub fn stack_traces(&self) -> &StackTraceAssembler {
        &self.stack_traces
    }

    pub async fn install_breakpoint(
        &self,
        source: &str,
        spec: BreakpointSpec,
    ) -> DebugResult<InstallHandle> {
        let (_, handle) = self.breakpoints.install(source, spec).await?;
        Ok(handle)
    }

    pub async fn remove_breakpoint(&self, source: &str, spec: &BreakpointSpec) -> DebugResult<()> {
        self.breakpoints.remove(source, spec).await
    }

    pub async fn set_breakpoints(
        &self,
        source: &str,
        specs: Vec<BreakpointSpec>,
    ) -> DebugResult<Vec<Breakpoint>> {
        self.breakpoints.set_breakpoints(source, specs).await
    }

    pub async fn stack_trace(&self, args: StackTraceArguments) -> StackTraceResponseBody {
        self.stack_traces.stack_trace(args).await
    }

    pub fn frame(&self, frame_id: i64) -> Option<FrameRef> {
        self.stack_traces.frame(frame_id)
    }

    pub fn on_thread_resumed(&self, thread: ThreadId) {
        self.stack_traces.on_thread_resumed(thread);
    }

    pub fn on_vm_resumed(&self) {
        self.stack_traces.on_vm_resumed();
    }

    /// Dispose every breakpoint and stop the event pump.
    pub async fn shutdown(&mut self) -> DebugResult<()> {
        let result = self.breakpoints.dispose_all().await;
        self.shutdown.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(err) = pump.await {
                tracing::warn!(target: "nova.dap", error = %err, "event pump did not stop cleanly");
            }
        }
        self.stack_traces.on_vm_resumed();
        self.stack_traces.sources().cache().clear();
        tracing::debug!(target: "nova.dap", "debug session shut down");
        result
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
