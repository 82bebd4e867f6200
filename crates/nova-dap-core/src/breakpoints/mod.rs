mod resolver;
mod spec;

use std::collections::HashMap;
use std::sync::Arc;

use nova_jdwp::JdwpClient;
use parking_lot::Mutex;

pub use resolver::{Breakpoint, InstallHandle, ResolverState, WatchRequest};
pub use spec::{BreakpointSpec, MethodSelector, WatchKind};

use crate::dispatch::BatchDispatcher;
use crate::error::{DebugError, DebugResult};
use crate::event_bus::EventBus;

/// Breakpoints of a session, grouped by the client source they were set in.
pub struct BreakpointManager {
    vm: Arc<dyn JdwpClient>,
    dispatcher: BatchDispatcher,
    bus: EventBus,
    by_source: Mutex<HashMap<String, Vec<Breakpoint>>>,
}

impl BreakpointManager {
    pub fn new(vm: Arc<dyn JdwpClient>, dispatcher: BatchDispatcher, bus: EventBus) -> Self {
        Self {
            vm,
            dispatcher,
            bus,
            by_source: Mutex::new(HashMap::new()),
        }
    }

    /// Install `spec` under `source`, or update the existing breakpoint with
    /// the same identity.
    ///
    /// A breakpoint that fails to install is disposed and forgotten.
    pub async fn install(
        &self,
        source: &str,
        spec: BreakpointSpec,
    ) -> DebugResult<(Breakpoint, InstallHandle)> {
        if let Some(existing) = self.find(source, &spec) {
            existing.update_from(&spec).await?;
            let handle = existing.install_handle();
            return Ok((existing, handle));
        }

        let breakpoint = Breakpoint::new(self.vm.clone(), self.dispatcher, spec);
        self.by_source
            .lock()
            .entry(source.to_owned())
            .or_default()
            .push(breakpoint.clone());
        match breakpoint.install(&self.bus).await {
            Ok(handle) => Ok((breakpoint, handle)),
            Err(err) => {
                self.discard(source, &breakpoint).await;
                Err(err)
            }
        }
    }

    pub async fn remove(&self, source: &str, spec: &BreakpointSpec) -> DebugResult<()> {
        let removed = {
            let mut by_source = self.by_source.lock();
            let list = by_source.get_mut(source);
            let position = list
                .as_ref()
                .and_then(|list| list.iter().position(|bp| bp.spec() == *spec));
            match (list, position) {
                (Some(list), Some(idx)) => Some(list.remove(idx)),
                _ => None,
            }
        };
        let Some(breakpoint) = removed else {
            return Err(DebugError::UnknownBreakpoint(spec.to_string()));
        };
        breakpoint.dispose().await
    }

    /// Replace the breakpoints of `source` with `specs`.
    ///
    /// Breakpoints whose identity is requested again are kept (and take over
    /// the new attributes); the rest are disposed. The result follows the
    /// order of `specs`.
    ///
    /// Every step is attempted even after a failure, and the first error is
    /// returned. Kept breakpoints stay registered either way, so a later
    /// [`Self::dispose_all`] still reaches their requests.
    pub async fn set_breakpoints(
        &self,
        source: &str,
        specs: Vec<BreakpointSpec>,
    ) -> DebugResult<Vec<Breakpoint>> {
        let mut previous = self.by_source.lock().remove(source).unwrap_or_default();
        let mut current: Vec<Breakpoint> = Vec::with_capacity(specs.len());
        let mut fresh = Vec::new();
        let mut first_err: Option<DebugError> = None;

        for spec in specs {
            if let Some(existing) = current.iter().find(|bp| bp.spec() == spec).cloned() {
                current.push(existing);
                continue;
            }
            if let Some(idx) = previous.iter().position(|bp| bp.spec() == spec) {
                let existing = previous.swap_remove(idx);
                if let Err(err) = existing.update_from(&spec).await {
                    tracing::warn!(target: "nova.dap", breakpoint = %existing.spec(), error = %err, "failed to update breakpoint");
                    first_err.get_or_insert(err);
                }
                current.push(existing);
                continue;
            }
            let breakpoint = Breakpoint::new(self.vm.clone(), self.dispatcher, spec);
            fresh.push(breakpoint.clone());
            current.push(breakpoint);
        }

        let mut unique: Vec<Breakpoint> = Vec::with_capacity(current.len());
        for breakpoint in &current {
            if !unique.iter().any(|known| known.ptr_eq(breakpoint)) {
                unique.push(breakpoint.clone());
            }
        }
        self.by_source.lock().insert(source.to_owned(), unique);

        for breakpoint in previous {
            if let Err(err) = breakpoint.dispose().await {
                tracing::warn!(target: "nova.dap", breakpoint = %breakpoint.spec(), error = %err, "failed to dispose breakpoint");
                first_err.get_or_insert(err);
            }
        }
        for breakpoint in &fresh {
            if let Err(err) = breakpoint.install(&self.bus).await {
                tracing::warn!(target: "nova.dap", breakpoint = %breakpoint.spec(), error = %err, "failed to install breakpoint");
                self.discard(source, breakpoint).await;
                first_err.get_or_insert(err);
            }
        }
        tracing::debug!(
            target: "nova.dap",
            source,
            breakpoints = current.len(),
            added = fresh.len(),
            failed = first_err.is_some(),
            "breakpoints updated"
        );
        match first_err {
            Some(err) => Err(err),
            None => Ok(current),
        }
    }

    pub fn breakpoints(&self, source: &str) -> Vec<Breakpoint> {
        self.by_source
            .lock()
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Breakpoint> {
        self.by_source.lock().values().flatten().cloned().collect()
    }

    /// Dispose everything; keeps going past individual failures and reports
    /// the first one.
    pub async fn dispose_all(&self) -> DebugResult<()> {
        let all: Vec<Breakpoint> = self
            .by_source
            .lock()
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        let mut first_err = None;
        for breakpoint in all {
            if let Err(err) = breakpoint.dispose().await {
                tracing::warn!(target: "nova.dap", breakpoint = %breakpoint.spec(), error = %err, "failed to dispose breakpoint");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Unregister `breakpoint` and release whatever it managed to create.
    async fn discard(&self, source: &str, breakpoint: &Breakpoint) {
        {
            let mut by_source = self.by_source.lock();
            if let Some(list) = by_source.get_mut(source) {
                list.retain(|bp| !bp.ptr_eq(breakpoint));
                if list.is_empty() {
                    by_source.remove(source);
                }
            }
        }
        if let Err(err) = breakpoint.dispose().await {
            tracing::debug!(target: "nova.dap", breakpoint = %breakpoint.spec(), error = %err, "failed to dispose discarded breakpoint");
        }
    }

    fn find(&self, source: &str, spec: &BreakpointSpec) -> Option<Breakpoint> {
        self.by_source
            .lock()
            .get(source)?
            .iter()
            .find(|bp| bp.spec() == *spec)
            .cloned()
    }
}
