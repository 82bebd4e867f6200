//! Breakpoint installation.
//!
//! A [`Breakpoint`] moves `Created -> Resolving -> Installed -> Disposed`.
//! While it is not disposed it keeps listening for class-prepare events, so
//! `Resolving` carries on alongside `Installed`: every newly loaded class
//! matching the breakpoint may contribute more watch requests.
//!
//! Locking: attribute and bookkeeping state sits behind short-lived
//! `parking_lot` locks that are never held across an await. Everything that
//! creates or deletes watch requests on the target runs under the async
//! `resolve_lock`, which is what makes deduplication and disposal race-free.

use std::collections::HashSet;
use std::sync::Arc;

use nova_jdwp::{
    JdwpClient, JdwpError, JdwpEvent, Location, ReferenceType, ReferenceTypeId, RequestId,
    SuspendPolicy,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::breakpoints::spec::{BreakpointSpec, WatchKind};
use crate::dispatch::{BatchDispatcher, PartialFailure, Task};
use crate::error::{DebugError, DebugResult};
use crate::event_bus::{Delivery, EventBus, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Created,
    Resolving,
    Installed,
    Disposed,
}

/// One breakpoint request on the target, owned by a single [`Breakpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub id: RequestId,
    pub location: Location,
    pub kind: WatchKind,
    pub hit_count: u32,
    pub enabled: bool,
}

/// Completes once the breakpoint is verified (has at least one watch request).
#[derive(Debug, Clone)]
pub struct InstallHandle {
    rx: watch::Receiver<bool>,
}

impl InstallHandle {
    pub fn is_verified(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until verified. Fails with [`DebugError::Disposed`] if the
    /// breakpoint is disposed first.
    pub async fn verified(&mut self) -> DebugResult<()> {
        self.rx
            .wait_for(|verified| *verified)
            .await
            .map(|_| ())
            .map_err(|_| DebugError::Disposed)
    }

    /// Whether verification was signalled since the last [`Self::mark_seen`].
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }
}

struct Inner {
    vm: Arc<dyn JdwpClient>,
    dispatcher: BatchDispatcher,
    spec: Mutex<BreakpointSpec>,
    state: Mutex<ResolverState>,
    watches: Mutex<Vec<WatchRequest>>,
    prepare_requests: Mutex<Vec<RequestId>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    installed_tx: Mutex<Option<watch::Sender<bool>>>,
    installed_rx: watch::Receiver<bool>,
    resolve_lock: tokio::sync::Mutex<()>,
}

/// A breakpoint and the watch requests resolved for it. Cheap to clone.
#[derive(Clone)]
pub struct Breakpoint {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breakpoint")
            .field("spec", &*self.inner.spec.lock())
            .field("state", &self.state())
            .field("watches", &self.inner.watches.lock().len())
            .finish()
    }
}

impl Breakpoint {
    pub fn new(vm: Arc<dyn JdwpClient>, dispatcher: BatchDispatcher, spec: BreakpointSpec) -> Self {
        let (installed_tx, installed_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                vm,
                dispatcher,
                spec: Mutex::new(spec),
                state: Mutex::new(ResolverState::Created),
                watches: Mutex::new(Vec::new()),
                prepare_requests: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
                installed_tx: Mutex::new(Some(installed_tx)),
                installed_rx,
                resolve_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn spec(&self) -> BreakpointSpec {
        self.inner.spec.lock().clone()
    }

    pub fn state(&self) -> ResolverState {
        *self.inner.state.lock()
    }

    pub fn is_verified(&self) -> bool {
        *self.inner.installed_rx.borrow()
    }

    pub fn watch_requests(&self) -> Vec<WatchRequest> {
        self.inner.watches.lock().clone()
    }

    pub fn install_handle(&self) -> InstallHandle {
        InstallHandle {
            rx: self.inner.installed_rx.clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Breakpoint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start resolving: watch for future loads of the class (and its nested
    /// classes) and resolve the copies that are already loaded.
    ///
    /// Installing twice is a no-op returning another handle.
    pub async fn install(&self, bus: &EventBus) -> DebugResult<InstallHandle> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ResolverState::Created => *state = ResolverState::Resolving,
                ResolverState::Disposed => return Err(DebugError::Disposed),
                ResolverState::Resolving | ResolverState::Installed => {
                    return Ok(self.install_handle())
                }
            }
        }

        let spec = self.spec();
        tracing::debug!(target: "nova.dap", breakpoint = %spec, "installing breakpoint");

        // Subscribe before creating the requests so no prepare event is missed.
        let mut subscription =
            bus.subscribe(|event| matches!(event, JdwpEvent::ClassPrepare { .. }));
        *self.inner.subscription.lock() = Some(subscription.handle());

        {
            let _guard = self.inner.resolve_lock.lock().await;
            if self.state() == ResolverState::Disposed {
                return Err(DebugError::Disposed);
            }
            for pattern in spec.class_prepare_patterns() {
                match self.inner.vm.create_class_prepare_request(&pattern).await {
                    Ok(id) => self.inner.prepare_requests.lock().push(id),
                    Err(err) if err.is_target_gone() => {
                        tracing::debug!(target: "nova.dap", breakpoint = %spec, error = %err, "VM gone while installing breakpoint");
                        subscription.cancel();
                        return Ok(self.install_handle());
                    }
                    Err(err) => {
                        subscription.cancel();
                        return Err(err.into());
                    }
                }
            }
        }

        let listener = self.clone();
        tokio::spawn(async move {
            while let Some(delivery) = subscription.recv().await {
                let event = match delivery {
                    Delivery::Event(event) => event,
                    Delivery::Lagged(skipped) => {
                        tracing::warn!(target: "nova.dap", breakpoint = %listener.spec(), skipped, "missed class prepare events; resolving loaded classes again");
                        if let Err(err) = listener.resync().await {
                            tracing::warn!(target: "nova.dap", breakpoint = %listener.spec(), error = %err, "failed to resolve breakpoint after missed events");
                        }
                        continue;
                    }
                };
                let JdwpEvent::ClassPrepare { request_id, ref_type } = event else {
                    continue;
                };
                if !listener.inner.prepare_requests.lock().contains(&request_id) {
                    continue;
                }
                // Nested classes fire their own prepare events.
                if let Err(err) = listener.resolve_types(vec![ref_type], false).await {
                    tracing::warn!(target: "nova.dap", breakpoint = %listener.spec(), error = %err, "failed to resolve breakpoint on class prepare");
                }
            }
        });

        let resolve_existing = {
            let this = self.clone();
            let class_name = spec.class_name().to_owned();
            async move {
                let types = match this.inner.vm.classes_by_name(&class_name).await {
                    Ok(types) => types,
                    Err(err) if err.is_recoverable() => {
                        tracing::debug!(target: "nova.dap", class = %class_name, error = %err, "could not list loaded classes");
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(target: "nova.dap", class = %class_name, error = %err, "could not list loaded classes");
                        return;
                    }
                };
                if let Err(err) = this.resolve_types(types, true).await {
                    tracing::warn!(target: "nova.dap", breakpoint = %this.spec(), error = %err, "failed to resolve breakpoint in loaded classes");
                }
            }
        };

        if spec
            .async_resolution
            .unwrap_or(self.inner.dispatcher.is_concurrent())
        {
            tokio::spawn(resolve_existing);
        } else {
            resolve_existing.await;
        }

        Ok(self.install_handle())
    }

    /// Resolve the breakpoint in `types` and create watch requests for every
    /// location not covered yet. Returns how many were created.
    ///
    /// `include_nested` searches nested classes of a type that has no match
    /// itself; it is only wanted for classes that were already loaded.
    pub async fn resolve_types(
        &self,
        types: Vec<ReferenceType>,
        include_nested: bool,
    ) -> DebugResult<usize> {
        let spec = self.spec();
        let mut locations = Vec::new();
        for ty in types {
            match self.collect_locations(&spec, &ty, include_nested).await {
                Ok(found) => locations.extend(found),
                Err(err) if err.is_recoverable() => {
                    tracing::debug!(target: "nova.dap", breakpoint = %spec, class = %ty.name, error = %err, "skipping class");
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.create_watches(locations).await
    }

    /// Resolve against every loaded copy of the class and everything nested
    /// in it, as if each had just fired its prepare event.
    async fn resync(&self) -> DebugResult<usize> {
        let vm = &self.inner.vm;
        let class_name = self.spec().class_name().to_owned();
        let mut stack = match vm.classes_by_name(&class_name).await {
            Ok(types) => types,
            Err(err) if err.is_recoverable() => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut visited = HashSet::new();
        let mut types = Vec::new();
        while let Some(ty) = stack.pop() {
            if !visited.insert(ty.id) {
                continue;
            }
            match vm.nested_types(ty.id).await {
                Ok(nested) => stack.extend(nested),
                Err(err) if err.is_recoverable() => {}
                Err(err) => return Err(err.into()),
            }
            types.push(ty);
        }
        self.resolve_types(types, false).await
    }

    async fn collect_locations(
        &self,
        spec: &BreakpointSpec,
        ty: &ReferenceType,
        include_nested: bool,
    ) -> Result<Vec<Location>, JdwpError> {
        let vm = &self.inner.vm;
        if let Some(selector) = spec.method_selector() {
            let methods = vm.methods(ty.id).await?;
            let found = methods.iter().find(|method| {
                !method.is_abstract()
                    && !method.is_native()
                    && selector.matches(
                        &method.name,
                        &method.signature,
                        method.generic_signature.as_deref(),
                    )
            });
            return Ok(found
                .map(|method| vec![Location::method_entry(ty.id, method.method_id)])
                .unwrap_or_default());
        }

        let line = spec.line_number();
        let locations = self.line_locations_in(ty.id, line).await?;
        if !locations.is_empty() || !include_nested {
            return Ok(locations);
        }

        // Depth-first, in declaration order, first hit wins.
        let mut visited = HashSet::from([ty.id]);
        let mut stack: Vec<ReferenceType> = vm.nested_types(ty.id).await?;
        stack.reverse();
        while let Some(nested) = stack.pop() {
            if !visited.insert(nested.id) {
                continue;
            }
            let locations = self.line_locations_in(nested.id, line).await?;
            if !locations.is_empty() {
                return Ok(locations);
            }
            let mut children = vm.nested_types(nested.id).await?;
            children.reverse();
            stack.extend(children);
        }
        Ok(Vec::new())
    }

    async fn line_locations_in(
        &self,
        type_id: ReferenceTypeId,
        line: i32,
    ) -> Result<Vec<Location>, JdwpError> {
        let methods = self.inner.vm.methods(type_id).await?;
        let tasks: Vec<Task<Vec<Location>>> = methods
            .into_iter()
            .map(|method| {
                let vm = self.inner.vm.clone();
                Box::pin(async move {
                    match vm.line_locations(type_id, &method, line).await {
                        Err(JdwpError::AbsentInformation) => Ok(Vec::new()),
                        other => other,
                    }
                }) as Task<Vec<Location>>
            })
            .collect();
        self.inner
            .dispatcher
            .flatten(tasks)
            .await
            .map_err(|failure| {
                failure
                    .into_first_error()
                    .unwrap_or_else(|| JdwpError::Protocol("empty batch failure".to_owned()))
            })
    }

    async fn create_watches(&self, locations: Vec<Location>) -> DebugResult<usize> {
        let _guard = self.inner.resolve_lock.lock().await;
        if self.state() == ResolverState::Disposed {
            return Ok(0);
        }
        // Attributes may have changed while locations were being fetched.
        let spec = self.spec();

        let mut covered: HashSet<Location> = self
            .inner
            .watches
            .lock()
            .iter()
            .map(|watch| watch.location)
            .collect();
        let fresh: Vec<Location> = locations
            .into_iter()
            .filter(|location| covered.insert(*location))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let kind = spec.watch_kind();
        let hit_count = spec.hit_count;
        let enabled = spec.enabled;
        let tasks: Vec<Task<Option<WatchRequest>>> = fresh
            .iter()
            .map(|&location| {
                let vm = self.inner.vm.clone();
                Box::pin(create_watch(vm, location, kind, hit_count, enabled))
                    as Task<Option<WatchRequest>>
            })
            .collect();

        let total = tasks.len();
        let mut created = Vec::new();
        let mut failures = Vec::new();
        for (idx, result) in self.inner.dispatcher.settle(tasks).await.into_iter().enumerate() {
            match result {
                Ok(Some(watch)) => created.push(watch),
                Ok(None) => {}
                Err(err) if err.is_target_gone() => {
                    tracing::debug!(target: "nova.dap", breakpoint = %spec, location = %fresh[idx], "VM gone while creating watch request");
                }
                Err(err) => failures.push((idx, err)),
            }
        }

        let count = created.len();
        if count > 0 {
            self.inner.watches.lock().extend(created);
            self.mark_installed(&spec, count);
        }

        if failures.is_empty() {
            Ok(count)
        } else {
            Err(PartialFailure { total, failures }.into())
        }
    }

    fn mark_installed(&self, spec: &BreakpointSpec, added: usize) {
        {
            let mut state = self.inner.state.lock();
            if *state == ResolverState::Resolving {
                *state = ResolverState::Installed;
            }
        }
        let fired = self
            .inner
            .installed_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| {
                tx.send_if_modified(|verified| !std::mem::replace(verified, true))
            });
        if fired {
            tracing::info!(target: "nova.dap", breakpoint = %spec, watches = added, "breakpoint verified");
        } else {
            tracing::debug!(target: "nova.dap", breakpoint = %spec, watches = added, "breakpoint gained watch requests");
        }
    }

    /// Change the hit count on every watch request (`0` removes it).
    pub async fn set_hit_count(&self, hit_count: u32) -> DebugResult<()> {
        let _guard = self.inner.resolve_lock.lock().await;
        let enabled = {
            let mut spec = self.inner.spec.lock();
            spec.hit_count = hit_count;
            spec.enabled
        };
        let vm = &self.inner.vm;
        for id in self.watch_ids() {
            let result = async {
                vm.disable_request(id).await?;
                vm.set_hit_count_filter(id, hit_count).await?;
                if enabled {
                    vm.enable_request(id).await?;
                }
                Ok::<_, JdwpError>(())
            }
            .await;
            match result {
                Ok(()) => self.update_watch(id, |watch| watch.hit_count = hit_count),
                Err(err) if err.is_target_gone() => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub async fn set_enabled(&self, enabled: bool) -> DebugResult<()> {
        let _guard = self.inner.resolve_lock.lock().await;
        self.inner.spec.lock().enabled = enabled;
        let vm = &self.inner.vm;
        for id in self.watch_ids() {
            let result = if enabled {
                vm.enable_request(id).await
            } else {
                vm.disable_request(id).await
            };
            match result {
                Ok(()) => self.update_watch(id, |watch| watch.enabled = enabled),
                Err(err) if err.is_target_gone() => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn set_condition(&self, condition: Option<String>) {
        self.inner.spec.lock().condition = condition;
    }

    pub fn set_log_message(&self, log_message: Option<String>) {
        self.inner.spec.lock().log_message = log_message;
    }

    /// Take over the attributes of `spec`, which has the same identity.
    pub async fn update_from(&self, spec: &BreakpointSpec) -> DebugResult<()> {
        let current = self.spec();
        self.set_condition(spec.condition.clone());
        self.set_log_message(spec.log_message.clone());
        if current.hit_count != spec.hit_count {
            self.set_hit_count(spec.hit_count).await?;
        }
        if current.enabled != spec.enabled {
            self.set_enabled(spec.enabled).await?;
        }
        Ok(())
    }

    /// Stop listening for class loads and delete every request this
    /// breakpoint created. Idempotent.
    pub async fn dispose(&self) -> DebugResult<()> {
        {
            let mut state = self.inner.state.lock();
            if *state == ResolverState::Disposed {
                return Ok(());
            }
            *state = ResolverState::Disposed;
        }
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.cancel();
        }
        self.inner.installed_tx.lock().take();

        let _guard = self.inner.resolve_lock.lock().await;
        let mut requests: Vec<RequestId> = self
            .inner
            .watches
            .lock()
            .drain(..)
            .map(|watch| watch.id)
            .collect();
        requests.append(&mut self.inner.prepare_requests.lock());
        tracing::debug!(target: "nova.dap", breakpoint = %self.spec(), requests = requests.len(), "disposing breakpoint");
        if requests.is_empty() {
            return Ok(());
        }
        match self.inner.vm.delete_requests(&requests).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_target_gone() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn watch_ids(&self) -> Vec<RequestId> {
        self.inner.watches.lock().iter().map(|watch| watch.id).collect()
    }

    fn update_watch(&self, id: RequestId, f: impl FnOnce(&mut WatchRequest)) {
        if let Some(watch) = self.inner.watches.lock().iter_mut().find(|w| w.id == id) {
            f(watch);
        }
    }
}

/// Create, filter and enable one breakpoint request.
///
/// `Ok(None)` when the VM went away after the request was created.
async fn create_watch(
    vm: Arc<dyn JdwpClient>,
    location: Location,
    kind: WatchKind,
    hit_count: u32,
    enabled: bool,
) -> Result<Option<WatchRequest>, JdwpError> {
    let id = vm
        .create_breakpoint_request(location, SuspendPolicy::EventThread)
        .await?;
    let setup = async {
        if hit_count > 0 {
            vm.set_hit_count_filter(id, hit_count).await?;
        }
        if enabled {
            vm.enable_request(id).await?;
        }
        Ok::<_, JdwpError>(())
    }
    .await;

    match setup {
        Ok(()) => Ok(Some(WatchRequest {
            id,
            location,
            kind,
            hit_count,
            enabled,
        })),
        Err(err) => {
            if let Err(cleanup) = vm.delete_requests(&[id]).await {
                if !cleanup.is_target_gone() {
                    tracing::debug!(target: "nova.dap", request = id, error = %cleanup, "failed to delete half-configured watch request");
                }
            }
            if err.is_target_gone() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}
