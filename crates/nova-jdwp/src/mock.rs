use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{
    FrameInfo, JdwpClient, JdwpError, JdwpEvent, Location, MethodId, MethodInfo, ReferenceType,
    ReferenceTypeId, RequestId, Result, SuspendPolicy, ThreadId, ThreadInfo, ACC_ABSTRACT,
    ACC_NATIVE, LINE_UNAVAILABLE,
};

#[derive(Clone, Debug)]
pub struct MockMethod {
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub mod_bits: u32,
    /// `(line, code_index)` pairs of the method's line table.
    pub lines: Vec<(i32, u64)>,
}

impl MockMethod {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            generic_signature: None,
            mod_bits: 0x0001,
            lines: Vec::new(),
        }
    }

    pub fn with_lines(mut self, lines: &[(i32, u64)]) -> Self {
        self.lines = lines.to_vec();
        self
    }

    pub fn with_generic_signature(mut self, signature: impl Into<String>) -> Self {
        self.generic_signature = Some(signature.into());
        self
    }

    pub fn native(mut self) -> Self {
        self.mod_bits |= ACC_NATIVE;
        self
    }

    pub fn abstract_method(mut self) -> Self {
        self.mod_bits |= ACC_ABSTRACT;
        self
    }
}

#[derive(Clone, Debug)]
pub struct MockClass {
    pub name: String,
    /// `None` simulates a class compiled without debug information.
    pub source_name: Option<String>,
    pub source_paths: Vec<String>,
    pub methods: Vec<MockMethod>,
}

impl MockClass {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let outer = name.split('$').next().unwrap_or(&name).to_string();
        let simple = outer.rsplit('.').next().unwrap_or(&outer).to_string();
        let source_name = format!("{simple}.java");
        let source_path = format!("{}.java", outer.replace('.', "/"));
        Self {
            name,
            source_name: Some(source_name),
            source_paths: vec![source_path],
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MockMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn without_debug_info(mut self) -> Self {
        self.source_name = None;
        self.source_paths.clear();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockRequestKind {
    ClassPrepare { pattern: String },
    Breakpoint {
        location: Location,
        suspend_policy: SuspendPolicy,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockRequest {
    pub kind: MockRequestKind,
    pub enabled: bool,
    pub hit_count: Option<u32>,
}

#[derive(Debug)]
struct ClassEntry {
    id: ReferenceTypeId,
    class: MockClass,
    method_ids: Vec<MethodId>,
    loaded: bool,
}

impl ClassEntry {
    fn reference_type(&self) -> ReferenceType {
        ReferenceType {
            id: self.id,
            name: self.class.name.clone(),
        }
    }

    fn method_info(&self, idx: usize) -> MethodInfo {
        let method = &self.class.methods[idx];
        MethodInfo {
            method_id: self.method_ids[idx],
            name: method.name.clone(),
            signature: method.signature.clone(),
            generic_signature: method.generic_signature.clone(),
            mod_bits: method.mod_bits,
        }
    }

    fn method_by_id(&self, method_id: MethodId) -> Option<&MockMethod> {
        self.method_ids
            .iter()
            .position(|id| *id == method_id)
            .map(|idx| &self.class.methods[idx])
    }
}

#[derive(Debug, Default)]
struct State {
    classes: Vec<ClassEntry>,
    threads: BTreeMap<ThreadId, (String, Vec<FrameInfo>)>,
    requests: BTreeMap<RequestId, MockRequest>,
    next_type_id: ReferenceTypeId,
    next_method_id: MethodId,
    next_request_id: RequestId,
    calls: HashMap<&'static str, usize>,
    disconnected: bool,
    fail_enable: bool,
    /// Commands that fail once their remaining success budget is spent.
    failures: HashMap<&'static str, (usize, JdwpError)>,
    reply_delay: Duration,
}

impl State {
    fn class(&self, type_id: ReferenceTypeId) -> Result<&ClassEntry> {
        self.classes
            .iter()
            .find(|c| c.id == type_id && c.loaded)
            .ok_or(JdwpError::ClassNotPrepared)
    }
}

/// Deterministic, in-memory VM test double.
///
/// Classes are registered up front and become visible once "loaded"; loading
/// a class emits a `ClassPrepare` event for every enabled class-prepare
/// request whose pattern matches its name.
pub struct MockJdwpClient {
    state: Mutex<State>,
    events: broadcast::Sender<JdwpEvent>,
}

impl Default for MockJdwpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJdwpClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(State {
                next_type_id: 100,
                next_method_id: 1000,
                next_request_id: 1,
                ..State::default()
            }),
            events,
        }
    }

    /// Register a class that is not loaded yet.
    pub fn add_class(&self, class: MockClass) -> ReferenceTypeId {
        let mut state = self.state.lock();
        let id = state.next_type_id;
        state.next_type_id += 1;
        let mut method_ids = Vec::with_capacity(class.methods.len());
        for _ in &class.methods {
            method_ids.push(state.next_method_id);
            state.next_method_id += 1;
        }
        state.classes.push(ClassEntry {
            id,
            class,
            method_ids,
            loaded: false,
        });
        id
    }

    /// Register a class that is already loaded (no event is emitted).
    pub fn add_loaded_class(&self, class: MockClass) -> ReferenceTypeId {
        let id = self.add_class(class);
        let mut state = self.state.lock();
        if let Some(entry) = state.classes.iter_mut().find(|c| c.id == id) {
            entry.loaded = true;
        }
        id
    }

    /// Mark a registered class as loaded and emit the matching `ClassPrepare`
    /// events. Returns the number of events sent.
    pub fn load_class(&self, type_id: ReferenceTypeId) -> usize {
        let events = {
            let mut state = self.state.lock();
            let Some(entry) = state.classes.iter_mut().find(|c| c.id == type_id) else {
                return 0;
            };
            entry.loaded = true;
            let ref_type = entry.reference_type();
            state
                .requests
                .iter()
                .filter(|(_, req)| req.enabled)
                .filter_map(|(id, req)| match &req.kind {
                    MockRequestKind::ClassPrepare { pattern }
                        if class_pattern_matches(pattern, &ref_type.name) =>
                    {
                        Some(JdwpEvent::ClassPrepare {
                            request_id: *id,
                            ref_type: ref_type.clone(),
                        })
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        let sent = events.len();
        tracing::trace!(target: "nova.jdwp", type_id, events = sent, "mock class loaded");
        for event in events {
            let _ = self.events.send(event);
        }
        sent
    }

    pub fn method(&self, type_id: ReferenceTypeId, name: &str) -> Option<MethodInfo> {
        let state = self.state.lock();
        let entry = state.classes.iter().find(|c| c.id == type_id)?;
        let idx = entry.class.methods.iter().position(|m| m.name == name)?;
        Some(entry.method_info(idx))
    }

    pub fn add_thread(&self, thread: ThreadId, name: impl Into<String>) {
        let mut state = self.state.lock();
        state.threads.insert(thread, (name.into(), Vec::new()));
    }

    /// Push a frame below the current bottom of `thread`'s stack.
    pub fn push_frame(
        &self,
        thread: ThreadId,
        type_id: ReferenceTypeId,
        method_name: &str,
        code_index: u64,
    ) {
        let Some(method) = self.method(type_id, method_name) else {
            panic!("mock class {type_id} has no method `{method_name}`");
        };
        let mut state = self.state.lock();
        let (_, frames) = state
            .threads
            .entry(thread)
            .or_insert_with(|| (format!("thread-{thread}"), Vec::new()));
        let index = frames.len();
        frames.push(FrameInfo {
            thread,
            index,
            location: Location {
                class_id: type_id,
                method_id: method.method_id,
                index: code_index,
            },
            method,
        });
    }

    pub fn clear_frames(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        if let Some((_, frames)) = state.threads.get_mut(&thread) {
            frames.clear();
        }
    }

    pub fn request(&self, request: RequestId) -> Option<MockRequest> {
        let state = self.state.lock();
        state.requests.get(&request).cloned()
    }

    pub fn breakpoint_requests(&self) -> Vec<(RequestId, MockRequest)> {
        let state = self.state.lock();
        state
            .requests
            .iter()
            .filter(|(_, req)| matches!(req.kind, MockRequestKind::Breakpoint { .. }))
            .map(|(id, req)| (*id, req.clone()))
            .collect()
    }

    pub fn live_request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of times the named facade command has been invoked.
    pub fn calls(&self, command: &str) -> usize {
        let state = self.state.lock();
        state.calls.get(command).copied().unwrap_or(0)
    }

    /// Simulate the VM going away: every subsequent command fails with
    /// [`JdwpError::Disconnected`].
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
        tracing::debug!(target: "nova.jdwp", "mock VM disconnected");
        let _ = self.events.send(JdwpEvent::VmDeath);
    }

    /// Make `enable_request` fail as if the VM were shutting down.
    pub fn set_fail_enable(&self, fail: bool) {
        self.state.lock().fail_enable = fail;
    }

    /// Let `command` succeed `successes` more times, then fail with `err`
    /// until [`Self::clear_failures`].
    pub fn fail_after(&self, command: &'static str, successes: usize, err: JdwpError) {
        self.state.lock().failures.insert(command, (successes, err));
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Delay every reply by `delay` to widen race windows in tests.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.state.lock().reply_delay = delay;
    }

    async fn enter(&self, command: &'static str) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            *state.calls.entry(command).or_default() += 1;
            if state.disconnected {
                return Err(JdwpError::Disconnected);
            }
            if let Some((remaining, err)) = state.failures.get_mut(command) {
                if *remaining == 0 {
                    return Err(err.clone());
                }
                *remaining -= 1;
            }
            state.reply_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn insert_request(&self, kind: MockRequestKind) -> RequestId {
        let mut state = self.state.lock();
        let id = state.next_request_id;
        state.next_request_id += 1;
        state.requests.insert(
            id,
            MockRequest {
                kind,
                enabled: false,
                hit_count: None,
            },
        );
        id
    }

    fn with_request<T>(
        &self,
        request: RequestId,
        f: impl FnOnce(&mut MockRequest) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock();
        state
            .requests
            .get_mut(&request)
            .map(f)
            .ok_or(JdwpError::InvalidRequest(request))
    }
}

/// JDWP `ClassMatch` semantics: an optional leading or trailing `*`.
fn class_pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return name.ends_with(suffix);
    }
    pattern == name
}

#[async_trait]
impl JdwpClient for MockJdwpClient {
    fn subscribe_events(&self) -> broadcast::Receiver<JdwpEvent> {
        self.events.subscribe()
    }

    async fn find_thread(&self, thread: ThreadId) -> Result<Option<ThreadInfo>> {
        self.enter("find_thread").await?;
        let state = self.state.lock();
        Ok(state.threads.get(&thread).map(|(name, _)| ThreadInfo {
            id: thread,
            name: name.clone(),
        }))
    }

    async fn frame_count(&self, thread: ThreadId) -> Result<usize> {
        self.enter("frame_count").await?;
        let state = self.state.lock();
        state
            .threads
            .get(&thread)
            .map(|(_, frames)| frames.len())
            .ok_or(JdwpError::InvalidThread(thread))
    }

    async fn frames(&self, thread: ThreadId, start: usize, count: usize) -> Result<Vec<FrameInfo>> {
        self.enter("frames").await?;
        let state = self.state.lock();
        let (_, frames) = state
            .threads
            .get(&thread)
            .ok_or(JdwpError::InvalidThread(thread))?;
        let end = start.saturating_add(count);
        if end > frames.len() {
            return Err(JdwpError::VmError(504));
        }
        Ok(frames[start..end].to_vec())
    }

    async fn classes_by_name(&self, name: &str) -> Result<Vec<ReferenceType>> {
        self.enter("classes_by_name").await?;
        let state = self.state.lock();
        Ok(state
            .classes
            .iter()
            .filter(|c| c.loaded && c.class.name == name)
            .map(ClassEntry::reference_type)
            .collect())
    }

    async fn methods(&self, type_id: ReferenceTypeId) -> Result<Vec<MethodInfo>> {
        self.enter("methods").await?;
        let state = self.state.lock();
        let entry = state.class(type_id)?;
        Ok((0..entry.class.methods.len())
            .map(|idx| entry.method_info(idx))
            .collect())
    }

    async fn nested_types(&self, type_id: ReferenceTypeId) -> Result<Vec<ReferenceType>> {
        self.enter("nested_types").await?;
        let state = self.state.lock();
        let outer = format!("{}$", state.class(type_id)?.class.name);
        Ok(state
            .classes
            .iter()
            .filter(|c| c.loaded && c.class.name.starts_with(&outer))
            .map(ClassEntry::reference_type)
            .collect())
    }

    async fn line_locations(
        &self,
        type_id: ReferenceTypeId,
        method: &MethodInfo,
        line: i32,
    ) -> Result<Vec<Location>> {
        self.enter("line_locations").await?;
        let state = self.state.lock();
        let entry = state.class(type_id)?;
        let Some(mock) = entry.method_by_id(method.method_id) else {
            return Ok(Vec::new());
        };
        if mock.mod_bits & (ACC_NATIVE | ACC_ABSTRACT) != 0 {
            return Ok(Vec::new());
        }
        if mock.lines.is_empty() {
            return Err(JdwpError::AbsentInformation);
        }
        Ok(mock
            .lines
            .iter()
            .filter(|(l, _)| *l == line)
            .map(|(_, index)| Location {
                class_id: type_id,
                method_id: method.method_id,
                index: *index,
            })
            .collect())
    }

    async fn line_number(&self, location: &Location) -> Result<i32> {
        self.enter("line_number").await?;
        let state = self.state.lock();
        let entry = state.class(location.class_id)?;
        let Some(mock) = entry.method_by_id(location.method_id) else {
            return Ok(LINE_UNAVAILABLE);
        };
        Ok(mock
            .lines
            .iter()
            .filter(|(_, index)| *index <= location.index)
            .max_by_key(|(_, index)| *index)
            .map(|(line, _)| *line)
            .unwrap_or(LINE_UNAVAILABLE))
    }

    async fn source_name(&self, type_id: ReferenceTypeId) -> Result<String> {
        self.enter("source_name").await?;
        let state = self.state.lock();
        state
            .class(type_id)?
            .class
            .source_name
            .clone()
            .ok_or(JdwpError::AbsentInformation)
    }

    async fn source_paths(&self, type_id: ReferenceTypeId) -> Result<Vec<String>> {
        self.enter("source_paths").await?;
        let state = self.state.lock();
        let entry = state.class(type_id)?;
        if entry.class.source_paths.is_empty() {
            return Err(JdwpError::AbsentInformation);
        }
        Ok(entry.class.source_paths.clone())
    }

    async fn signature(&self, type_id: ReferenceTypeId) -> Result<String> {
        self.enter("signature").await?;
        let state = self.state.lock();
        let entry = state.class(type_id)?;
        Ok(format!("L{};", entry.class.name.replace('.', "/")))
    }

    async fn create_class_prepare_request(&self, pattern: &str) -> Result<RequestId> {
        self.enter("create_class_prepare_request").await?;
        let id = self.insert_request(MockRequestKind::ClassPrepare {
            pattern: pattern.to_string(),
        });
        self.with_request(id, |req| req.enabled = true)?;
        Ok(id)
    }

    async fn create_breakpoint_request(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> Result<RequestId> {
        self.enter("create_breakpoint_request").await?;
        Ok(self.insert_request(MockRequestKind::Breakpoint {
            location,
            suspend_policy,
        }))
    }

    async fn set_hit_count_filter(&self, request: RequestId, count: u32) -> Result<()> {
        self.enter("set_hit_count_filter").await?;
        self.with_request(request, |req| req.hit_count = (count > 0).then_some(count))
    }

    async fn enable_request(&self, request: RequestId) -> Result<()> {
        self.enter("enable_request").await?;
        if self.state.lock().fail_enable {
            return Err(JdwpError::Disconnected);
        }
        self.with_request(request, |req| req.enabled = true)
    }

    async fn disable_request(&self, request: RequestId) -> Result<()> {
        self.enter("disable_request").await?;
        self.with_request(request, |req| req.enabled = false)
    }

    async fn delete_requests(&self, requests: &[RequestId]) -> Result<()> {
        self.enter("delete_requests").await?;
        let mut state = self.state.lock();
        for id in requests {
            state.requests.remove(id);
        }
        Ok(())
    }
}
