#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nova_dap_core::{DebugConfig, DebugSession, SourceLookupProvider};
use nova_jdwp::{MockClass, MockJdwpClient, MockMethod, ReferenceTypeId, ThreadId};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn serial_config() -> DebugConfig {
    DebugConfig::default()
}

pub fn concurrent_config() -> DebugConfig {
    DebugConfig {
        async_jdwp: true,
        ..DebugConfig::default()
    }
}

pub fn session(vm: &Arc<MockJdwpClient>, config: DebugConfig) -> DebugSession {
    DebugSession::new(vm.clone(), config)
}

/// Await `fut`, failing the test instead of hanging.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out after {TIMEOUT:?}"))
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

/// A loaded `com.example.Main` with a one-line `run` method, and a thread
/// `thread` suspended `depth` frames deep inside it.
pub fn deep_stack(vm: &MockJdwpClient, thread: ThreadId, depth: usize) -> ReferenceTypeId {
    let main = vm.add_loaded_class(
        MockClass::new("com.example.Main")
            .method(MockMethod::new("main", "([Ljava/lang/String;)V").with_lines(&[(3, 0)]))
            .method(MockMethod::new("run", "(ILjava/lang/String;)V").with_lines(&[(10, 0), (11, 6)])),
    );
    vm.add_thread(thread, "main");
    for idx in 0..depth {
        let code_index = if idx % 2 == 0 { 0 } else { 7 };
        vm.push_frame(thread, main, "run", code_index);
    }
    main
}

/// Source lookup provider that answers a fixed URI and counts calls.
pub struct CountingLookup {
    pub calls: AtomicUsize,
    answer: Option<String>,
}

impl CountingLookup {
    pub fn new(answer: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            answer: answer.map(str::to_owned),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SourceLookupProvider for CountingLookup {
    fn source_file_uri(&self, _fully_qualified_name: &str, _relative_path: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}
