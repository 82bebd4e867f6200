use std::sync::Arc;

use nova_dap_core::dap::StackTraceArguments;
use nova_dap_core::{ClientPathConverter, DebugConfig};
use nova_jdwp::{MockClass, MockJdwpClient, MockMethod};

use crate::harness::{deep_stack, serial_config, session, CountingLookup};

const THREAD: u64 = 7;

fn whole_stack() -> StackTraceArguments {
    StackTraceArguments {
        thread_id: THREAD,
        start_frame: 0,
        levels: 0,
    }
}

#[tokio::test]
async fn lookups_are_memoized_per_type() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 3);
    let lookup = CountingLookup::new(Some("jdt://contents/app.jar/com.example/Main.class"));
    let session = session(&vm, serial_config()).with_source_lookup(lookup.clone());

    let first = session.stack_trace(whole_stack()).await;
    let second = session.stack_trace(whole_stack()).await;
    assert_eq!(lookup.calls(), 1);

    for body in [&first, &second] {
        let source = body.stack_frames[2].source.as_ref().unwrap();
        assert_eq!(source.name.as_deref(), Some("Main.java"));
        assert_eq!(
            source.path.as_deref(),
            Some("jdt://contents/app.jar/com.example/Main.class")
        );
    }
}

#[tokio::test]
async fn unknown_types_are_not_looked_up_twice() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 2);
    let lookup = CountingLookup::new(None);
    let session = session(&vm, serial_config()).with_source_lookup(lookup.clone());

    session.stack_trace(whole_stack()).await;
    let body = session.stack_trace(whole_stack()).await;
    assert_eq!(lookup.calls(), 1);
    assert!(body.stack_frames.iter().all(|frame| frame.source.is_none()));
}

#[cfg(unix)]
#[tokio::test]
async fn file_uris_become_client_paths() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 1);
    let lookup = CountingLookup::new(Some("file:///work/app/src/com/example/Main.java"));
    let session = session(&vm, serial_config()).with_source_lookup(lookup);

    let body = session.stack_trace(whole_stack()).await;
    let source = body.stack_frames[0].source.as_ref().unwrap();
    assert_eq!(
        source.path.as_deref(),
        Some("/work/app/src/com/example/Main.java")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn uri_clients_keep_file_uris() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 1);
    let config = DebugConfig {
        client_paths_are_uri: true,
        ..serial_config()
    };
    let uri = "file:///work/app/src/com/example/Main.java";
    let session = session(&vm, config).with_source_lookup(CountingLookup::new(Some(uri)));

    let body = session.stack_trace(whole_stack()).await;
    let source = body.stack_frames[0].source.as_ref().unwrap();
    assert_eq!(source.path.as_deref(), Some(uri));
}

struct Remap;

impl ClientPathConverter for Remap {
    fn to_client_path(&self, debugger_path: &str) -> Option<String> {
        debugger_path
            .strip_prefix("file:///work/")
            .map(|rest| format!("C:\\checkout\\{}", rest.replace('/', "\\")))
    }
}

#[tokio::test]
async fn custom_converters_shape_client_paths() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 1);
    let lookup = CountingLookup::new(Some("file:///work/com/example/Main.java"));
    let session = session(&vm, serial_config())
        .with_source_lookup(lookup)
        .with_path_converter(Arc::new(Remap));

    let body = session.stack_trace(whole_stack()).await;
    let source = body.stack_frames[0].source.as_ref().unwrap();
    assert_eq!(
        source.path.as_deref(),
        Some("C:\\checkout\\com\\example\\Main.java")
    );
}

#[tokio::test]
async fn configured_source_roots_are_the_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("src");
    let file = root.join("com").join("example").join("Main.java");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "package com.example;\n").unwrap();

    let config_path = dir.path().join("nova-dap.toml");
    std::fs::write(
        &config_path,
        format!("sourcePaths = [{:?}]\n", root.display().to_string()),
    )
    .unwrap();
    let config = DebugConfig::load_from_path(&config_path).unwrap();
    assert_eq!(config.source_paths, vec![root.clone()]);

    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 1);
    let session = session(&vm, config);

    let body = session.stack_trace(whole_stack()).await;
    let source = body.stack_frames[0].source.as_ref().unwrap();
    assert_eq!(source.name.as_deref(), Some("Main.java"));
    assert_eq!(source.path.as_deref(), Some(file.display().to_string().as_str()));
}

#[tokio::test]
async fn classes_without_debug_info_map_to_the_enclosing_source() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("com").join("example").join("Outer.java");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "package com.example;\n").unwrap();

    let vm = Arc::new(MockJdwpClient::new());
    let anonymous = vm.add_loaded_class(
        MockClass::new("com.example.Outer$1")
            .without_debug_info()
            .method(MockMethod::new("run", "()V").with_lines(&[(21, 0)])),
    );
    vm.add_thread(THREAD, "worker");
    vm.push_frame(THREAD, anonymous, "run", 0);

    let config = DebugConfig {
        source_paths: vec![dir.path().to_path_buf()],
        ..serial_config()
    };
    let session = session(&vm, config);

    let body = session.stack_trace(whole_stack()).await;
    let frame = &body.stack_frames[0];
    assert_eq!(frame.name, "Outer$1.run()");
    assert_eq!(frame.line, 21);
    let source = frame.source.as_ref().unwrap();
    assert_eq!(source.name.as_deref(), Some("Outer.java"));
    assert_eq!(source.path.as_deref(), Some(file.display().to_string().as_str()));
}
