use std::sync::Arc;

use nova_dap_core::dap::{PresentationHint, StackTraceArguments, StackTraceResponseBody};
use nova_jdwp::{JdwpError, MockClass, MockJdwpClient, MockMethod};

use crate::harness::{concurrent_config, deep_stack, serial_config, session, CountingLookup};

const THREAD: u64 = 1;

fn args(start_frame: i64, levels: i64) -> StackTraceArguments {
    StackTraceArguments {
        thread_id: THREAD,
        start_frame,
        levels,
    }
}

#[tokio::test]
async fn pages_are_cut_from_the_requested_range() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 10);
    let session = session(&vm, serial_config());

    let body = session.stack_trace(args(2, 3)).await;
    assert_eq!(body.total_frames, 10);
    assert_eq!(body.stack_frames.len(), 3);

    let indices: Vec<_> = body
        .stack_frames
        .iter()
        .map(|frame| session.frame(frame.id).unwrap().index)
        .collect();
    assert_eq!(indices, vec![2, 3, 4]);

    let top = &body.stack_frames[0];
    assert_eq!(top.name, "Main.run(int,String)");
    assert_eq!(top.line, 10);
    assert_eq!(top.column, 1);
    assert_eq!(body.stack_frames[1].line, 11);
    assert_eq!(top.presentation_hint, None);
}

#[tokio::test]
async fn whole_stack_requests_are_stable() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 4);
    let session = session(&vm, serial_config());

    let first = session.stack_trace(args(0, 0)).await;
    let second = session.stack_trace(args(0, 0)).await;
    assert_eq!(first.stack_frames.len(), 4);
    assert_eq!(first, second);
}

#[tokio::test]
async fn ranges_past_the_bottom_are_empty() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 3);
    let session = session(&vm, serial_config());

    assert_eq!(session.stack_trace(args(3, 5)).await, StackTraceResponseBody::empty(3));
    assert_eq!(session.stack_trace(args(7, 0)).await, StackTraceResponseBody::empty(3));
    assert_eq!(vm.calls("frames"), 0);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_vm() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 3);
    let session = session(&vm, serial_config());

    assert_eq!(session.stack_trace(args(-1, 5)).await, StackTraceResponseBody::empty(0));
    assert_eq!(session.stack_trace(args(0, -2)).await, StackTraceResponseBody::empty(0));
    assert_eq!(vm.calls("find_thread"), 0);

    let unknown = StackTraceArguments {
        thread_id: 99,
        start_frame: 0,
        levels: 0,
    };
    assert_eq!(session.stack_trace(unknown).await, StackTraceResponseBody::empty(0));
}

#[tokio::test]
async fn frames_without_line_information_are_subtle() {
    let vm = Arc::new(MockJdwpClient::new());
    let util = vm.add_loaded_class(
        MockClass::new("com.example.Util")
            .method(MockMethod::new("hash", "(Ljava/lang/Object;)I").native())
            .method(MockMethod::new("lambda$run$0", "()V")),
    );
    vm.add_thread(THREAD, "main");
    vm.push_frame(THREAD, util, "hash", 0);
    vm.push_frame(THREAD, util, "lambda$run$0", 0);

    let lookup = CountingLookup::new(Some("jdt://contents/rt.jar/com.example/Util.class"));
    let session = session(&vm, serial_config()).with_source_lookup(lookup);
    let body = session.stack_trace(args(0, 0)).await;

    let native = &body.stack_frames[0];
    assert_eq!(native.name, "Util.hash(Object)[native method]");
    assert_eq!(native.line, -1);
    assert_eq!(native.presentation_hint, Some(PresentationHint::Subtle));
    let source = native.source.as_ref().unwrap();
    assert_eq!(source.name.as_deref(), Some("Util.java"));

    let synthetic = &body.stack_frames[1];
    assert_eq!(synthetic.name, "Util.lambda$run$0()");
    assert_eq!(synthetic.presentation_hint, Some(PresentationHint::Subtle));
    assert!(synthetic.source.is_none());
}

#[tokio::test]
async fn later_pages_reuse_the_captured_stack() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 10);
    let session = session(&vm, serial_config());

    session.stack_trace(args(0, 5)).await;
    assert_eq!(vm.calls("frames"), 1);
    session.stack_trace(args(2, 3)).await;
    assert_eq!(vm.calls("frames"), 1);
    session.stack_trace(args(5, 5)).await;
    assert_eq!(vm.calls("frames"), 2);

    // A page from the top starts a new capture.
    session.stack_trace(args(0, 5)).await;
    assert_eq!(vm.calls("frames"), 3);
}

#[tokio::test]
async fn resuming_retires_frame_ids() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 2);
    let session = session(&vm, serial_config());

    let before = session.stack_trace(args(0, 0)).await;
    let id = before.stack_frames[0].id;
    assert!(id > 0);
    assert_eq!(session.frame(id).map(|frame| frame.thread), Some(THREAD));

    session.on_thread_resumed(THREAD);
    assert!(session.frame(id).is_none());
    assert_eq!(session.stack_traces().live_frame_ids(), 0);

    let after = session.stack_trace(args(0, 0)).await;
    let fresh = after.stack_frames[0].id;
    assert_ne!(fresh, id);
    assert_eq!(session.frame(fresh).map(|frame| frame.index), Some(0));

    session.on_vm_resumed();
    assert!(session.frame(fresh).is_none());
}

#[tokio::test]
async fn frames_are_deduplicated_within_a_stop() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 3);
    let session = session(&vm, serial_config());

    let first = session.stack_trace(args(0, 0)).await;
    let again = session.stack_trace(args(1, 1)).await;
    assert_eq!(again.stack_frames[0].id, first.stack_frames[1].id);
    assert_eq!(session.stack_traces().live_frame_ids(), 3);
}

#[tokio::test]
async fn serial_and_concurrent_dispatch_agree() {
    let build = |config| {
        let vm = Arc::new(MockJdwpClient::new());
        deep_stack(&vm, THREAD, 6);
        vm.set_reply_delay(std::time::Duration::from_millis(1));
        (session(&vm, config), vm)
    };
    let (serial, _serial_vm) = build(serial_config());
    let (concurrent, _concurrent_vm) = build(concurrent_config());

    let expected = serial.stack_trace(args(1, 4)).await;
    let actual = concurrent.stack_trace(args(1, 4)).await;
    assert_eq!(expected.stack_frames.len(), 4);
    assert_eq!(expected, actual);
}

#[tokio::test]
async fn a_vanished_vm_yields_an_empty_trace() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 3);
    let session = session(&vm, serial_config());

    vm.disconnect();
    assert_eq!(session.stack_trace(args(0, 0)).await, StackTraceResponseBody::empty(0));
}

#[tokio::test]
async fn a_thread_resuming_mid_page_keeps_the_frames_already_built() {
    let vm = Arc::new(MockJdwpClient::new());
    deep_stack(&vm, THREAD, 6);
    let session = session(&vm, serial_config());

    // Frames 0 and 1 resolve; the thread is gone by the time frame 2 asks.
    vm.fail_after("line_number", 2, JdwpError::InvalidThread(THREAD));
    let body = session.stack_trace(args(0, 0)).await;
    assert_eq!(body.total_frames, 6);
    assert_eq!(body.stack_frames.len(), 2);
    assert_eq!(body.stack_frames[1].line, 11);
    assert_eq!(session.stack_traces().live_frame_ids(), 2);

    vm.fail_after("signature", 0, JdwpError::Disconnected);
    vm.fail_after("line_number", 6, JdwpError::InvalidThread(THREAD));
    let body = session.stack_trace(args(0, 0)).await;
    assert_eq!(body.total_frames, 6);
    assert!(body.stack_frames.is_empty());
}
