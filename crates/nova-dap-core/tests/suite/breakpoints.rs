use std::sync::Arc;
use std::time::Duration;

use nova_dap_core::{BreakpointSpec, DebugError, ResolverState, WatchKind};
use nova_jdwp::mock::MockRequestKind;
use nova_jdwp::{JdwpError, MockClass, MockJdwpClient, MockMethod, SuspendPolicy};

use crate::harness::{concurrent_config, eventually, serial_config, session, within};

const SOURCE: &str = "/work/src/com/example/Foo.java";

fn foo_class() -> MockClass {
    MockClass::new("com.example.Foo")
        .method(MockMethod::new("<init>", "()V").with_lines(&[(3, 0)]))
        .method(MockMethod::new("run", "()V").with_lines(&[(10, 0), (11, 5)]))
}

#[tokio::test]
async fn deferred_breakpoint_verifies_when_the_class_loads() {
    let vm = Arc::new(MockJdwpClient::new());
    let foo = vm.add_class(foo_class());
    let inner = vm.add_class(
        MockClass::new("com.example.Foo$Inner")
            .method(MockMethod::new("call", "()V").with_lines(&[(10, 2)])),
    );
    let session = session(&vm, serial_config());

    let mut handle = session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 10))
        .await
        .unwrap();
    let breakpoint = session.breakpoints().breakpoints(SOURCE).remove(0);
    assert!(!handle.is_verified());
    assert!(breakpoint.watch_requests().is_empty());
    assert_eq!(breakpoint.state(), ResolverState::Resolving);

    assert_eq!(vm.load_class(foo), 1);
    within(handle.verified()).await.unwrap();
    assert_eq!(breakpoint.watch_requests().len(), 1);
    assert_eq!(breakpoint.state(), ResolverState::Installed);
    handle.mark_seen();

    // The nested class fires its own prepare event and adds a location
    // without signalling verification again.
    assert_eq!(vm.load_class(inner), 1);
    eventually(|| breakpoint.watch_requests().len() == 2).await;
    assert!(!handle.has_changed());

    let (_, request) = vm.breakpoint_requests().remove(0);
    assert!(request.enabled);
    assert!(matches!(
        request.kind,
        MockRequestKind::Breakpoint {
            suspend_policy: SuspendPolicy::EventThread,
            ..
        }
    ));
}

#[tokio::test]
async fn repeated_prepare_events_do_not_duplicate_requests() {
    let vm = Arc::new(MockJdwpClient::new());
    let foo = vm.add_class(foo_class());
    let session = session(&vm, concurrent_config());

    let mut handle = session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 11))
        .await
        .unwrap();
    vm.load_class(foo);
    vm.load_class(foo);
    vm.load_class(foo);
    within(handle.verified()).await.unwrap();

    // Give the listener time to chew through the duplicates.
    eventually(|| vm.calls("line_locations") >= 6).await;
    let breakpoint = session.breakpoints().breakpoints(SOURCE).remove(0);
    assert_eq!(breakpoint.watch_requests().len(), 1);
    assert_eq!(vm.breakpoint_requests().len(), 1);
}

#[tokio::test]
async fn method_breakpoint_picks_the_exact_overload() {
    let vm = Arc::new(MockJdwpClient::new());
    let foo = vm.add_loaded_class(
        MockClass::new("Foo")
            .method(MockMethod::new("bar", "()V").with_lines(&[(5, 0)]))
            .method(MockMethod::new("bar", "(I)V").with_lines(&[(9, 0)]))
            .method(MockMethod::new("bar", "(Ljava/lang/String;)V").with_lines(&[(13, 0)])),
    );
    let session = session(&vm, serial_config());

    let handle = session
        .install_breakpoint("Foo.java", BreakpointSpec::new("Foo#bar(I)V", 0))
        .await
        .unwrap();
    assert!(handle.is_verified());

    let breakpoint = session.breakpoints().breakpoints("Foo.java").remove(0);
    let watches = breakpoint.watch_requests();
    assert_eq!(watches.len(), 1);
    assert_eq!(watches[0].kind, WatchKind::Method);

    let overloads = nova_jdwp::JdwpClient::methods(vm.as_ref(), foo).await.unwrap();
    let wanted = overloads.iter().find(|m| m.signature == "(I)V").unwrap();
    assert_eq!(watches[0].location.method_id, wanted.method_id);
    assert_eq!(watches[0].location.index, 0);
}

#[tokio::test]
async fn set_breakpoints_reuses_kept_breakpoints_and_disposes_the_rest() {
    let vm = Arc::new(MockJdwpClient::new());
    vm.add_loaded_class(foo_class());
    let session = session(&vm, serial_config());

    let first = session
        .set_breakpoints(
            SOURCE,
            vec![
                BreakpointSpec::line("com.example.Foo", 3),
                BreakpointSpec::line("com.example.Foo", 10),
            ],
        )
        .await
        .unwrap();
    assert!(first.iter().all(|bp| bp.is_verified()));
    let dropped_ids: Vec<_> = first[0].watch_requests().iter().map(|w| w.id).collect();

    let second = session
        .set_breakpoints(
            SOURCE,
            vec![
                BreakpointSpec::line("com.example.Foo", 10).with_hit_count(3),
                BreakpointSpec::line("com.example.Foo", 11),
            ],
        )
        .await
        .unwrap();

    assert!(second[0].ptr_eq(&first[1]));
    assert_eq!(second[0].spec().hit_count, 3);
    let kept = second[0].watch_requests()[0].id;
    assert_eq!(vm.request(kept).unwrap().hit_count, Some(3));

    assert_eq!(first[0].state(), ResolverState::Disposed);
    for id in dropped_ids {
        assert!(vm.request(id).is_none());
    }
    assert!(second[1].is_verified());
    assert_eq!(session.breakpoints().breakpoints(SOURCE).len(), 2);
}

#[tokio::test]
async fn removing_an_unknown_breakpoint_is_an_error() {
    let vm = Arc::new(MockJdwpClient::new());
    let session = session(&vm, serial_config());
    let err = session
        .remove_breakpoint(SOURCE, &BreakpointSpec::line("com.example.Foo", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::UnknownBreakpoint(ref name) if name == "com.example.Foo:1"));
}

#[tokio::test]
async fn removed_breakpoints_stop_reacting_to_class_loads() {
    let vm = Arc::new(MockJdwpClient::new());
    let foo = vm.add_class(foo_class());
    let session = session(&vm, serial_config());
    let spec = BreakpointSpec::line("com.example.Foo", 10);

    let mut handle = session.install_breakpoint(SOURCE, spec.clone()).await.unwrap();
    assert_eq!(vm.live_request_count(), 2);
    session.remove_breakpoint(SOURCE, &spec).await.unwrap();
    assert_eq!(vm.live_request_count(), 0);

    // The prepare requests are gone, so loading fires nothing.
    assert_eq!(vm.load_class(foo), 0);
    assert!(matches!(within(handle.verified()).await, Err(DebugError::Disposed)));
    assert!(vm.breakpoint_requests().is_empty());
}

#[tokio::test]
async fn async_resolution_of_loaded_classes_completes_in_the_background() {
    let vm = Arc::new(MockJdwpClient::new());
    vm.add_loaded_class(foo_class());
    vm.set_reply_delay(Duration::from_millis(5));
    let session = session(&vm, concurrent_config());

    let mut handle = session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 11))
        .await
        .unwrap();
    within(handle.verified()).await.unwrap();
    assert_eq!(vm.breakpoint_requests().len(), 1);
}

#[tokio::test]
async fn shutdown_cleans_up_every_request() {
    let vm = Arc::new(MockJdwpClient::new());
    vm.add_loaded_class(foo_class());
    vm.add_class(MockClass::new("com.example.Later"));
    let mut session = session(&vm, serial_config());

    session
        .set_breakpoints(
            SOURCE,
            vec![
                BreakpointSpec::line("com.example.Foo", 10),
                BreakpointSpec::line("com.example.Later", 4),
            ],
        )
        .await
        .unwrap();
    assert!(vm.live_request_count() > 0);

    session.shutdown().await.unwrap();
    assert_eq!(vm.live_request_count(), 0);
    assert!(session.breakpoints().all().is_empty());
}

#[tokio::test]
async fn breakpoints_survive_a_disconnect_without_errors() {
    let vm = Arc::new(MockJdwpClient::new());
    vm.add_loaded_class(foo_class());
    let mut session = session(&vm, serial_config());
    session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 10))
        .await
        .unwrap();

    vm.disconnect();
    let late = session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 11))
        .await
        .unwrap();
    assert!(!late.is_verified());
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn attribute_changes_during_resolution_reach_new_requests() {
    let vm = Arc::new(MockJdwpClient::new());
    let foo = vm.add_class(foo_class());
    let session = session(&vm, serial_config());

    let mut handle = session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 10))
        .await
        .unwrap();
    let breakpoint = session.breakpoints().breakpoints(SOURCE).remove(0);

    vm.set_reply_delay(Duration::from_millis(30));
    vm.load_class(foo);
    // The listener is now waiting on line tables for the freshly loaded class.
    tokio::time::sleep(Duration::from_millis(10)).await;
    breakpoint.set_hit_count(5).await.unwrap();
    breakpoint.set_enabled(false).await.unwrap();

    within(handle.verified()).await.unwrap();
    let watches = breakpoint.watch_requests();
    assert_eq!(watches.len(), 1);
    assert_eq!(watches[0].hit_count, 5);
    assert!(!watches[0].enabled);

    let request = vm.request(watches[0].id).unwrap();
    assert_eq!(request.hit_count, Some(5));
    assert!(!request.enabled);
}

#[tokio::test]
async fn failed_updates_keep_breakpoints_owned() {
    let vm = Arc::new(MockJdwpClient::new());
    vm.add_loaded_class(foo_class());
    let mut session = session(&vm, serial_config());

    session
        .set_breakpoints(
            SOURCE,
            vec![
                BreakpointSpec::line("com.example.Foo", 3),
                BreakpointSpec::line("com.example.Foo", 10),
            ],
        )
        .await
        .unwrap();
    assert_eq!(vm.live_request_count(), 6);

    vm.fail_after("disable_request", 0, JdwpError::VmError(99));
    let err = session
        .set_breakpoints(
            SOURCE,
            vec![
                BreakpointSpec::line("com.example.Foo", 3).with_hit_count(2),
                BreakpointSpec::line("com.example.Foo", 10),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::Jdwp(JdwpError::VmError(99))));
    assert_eq!(session.breakpoints().breakpoints(SOURCE).len(), 2);

    session.shutdown().await.unwrap();
    assert_eq!(vm.live_request_count(), 0);
}

#[tokio::test]
async fn failed_installs_leave_nothing_behind() {
    let vm = Arc::new(MockJdwpClient::new());
    vm.add_loaded_class(foo_class());
    let session = session(&vm, serial_config());

    // The nested-class prepare request is refused after the direct one exists.
    vm.fail_after("create_class_prepare_request", 1, JdwpError::VmError(13));
    let err = session
        .install_breakpoint(SOURCE, BreakpointSpec::line("com.example.Foo", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::Jdwp(JdwpError::VmError(13))));
    assert!(session.breakpoints().all().is_empty());
    assert_eq!(vm.live_request_count(), 0);

    vm.clear_failures();
    session
        .set_breakpoints(SOURCE, vec![BreakpointSpec::line("com.example.Foo", 11)])
        .await
        .unwrap();
    vm.fail_after("create_class_prepare_request", 0, JdwpError::VmError(13));
    let result = session
        .set_breakpoints(
            SOURCE,
            vec![
                BreakpointSpec::line("com.example.Foo", 11),
                BreakpointSpec::line("com.example.Foo", 3),
            ],
        )
        .await;
    assert!(result.is_err());
    let kept = session.breakpoints().breakpoints(SOURCE);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].spec().line_number(), 11);
    assert_eq!(vm.live_request_count(), 3);
}
