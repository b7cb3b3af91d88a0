//! Integration tests for the LXD instance state machine.
//!
//! Each test runs against a stub daemon on a temporary Unix socket.

mod common;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{eventually, Harness, VM_MAC, VM_NAME};
use lxdvm_backend::{BackendError, LxdBackend, VirtualMachine};
use lxdvm_core::{MemorySize, VmStatus};
use lxdvm_stub::daemon::codes;
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

/// Log sink shared between a test and its `tracing` subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn state_path() -> String {
    format!("/1.0/virtual-machines/{VM_NAME}/state")
}

#[tokio::test]
async fn status_codes_map_to_vm_statuses() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;

    let cases = [
        (codes::STARTED, VmStatus::Running),
        (codes::STOPPED, VmStatus::Stopped),
        (codes::RUNNING, VmStatus::Running),
        (codes::CANCELLING, VmStatus::Unknown),
        (codes::STOPPING, VmStatus::Running),
        (codes::ABORTING, VmStatus::Unknown),
        (codes::FREEZING, VmStatus::Suspending),
        (codes::FROZEN, VmStatus::Suspended),
        (codes::THAWED, VmStatus::Running),
        (codes::ERROR, VmStatus::Unknown),
        (999, VmStatus::Unknown),
        // Starting makes later running codes sticky, so it goes last.
        (codes::STARTING, VmStatus::Starting),
    ];
    for (code, expected) in cases {
        harness.daemon.set_status_code(VM_NAME, code);
        let status = vm.current_state().await.expect("state query");
        assert_eq!(status, expected, "status code {code}");
    }
}

#[tokio::test]
async fn attaching_to_missing_instance_creates_it() {
    let harness = Harness::start();
    harness.daemon.set_operation_plan(lxdvm_stub::OperationPlan::default());

    let desc = Harness::description();
    let vm = harness
        .backend
        .create_virtual_machine(&desc, harness.monitor.clone())
        .await
        .expect("create instance");

    let created = harness
        .daemon
        .requests_matching("POST", "/1.0/virtual-machines");
    assert_eq!(created.len(), 1, "exactly one create request");
    let body = created[0].body.clone().expect("create body");
    assert_eq!(body["name"], VM_NAME);
    assert_eq!(body["source"]["type"], "image");
    assert_eq!(body["source"]["fingerprint"], common::IMAGE);
    assert_eq!(body["devices"]["eth0"]["hwaddr"], VM_MAC);

    let polls = harness.daemon.requests_matching("GET", "/1.0/operations/");
    assert!(!polls.is_empty(), "creation must wait for the operation");

    assert!(harness.daemon.instance(VM_NAME).is_some());
    assert_eq!(vm.cached_status().await, VmStatus::Stopped);
}

#[tokio::test]
async fn created_instance_may_already_be_starting() {
    let harness = Harness::start();
    harness.daemon.set_create_status_code(codes::STARTING);

    let vm = harness
        .backend
        .create_virtual_machine(&Harness::description(), harness.monitor.clone())
        .await
        .expect("create instance");

    assert_eq!(harness.daemon.requests_matching("POST", "/1.0/virtual-machines").len(), 1);
    assert_eq!(vm.cached_status().await, VmStatus::Starting);
}

#[tokio::test]
async fn unrecognised_status_code_is_logged_as_error() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;
    harness.daemon.set_status_code(VM_NAME, 999);

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::ERROR)
        .with_ansi(false)
        .finish();
    let status = {
        let _guard = tracing::subscriber::set_default(subscriber);
        vm.current_state().await.expect("state query")
    };

    assert_eq!(status, VmStatus::Unknown);
    let output = logs.contents();
    assert!(output.contains("ERROR"), "logs: {output}");
    assert!(output.contains("unexpected LXD state"), "logs: {output}");
    assert!(output.contains("code=999"), "logs: {output}");
}

#[tokio::test]
async fn attaching_to_existing_instance_does_not_create() {
    let harness = Harness::start();
    harness.daemon.add_instance(VM_NAME, codes::RUNNING);

    let vm = harness
        .backend
        .create_virtual_machine(&Harness::description(), harness.monitor.clone())
        .await
        .expect("attach");

    assert!(harness.daemon.requests_matching("POST", "/").is_empty());
    assert_eq!(vm.cached_status().await, VmStatus::Running);
}

#[tokio::test]
async fn failed_creation_is_reported() {
    let harness = Harness::start();
    harness.daemon.set_operation_plan(lxdvm_stub::OperationPlan {
        polls_before_done: 0,
        outcome: lxdvm_stub::OperationOutcome::Failure("image not found".to_owned()),
    });

    let result = harness
        .backend
        .create_virtual_machine(&Harness::description(), harness.monitor.clone())
        .await;

    match result {
        Err(BackendError::OperationFailed { message, .. }) => assert_eq!(message, "image not found"),
        other => panic!("expected OperationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn start_reports_starting_until_confirmed() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;

    vm.start().await.expect("start");

    let puts = harness.daemon.requests_matching("PUT", &state_path());
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, Some(json!({"action": "start"})));

    // LXD already says running, but the guest has not been confirmed yet.
    assert_eq!(vm.current_state().await.expect("state"), VmStatus::Starting);

    vm.confirm_running().await;
    assert_eq!(vm.current_state().await.expect("state"), VmStatus::Running);

    assert_eq!(
        harness.monitor.statuses(),
        vec![VmStatus::Starting, VmStatus::Running]
    );
}

#[tokio::test]
async fn starting_status_follows_daemon_when_not_running() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;
    vm.start().await.expect("start");

    harness.daemon.set_status_code(VM_NAME, codes::STOPPED);
    assert_eq!(vm.current_state().await.expect("state"), VmStatus::Stopped);
}

#[tokio::test]
async fn start_on_suspended_instance_unfreezes() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::FROZEN).await;
    assert_eq!(vm.cached_status().await, VmStatus::Suspended);

    vm.start().await.expect("resume");

    let puts = harness.daemon.requests_matching("PUT", &state_path());
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, Some(json!({"action": "unfreeze"})));
}

#[tokio::test]
async fn stop_on_stopped_instance_sends_nothing() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;

    vm.stop().await.expect("stop");
    vm.shutdown().await.expect("shutdown");

    assert!(harness.daemon.requests_matching("PUT", "/").is_empty());
    assert!(harness.monitor.events().is_empty());
}

#[tokio::test]
async fn stop_on_suspended_instance_sends_nothing() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::FROZEN).await;

    vm.stop().await.expect("stop");

    assert!(harness.daemon.requests_matching("PUT", "/").is_empty());
    assert_eq!(harness.daemon.instance(VM_NAME).map(|i| i.status_code), Some(codes::FROZEN));
}

#[tokio::test]
async fn stop_on_running_instance_stops_and_persists() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;

    vm.stop().await.expect("stop");

    let puts = harness.daemon.requests_matching("PUT", &state_path());
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, Some(json!({"action": "stop"})));
    assert_eq!(vm.cached_status().await, VmStatus::Stopped);
    assert_eq!(harness.monitor.statuses(), vec![VmStatus::Stopped]);
}

#[tokio::test]
async fn failed_stop_operation_is_reported() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;
    harness.daemon.set_operation_plan(lxdvm_stub::OperationPlan {
        polls_before_done: 0,
        outcome: lxdvm_stub::OperationOutcome::Failure("guest refused".to_owned()),
    });

    match vm.stop().await {
        Err(BackendError::OperationFailed { message, .. }) => assert_eq!(message, "guest refused"),
        other => panic!("expected OperationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn suspend_is_unsupported() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;

    let err = vm.suspend().await.expect_err("suspend must fail");
    assert!(matches!(err, BackendError::UnsupportedOperation("suspend")));
    assert!(harness.daemon.requests().is_empty(), "suspend must not touch the daemon");
}

#[tokio::test]
async fn stop_during_start_waits_for_start_sequence() {
    let harness = Harness::start();
    let vm = Arc::new(harness.vm_with_status(codes::STOPPED).await);
    vm.start().await.expect("start");

    let stopper = tokio::spawn({
        let vm = Arc::clone(&vm);
        async move { vm.stop().await }
    });

    let daemon = Arc::clone(&harness.daemon);
    assert!(
        eventually(|| daemon.instance(VM_NAME).map(|i| i.status_code) == Some(codes::STOPPED)).await,
        "stop request never reached the daemon"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!stopper.is_finished(), "stop must wait for the start sequence");

    let err = vm
        .ensure_vm_is_running(Duration::from_millis(50))
        .await
        .expect_err("start sequence must fail");
    match err {
        BackendError::StartFailed { reason, .. } => assert_eq!(reason, "Instance shutdown during start"),
        other => panic!("expected StartFailed, got {other:?}"),
    }

    let stopped = tokio::time::timeout(Duration::from_secs(2), stopper)
        .await
        .expect("stop must finish once acknowledged")
        .expect("stop task");
    assert!(stopped.is_ok());
}

#[tokio::test]
async fn ensure_running_accepts_instance_that_came_back() {
    let harness = Harness::start();
    let vm = Arc::new(harness.vm_with_status(codes::STOPPED).await);

    let reviver = tokio::spawn({
        let daemon = Arc::clone(&harness.daemon);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            daemon.set_status_code(VM_NAME, codes::RUNNING);
        }
    });

    vm.ensure_vm_is_running(Duration::from_millis(300))
        .await
        .expect("instance rebooted in time");
    reviver.await.expect("reviver task");
    assert_eq!(vm.cached_status().await, VmStatus::Starting);
}

#[tokio::test]
async fn ensure_running_passes_for_running_instance() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;
    vm.ensure_vm_is_running(Duration::from_secs(10))
        .await
        .expect("running instance");
}

#[tokio::test]
async fn resizes_issue_one_patch_each() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;
    let instance_path = format!("/1.0/virtual-machines/{VM_NAME}");

    vm.update_cpus(4).await.expect("cpus");
    vm.resize_memory(MemorySize::from_gib(2)).await.expect("memory");
    vm.resize_disk(MemorySize::from_gib(10)).await.expect("disk");

    let patches = harness.daemon.requests_matching("PATCH", &instance_path);
    assert_eq!(patches.len(), 3);
    assert_eq!(patches[0].body, Some(json!({"config": {"limits.cpu": "4"}})));
    assert_eq!(
        patches[1].body,
        Some(json!({"config": {"limits.memory": "2147483648"}}))
    );
    let root = patches[2].body.clone().expect("disk body")["devices"]["root"].clone();
    assert_eq!(root["size"], "10737418240");
    assert_eq!(root["pool"], "default");
    assert_eq!(root["path"], "/");

    assert!(harness.daemon.requests_matching("GET", "/1.0/operations/").is_empty());
    let instance = harness.daemon.instance(VM_NAME).expect("instance");
    assert_eq!(instance.config.get("limits.cpu"), Some(&json!("4")));
}

#[tokio::test]
async fn zero_sized_resize_is_rejected_before_any_call() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;

    assert!(matches!(vm.update_cpus(0).await, Err(BackendError::InvariantViolation(_))));
    assert!(matches!(
        vm.resize_memory(MemorySize::from_bytes(0)).await,
        Err(BackendError::InvariantViolation(_))
    ));
    assert!(harness.daemon.requests().is_empty());
}

#[tokio::test]
async fn ssh_hostname_waits_for_lease_without_caching() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;

    assert_eq!(vm.management_ipv4().await.expect("lookup"), None);

    harness
        .daemon
        .add_lease("mpbr0", VM_NAME, &VM_MAC.to_uppercase(), "10.0.0.5");
    let host = vm.ssh_hostname(Duration::from_secs(2)).await.expect("hostname");
    assert_eq!(host, "10.0.0.5");

    harness.daemon.clear_requests();
    let ip = vm.management_ipv4().await.expect("lease lookup");
    assert_eq!(ip.map(|ip| ip.to_string()), Some("10.0.0.5".to_owned()));
    assert_eq!(
        harness.daemon.requests_matching("GET", "/1.0/networks/mpbr0/leases").len(),
        1,
        "the first address query reads the leases"
    );

    harness.daemon.clear_requests();
    let ip = vm.management_ipv4().await.expect("cached lookup");
    assert_eq!(ip.map(|ip| ip.to_string()), Some("10.0.0.5".to_owned()));
    assert!(harness.daemon.requests().is_empty(), "cached address must not hit the daemon");

    assert_eq!(vm.ssh_port(), 22);
    assert_eq!(vm.ssh_username(), "ubuntu");
    assert!(vm.ipv6().is_empty());
}

#[tokio::test]
async fn ssh_hostname_times_out_without_lease() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;

    match vm.ssh_hostname(Duration::from_millis(100)).await {
        Err(BackendError::IpAddressTimeout { name, .. }) => assert_eq!(name, VM_NAME),
        other => panic!("expected IpAddressTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_daemon_yields_unknown_status() {
    let mut harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;

    harness.kill_daemon().await;

    assert_eq!(vm.current_state().await.expect("degraded state"), VmStatus::Unknown);
}

#[tokio::test]
async fn deleted_instance_is_not_found() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;
    harness.daemon.remove_instance(VM_NAME);

    assert!(matches!(vm.current_state().await, Err(BackendError::NotFound(_))));
}

#[tokio::test]
async fn teardown_stops_running_instance_without_persisting() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;

    vm.teardown().await;

    assert_eq!(harness.daemon.instance(VM_NAME).map(|i| i.status_code), Some(codes::STOPPED));
    assert!(harness.monitor.events().is_empty());
}

#[tokio::test]
async fn teardown_leaves_instance_running_during_snap_refresh() {
    let harness = Harness::start();
    let snap = tempfile::tempdir().expect("snap dir");
    std::fs::write(snap.path().join("snap_refresh"), b"").expect("sentinel");

    let backend = LxdBackend::new(
        harness
            .backend
            .config()
            .clone()
            .snap_common_dir(Some(snap.path().to_path_buf())),
    );
    harness.daemon.add_instance(VM_NAME, codes::RUNNING);
    let vm = backend
        .create_virtual_machine(&Harness::description(), harness.monitor.clone())
        .await
        .expect("attach");

    vm.teardown().await;

    assert_eq!(harness.daemon.instance(VM_NAME).map(|i| i.status_code), Some(codes::RUNNING));
    assert!(harness.daemon.requests_matching("PUT", "/").is_empty());
}

#[tokio::test]
async fn teardown_persists_non_running_status() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::STOPPED).await;

    vm.teardown().await;

    assert_eq!(
        harness.monitor.events(),
        vec![(VM_NAME.to_owned(), VmStatus::Stopped)]
    );
}

#[tokio::test]
async fn teardown_swallows_missing_instance() {
    let harness = Harness::start();
    let vm = harness.vm_with_status(codes::RUNNING).await;
    harness.daemon.remove_instance(VM_NAME);

    vm.teardown().await;

    assert!(harness.monitor.events().is_empty());
}

#[tokio::test]
async fn health_check_accepts_trusted_daemon_with_bridge() {
    let harness = Harness::start();
    harness.backend.health_check().await.expect("healthy");
}

#[tokio::test]
async fn health_check_rejects_missing_bridge() {
    let harness = Harness::start();
    let backend = LxdBackend::new(harness.backend.config().clone().bridge_name("lxdbr9"));
    assert!(matches!(backend.health_check().await, Err(BackendError::NotFound(_))));
}

#[tokio::test]
async fn health_check_reports_dead_socket() {
    let mut harness = Harness::start();
    harness.kill_daemon().await;
    assert!(matches!(
        harness.backend.health_check().await,
        Err(BackendError::TransportUnavailable(_))
    ));
}
