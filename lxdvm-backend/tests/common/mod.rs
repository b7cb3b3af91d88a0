//! Shared fixtures: a stub LXD daemon on a temporary socket and a backend
//! pointed at it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lxdvm_backend::{LxdBackend, LxdBackendConfig, LxdVirtualMachine, VmStatusMonitor};
use lxdvm_core::{VirtualMachineDescription, VmStatus};
use lxdvm_stub::{serve_unix, OperationPlan, StubDaemon};
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const VM_NAME: &str = "pied-piper-valley";
pub const VM_MAC: &str = "52:54:00:aa:bb:cc";
pub const IMAGE: &str = "a4f1c2d3e5";

/// Records every status the backend persists.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<(String, VmStatus)>>,
}

impl RecordingMonitor {
    pub fn events(&self) -> Vec<(String, VmStatus)> {
        self.events.lock().expect("monitor lock").clone()
    }

    pub fn statuses(&self) -> Vec<VmStatus> {
        self.events().into_iter().map(|(_, s)| s).collect()
    }
}

impl VmStatusMonitor for RecordingMonitor {
    fn persist_state_for(&self, name: &str, status: VmStatus) {
        self.events.lock().expect("monitor lock").push((name.to_owned(), status));
    }
}

pub struct Harness {
    pub daemon: Arc<StubDaemon>,
    pub backend: LxdBackend,
    pub monitor: Arc<RecordingMonitor>,
    pub dir: TempDir,
    server: Option<JoinHandle<()>>,
}

impl Harness {
    /// Start a stub daemon whose operations finish on the first poll.
    pub fn start() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("lxd.socket");

        let daemon = Arc::new(StubDaemon::new());
        daemon.set_operation_plan(OperationPlan {
            polls_before_done: 0,
            ..OperationPlan::default()
        });
        let server = serve_unix(&socket, Arc::clone(&daemon)).expect("bind stub socket");

        let mut config = LxdBackendConfig::new(socket);
        config.request_timeout = Duration::from_secs(5);

        Self {
            daemon,
            backend: LxdBackend::new(config),
            monitor: Arc::new(RecordingMonitor::default()),
            dir,
            server: Some(server),
        }
    }

    pub fn description() -> VirtualMachineDescription {
        VirtualMachineDescription::new(VM_NAME, VM_MAC, IMAGE)
    }

    /// Attach to `VM_NAME`, registering it first with `status_code`.
    pub async fn vm_with_status(&self, status_code: i64) -> LxdVirtualMachine {
        self.daemon.add_instance(VM_NAME, status_code);
        let vm = self
            .backend
            .create_virtual_machine(&Self::description(), self.monitor.clone())
            .await
            .expect("attach to instance");
        self.daemon.clear_requests();
        vm
    }

    /// Stop serving and remove the socket.
    pub async fn kill_daemon(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
        }
        let _ = std::fs::remove_file(self.dir.path().join("lxd.socket"));
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
