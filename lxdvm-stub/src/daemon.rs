//! In-memory model of the LXD daemon state the backend touches.
//!
//! Instances, background operations and DHCP leases live here, together
//! with a log of every request received so tests can assert on the exact
//! traffic a backend produced.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::StubError;

/// LXD instance status codes.
pub mod codes {
    pub const STARTED: i64 = 101;
    pub const STOPPED: i64 = 102;
    pub const RUNNING: i64 = 103;
    pub const CANCELLING: i64 = 104;
    pub const STARTING: i64 = 106;
    pub const STOPPING: i64 = 107;
    pub const ABORTING: i64 = 108;
    pub const FREEZING: i64 = 109;
    pub const FROZEN: i64 = 110;
    pub const THAWED: i64 = 111;
    pub const ERROR: i64 = 112;
}

/// Human-readable name LXD pairs with a status code.
#[must_use]
pub fn status_name(code: i64) -> &'static str {
    match code {
        codes::STARTED => "Started",
        codes::STOPPED => "Stopped",
        codes::RUNNING => "Running",
        codes::CANCELLING => "Cancelling",
        codes::STARTING => "Starting",
        codes::STOPPING => "Stopping",
        codes::ABORTING => "Aborting",
        codes::FREEZING => "Freezing",
        codes::FROZEN => "Frozen",
        codes::THAWED => "Thawed",
        codes::ERROR => "Error",
        _ => "Unknown",
    }
}

/// One request as received by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method, upper case.
    pub method: String,
    /// Path without query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// JSON body, when one was sent and parsed.
    pub body: Option<Value>,
}

/// How background operations created from now on behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Finish with status `Success`.
    Success,
    /// Finish with status `Failure` and the given error text.
    Failure(String),
    /// Stay `Running` forever.
    Never,
    /// Disappear: every read answers 404.
    Vanish,
}

/// Behaviour of operations created after [`StubDaemon::set_operation_plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPlan {
    /// Reads answering `Running` before the outcome is reported.
    pub polls_before_done: u32,
    /// Final outcome.
    pub outcome: OperationOutcome,
}

impl Default for OperationPlan {
    fn default() -> Self {
        Self {
            polls_before_done: 1,
            outcome: OperationOutcome::Success,
        }
    }
}

/// An instance known to the stub.
#[derive(Debug, Clone, Serialize)]
pub struct StubInstance {
    pub name: String,
    pub status_code: i64,
    pub config: IndexMap<String, Value>,
    pub devices: IndexMap<String, Value>,
}

impl StubInstance {
    fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "type": "virtual-machine",
            "status": status_name(self.status_code),
            "status_code": self.status_code,
            "config": self.config,
            "devices": self.devices,
        })
    }
}

/// A DHCP lease on a stub network.
#[derive(Debug, Clone, Serialize)]
pub struct Lease {
    pub hostname: String,
    pub hwaddr: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug)]
struct StubOperation {
    id: Uuid,
    description: String,
    created_at: DateTime<Utc>,
    polls_left: u32,
    outcome: OperationOutcome,
}

impl StubOperation {
    fn metadata(&self, status_code: i64, status: &str, err: &str) -> Value {
        json!({
            "id": self.id,
            "class": "task",
            "description": self.description,
            "created_at": self.created_at,
            "updated_at": Utc::now(),
            "status": status,
            "status_code": status_code,
            "may_cancel": false,
            "err": err,
        })
    }
}

#[derive(Debug)]
struct StubState {
    instances: IndexMap<String, StubInstance>,
    operations: HashMap<Uuid, StubOperation>,
    networks: IndexMap<String, Vec<Lease>>,
    requests: Vec<RecordedRequest>,
    plan: OperationPlan,
    create_status_code: i64,
}

/// Thread-safe fake LXD daemon.
#[derive(Debug)]
pub struct StubDaemon {
    state: Mutex<StubState>,
}

impl Default for StubDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDaemon {
    /// A daemon with one empty network, `mpbr0`, and no instances.
    #[must_use]
    pub fn new() -> Self {
        let mut networks = IndexMap::new();
        networks.insert("mpbr0".to_owned(), Vec::new());
        Self {
            state: Mutex::new(StubState {
                instances: IndexMap::new(),
                operations: HashMap::new(),
                networks,
                requests: Vec::new(),
                plan: OperationPlan::default(),
                create_status_code: codes::STOPPED,
            }),
        }
    }

    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().expect("stub daemon lock poisoned")
    }

    // ── Test setup ──────────────────────────────────────────────────────────

    /// Register an instance with no config or devices.
    pub fn add_instance(&self, name: &str, status_code: i64) {
        self.state().instances.insert(
            name.to_owned(),
            StubInstance {
                name: name.to_owned(),
                status_code,
                config: IndexMap::new(),
                devices: IndexMap::new(),
            },
        );
    }

    /// Delete an instance. Returns `true` if it existed.
    pub fn remove_instance(&self, name: &str) -> bool {
        self.state().instances.shift_remove(name).is_some()
    }

    /// Change the status code an instance reports.
    pub fn set_status_code(&self, name: &str, status_code: i64) {
        if let Some(instance) = self.state().instances.get_mut(name) {
            instance.status_code = status_code;
        }
    }

    /// Snapshot of an instance.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<StubInstance> {
        self.state().instances.get(name).cloned()
    }

    /// Status code reported for newly created instances.
    pub fn set_create_status_code(&self, status_code: i64) {
        self.state().create_status_code = status_code;
    }

    /// Add a lease to `bridge`, creating the network if needed.
    pub fn add_lease(&self, bridge: &str, hostname: &str, hwaddr: &str, address: &str) {
        self.state()
            .networks
            .entry(bridge.to_owned())
            .or_default()
            .push(Lease {
                hostname: hostname.to_owned(),
                hwaddr: hwaddr.to_owned(),
                address: address.to_owned(),
                kind: "dynamic".to_owned(),
            });
    }

    /// Behaviour of operations created from now on.
    pub fn set_operation_plan(&self, plan: OperationPlan) {
        self.state().plan = plan;
    }

    /// Every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// Requests with `method` whose path starts with `prefix`.
    #[must_use]
    pub fn requests_matching(&self, method: &str, prefix: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Forget the request log.
    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    // ── API model ───────────────────────────────────────────────────────────

    pub(crate) fn record(&self, method: &str, path: &str, query: Option<&str>, body: Option<Value>) {
        self.state().requests.push(RecordedRequest {
            method: method.to_owned(),
            path: path.to_owned(),
            query: query.map(str::to_owned),
            body,
        });
    }

    pub(crate) fn instance_metadata(&self, name: &str) -> Result<Value, StubError> {
        self.state()
            .instances
            .get(name)
            .map(StubInstance::metadata)
            .ok_or_else(|| StubError::NotFound(format!("Instance {name}")))
    }

    pub(crate) fn instance_state(&self, name: &str) -> Result<Value, StubError> {
        let state = self.state();
        let instance = state
            .instances
            .get(name)
            .ok_or_else(|| StubError::NotFound(format!("Instance {name}")))?;
        Ok(json!({
            "status": status_name(instance.status_code),
            "status_code": instance.status_code,
        }))
    }

    pub(crate) fn create_instance(&self, body: &Value) -> Result<Value, StubError> {
        let name = body["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StubError::InvalidRequest("missing instance name".to_owned()))?;

        let mut state = self.state();
        if state.instances.contains_key(name) {
            return Err(StubError::Conflict(format!("Instance {name} already exists")));
        }

        let instance = StubInstance {
            name: name.to_owned(),
            status_code: state.create_status_code,
            config: object_entries(&body["config"]),
            devices: object_entries(&body["devices"]),
        };
        state.instances.insert(name.to_owned(), instance);

        Ok(start_operation(&mut state, format!("Creating instance {name}")))
    }

    pub(crate) fn apply_action(&self, name: &str, body: &Value) -> Result<Value, StubError> {
        let action = body["action"]
            .as_str()
            .ok_or_else(|| StubError::InvalidRequest("missing action".to_owned()))?;
        let status_code = match action {
            "start" | "restart" | "unfreeze" => codes::RUNNING,
            "stop" => codes::STOPPED,
            "freeze" => codes::FROZEN,
            other => return Err(StubError::InvalidRequest(format!("unknown action '{other}'"))),
        };

        let mut state = self.state();
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| StubError::NotFound(format!("Instance {name}")))?;
        instance.status_code = status_code;

        Ok(start_operation(&mut state, format!("Instance {name}: {action}")))
    }

    pub(crate) fn patch_instance(&self, name: &str, body: &Value) -> Result<(), StubError> {
        let mut state = self.state();
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| StubError::NotFound(format!("Instance {name}")))?;
        instance.config.extend(object_entries(&body["config"]));
        instance.devices.extend(object_entries(&body["devices"]));
        Ok(())
    }

    pub(crate) fn replace_instance(&self, name: &str, body: &Value) -> Result<Value, StubError> {
        let mut state = self.state();
        let instance = state
            .instances
            .get_mut(name)
            .ok_or_else(|| StubError::NotFound(format!("Instance {name}")))?;
        instance.config = object_entries(&body["config"]);
        instance.devices = object_entries(&body["devices"]);

        Ok(start_operation(&mut state, format!("Updating instance {name}")))
    }

    pub(crate) fn network_leases(&self, bridge: &str) -> Result<Vec<Lease>, StubError> {
        self.state()
            .networks
            .get(bridge)
            .cloned()
            .ok_or_else(|| StubError::NotFound(format!("Network {bridge}")))
    }

    pub(crate) fn has_network(&self, bridge: &str) -> bool {
        self.state().networks.contains_key(bridge)
    }

    pub(crate) fn poll_operation(&self, id: &str) -> Result<Value, StubError> {
        let not_found = || StubError::NotFound(format!("Operation {id}"));
        let id: Uuid = id.parse().map_err(|_| not_found())?;

        let mut state = self.state();
        let op = state.operations.get_mut(&id).ok_or_else(not_found)?;

        if op.outcome == OperationOutcome::Vanish {
            return Err(not_found());
        }
        if op.outcome == OperationOutcome::Never || op.polls_left > 0 {
            op.polls_left = op.polls_left.saturating_sub(1);
            return Ok(op.metadata(103, "Running", ""));
        }
        Ok(match &op.outcome {
            OperationOutcome::Failure(err) => op.metadata(400, "Failure", err),
            _ => op.metadata(200, "Success", ""),
        })
    }
}

fn start_operation(state: &mut StubState, description: String) -> Value {
    let op = StubOperation {
        id: Uuid::new_v4(),
        description,
        created_at: Utc::now(),
        polls_left: state.plan.polls_before_done,
        outcome: state.plan.outcome.clone(),
    };
    let metadata = op.metadata(103, "Running", "");
    state.operations.insert(op.id, op);
    metadata
}

fn object_entries(value: &Value) -> IndexMap<String, Value> {
    value
        .as_object()
        .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}
