//! Per-entity-type record structs.
//!
//! Each record mirrors the JSON the monitoring service returns from its
//! REST resources and pushes over the live feed. Every record type
//! implements [`Record`] and offers its natural [`KeyField`]s as
//! associated constants.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::enums::{CheckState, EntityType};
use crate::keys::{KeyField, RecordKey};

/// A structured value representing one server-side entity.
pub trait Record:
    Clone + core::fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The entity type this record belongs to.
    const ENTITY: EntityType;

    /// Source-of-truth version of this record, if it carries one.
    ///
    /// Used by versioned stores to reject writes older than the stored
    /// record.
    fn version(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// `at` as a record version, or `None` when the timestamp was never set.
///
/// Missing fields decode as the Unix epoch and the service encodes unset
/// times as year 1; neither orders against real writes.
fn version_at(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (at > DateTime::<Utc>::UNIX_EPOCH).then_some(at)
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// A configured check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Check {
    /// Unique check identifier.
    pub id: String,
    /// Identifier of the agent (plugin) executing the check.
    #[serde(rename = "agent")]
    pub agent_id: String,
    /// Interval between executions, in nanoseconds.
    #[serde(default)]
    #[ts(type = "number")]
    pub interval: i64,
    /// Node pinned to run the check, empty for any node.
    #[serde(default)]
    pub node: String,
    /// Agent-specific arguments.
    #[serde(default)]
    pub arguments: Value,
    /// Expressions evaluated against the agent result.
    #[serde(default)]
    pub expressions: Vec<String>,
}

impl Check {
    /// Keyed by `id`.
    pub const BY_ID: KeyField<Self> = KeyField::new(&["id"], Self::id_key);

    fn id_key(&self) -> RecordKey {
        RecordKey::new(self.id.as_str())
    }

    /// The execution interval. Negative intervals are treated as zero.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.interval).unwrap_or(0))
    }
}

impl Record for Check {
    const ENTITY: EntityType = EntityType::Check;
}

/// The result of one node executing one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CheckResult {
    /// Result identifier assigned by the executing node.
    #[serde(default)]
    #[ts(type = "number")]
    pub id: i64,
    /// The check that was executed.
    pub check_id: String,
    /// The node that executed the check.
    pub node_id: String,
    /// Execution error, empty on success.
    #[serde(default)]
    pub error: String,
    /// When the check was executed.
    pub timestamp: DateTime<Utc>,
    /// Agent-specific result values.
    #[serde(default)]
    pub results: Option<Value>,
}

impl CheckResult {
    /// Keyed by the composite of `check_id` and `node_id`, so a store holds
    /// the latest result per check per node.
    pub const BY_CHECK_NODE: KeyField<Self> =
        KeyField::new(&["check_id", "node_id"], Self::check_node_key);

    fn check_node_key(&self) -> RecordKey {
        RecordKey::composite(&[&self.check_id, &self.node_id])
    }

    /// Whether the execution failed.
    pub fn failed(&self) -> bool {
        !self.error.is_empty()
    }
}

impl Record for CheckResult {
    const ENTITY: EntityType = EntityType::CheckResult;

    fn version(&self) -> Option<DateTime<Utc>> {
        version_at(self.timestamp)
    }
}

/// The evaluated state of a check over its recent results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Evaluation {
    /// Evaluation identifier.
    #[ts(type = "number")]
    pub id: i64,
    /// Composite check/host identifier the evaluation was made for.
    #[serde(default)]
    pub check_host_id: String,
    /// The evaluated check.
    pub check_id: String,
    /// The host the check ran against, empty for local checks.
    #[serde(default)]
    pub host_id: String,
    /// Recent states, newest first.
    #[serde(default)]
    pub history: Vec<CheckState>,
    /// Current state.
    #[serde(default)]
    pub state: CheckState,
    /// When the current state began.
    #[serde(default)]
    pub start: DateTime<Utc>,
    /// When the current state was last confirmed.
    #[serde(default)]
    pub end: DateTime<Utc>,
    /// Per-node state.
    #[serde(default)]
    pub hosts: BTreeMap<String, CheckState>,
}

impl Evaluation {
    /// Keyed by evaluation `id`.
    pub const BY_ID: KeyField<Self> = KeyField::new(&["id"], Self::id_key);

    /// Keyed by `check_id`, so a store holds the latest evaluation per
    /// check.
    pub const BY_CHECK: KeyField<Self> = KeyField::new(&["check_id"], Self::check_key);

    fn id_key(&self) -> RecordKey {
        RecordKey::from(self.id)
    }

    fn check_key(&self) -> RecordKey {
        RecordKey::new(self.check_id.as_str())
    }
}

impl Record for Evaluation {
    const ENTITY: EntityType = EntityType::Evaluation;

    fn version(&self) -> Option<DateTime<Utc>> {
        version_at(self.end)
    }
}

// ---------------------------------------------------------------------------
// Hosts and contacts
// ---------------------------------------------------------------------------

/// A monitored host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Host {
    /// Host identifier.
    pub id: String,
    /// Hostname or IP address, optionally with port.
    #[serde(default)]
    pub address: String,
    /// Login user.
    #[serde(default)]
    pub username: String,
}

impl Host {
    /// Keyed by `id`.
    pub const BY_ID: KeyField<Self> = KeyField::new(&["id"], Self::id_key);

    fn id_key(&self) -> RecordKey {
        RecordKey::new(self.id.as_str())
    }
}

impl Record for Host {
    const ENTITY: EntityType = EntityType::Host;
}

/// A person or service capable of receiving notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Contact {
    /// Contact identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Notifier plugin used to reach the contact.
    #[serde(default)]
    pub notifier: String,
    /// Notifier-specific arguments.
    #[serde(default)]
    pub arguments: Value,
}

impl Contact {
    /// Keyed by `id`.
    pub const BY_ID: KeyField<Self> = KeyField::new(&["id"], Self::id_key);

    fn id_key(&self) -> RecordKey {
        RecordKey::new(self.id.as_str())
    }
}

impl Record for Contact {
    const ENTITY: EntityType = EntityType::Contact;
}

/// A named group of contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ContactGroup {
    /// Group identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Contact identifiers in the group.
    #[serde(default)]
    pub members: Vec<String>,
}

impl ContactGroup {
    /// Keyed by `id`.
    pub const BY_ID: KeyField<Self> = KeyField::new(&["id"], Self::id_key);

    fn id_key(&self) -> RecordKey {
        RecordKey::new(self.id.as_str())
    }
}

impl Record for ContactGroup {
    const ENTITY: EntityType = EntityType::ContactGroup;
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// Membership information for one node of the monitoring cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// When the node process started.
    #[serde(default)]
    pub started: DateTime<Utc>,
    /// When the node last reported in.
    #[serde(default)]
    pub updated: DateTime<Utc>,
    /// Raft statistics reported by the node.
    #[serde(default)]
    pub raft: BTreeMap<String, String>,
}

impl NodeInfo {
    /// Keyed by `name`.
    pub const BY_NAME: KeyField<Self> = KeyField::new(&["name"], Self::name_key);

    fn name_key(&self) -> RecordKey {
        RecordKey::new(self.name.as_str())
    }
}

impl Record for NodeInfo {
    const ENTITY: EntityType = EntityType::NodeInfo;

    fn version(&self) -> Option<DateTime<Utc>> {
        version_at(self.updated)
    }
}

/// Aggregate state over all checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Summary {
    /// Summary identifier; the service keeps a single summary.
    #[serde(default = "Summary::default_id", alias = "ID")]
    pub id: String,
    /// Number of configured checks.
    #[serde(default)]
    pub checks: u64,
    /// Number of checks per state, keyed by state name.
    #[serde(default)]
    pub states: BTreeMap<String, u64>,
}

impl Summary {
    /// Keyed by `id`.
    pub const BY_ID: KeyField<Self> = KeyField::new(&["id"], Self::id_key);

    fn id_key(&self) -> RecordKey {
        RecordKey::new(self.id.as_str())
    }

    fn default_id() -> String {
        "summary".to_owned()
    }

    /// Number of checks currently in `state`.
    pub fn count(&self, state: CheckState) -> u64 {
        self.states
            .get(state.summary_key())
            .copied()
            .unwrap_or(0)
    }
}

impl Record for Summary {
    const ENTITY: EntityType = EntityType::Summary;
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Description of one argument accepted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ArgumentDescription {
    /// Argument name.
    pub name: String,
    /// Argument type name.
    #[serde(rename = "type", default)]
    pub type_name: String,
    /// Help text.
    #[serde(default)]
    pub description: String,
    /// Default value, rendered as a string.
    #[serde(default)]
    pub default: String,
    /// Allowed values for enumerated arguments.
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<String>,
}

/// Description of a check agent (plugin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AgentDescription {
    /// Agent name; checks refer to it as their `agent`.
    pub name: String,
    /// Whether the agent runs against a remote host.
    #[serde(default)]
    pub remote: bool,
    /// Accepted arguments.
    #[serde(default)]
    pub arguments: Vec<ArgumentDescription>,
}

impl AgentDescription {
    /// Keyed by `name`.
    pub const BY_NAME: KeyField<Self> = KeyField::new(&["name"], Self::name_key);

    fn name_key(&self) -> RecordKey {
        RecordKey::new(self.name.as_str())
    }
}

impl Record for AgentDescription {
    const ENTITY: EntityType = EntityType::Agent;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Typed and raw key extraction must agree for a decoded record.
    fn assert_keys_agree<R: Record>(key: &KeyField<R>, json: &Value) {
        let record: Result<R, _> = serde_json::from_value(json.clone());
        assert!(record.is_ok(), "fixture must decode: {json}");
        if let Ok(record) = record {
            assert_eq!(Some(key.key_of(&record)), key.key_in(json));
        }
    }

    #[test]
    fn check_keys_agree() {
        let json = serde_json::json!({
            "id": "web",
            "agent": "http",
            "interval": 30_000_000_000_i64,
            "node": "",
            "arguments": {"url": "https://example.com/"},
            "expressions": ["StatusCode == 200"]
        });
        assert_keys_agree(&Check::BY_ID, &json);
    }

    #[test]
    fn check_interval_from_nanoseconds() {
        let check: Result<Check, _> = serde_json::from_value(serde_json::json!({
            "id": "web", "agent": "http", "interval": 30_000_000_000_i64
        }));
        assert_eq!(check.map(|c| c.interval()).ok(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn check_result_composite_key() {
        let json = serde_json::json!({
            "id": 7,
            "check_id": "web",
            "node_id": "node-a",
            "error": "",
            "timestamp": "2017-05-28T12:00:00Z",
            "results": {"StatusCode": 200}
        });
        assert_keys_agree(&CheckResult::BY_CHECK_NODE, &json);
        assert_eq!(
            CheckResult::BY_CHECK_NODE.key_in(&json),
            Some(RecordKey::new("web/node-a"))
        );
    }

    #[test]
    fn evaluation_keys_agree() {
        let json = serde_json::json!({
            "id": 1_496_000_000_000_000_000_i64,
            "check_host_id": "web::",
            "check_id": "web",
            "host_id": "",
            "history": ["up", "up", ""],
            "state": "up",
            "start": "2017-05-28T12:00:00Z",
            "end": "2017-05-28T12:05:00Z",
            "hosts": {"node-a": "up"}
        });
        assert_keys_agree(&Evaluation::BY_ID, &json);
        assert_keys_agree(&Evaluation::BY_CHECK, &json);
    }

    #[test]
    fn evaluation_version_is_end() {
        let eval: Result<Evaluation, _> = serde_json::from_value(serde_json::json!({
            "id": 1, "check_id": "web", "state": "down",
            "end": "2017-05-28T12:05:00Z"
        }));
        let version = eval.ok().and_then(|e| e.version());
        assert_eq!(
            version.map(|v| v.to_rfc3339()),
            Some("2017-05-28T12:05:00+00:00".to_owned())
        );
    }

    #[test]
    fn summary_accepts_upper_case_id_and_defaults() {
        let summary: Result<Summary, _> = serde_json::from_value(serde_json::json!({
            "ID": "summary", "checks": 3, "states": {"up": 2, "down": 1}
        }));
        let summary = summary.ok();
        assert_eq!(summary.as_ref().map(|s| s.id.as_str()), Some("summary"));
        assert_eq!(summary.as_ref().map(|s| s.count(CheckState::Down)), Some(1));
        assert_eq!(summary.as_ref().map(|s| s.count(CheckState::Degraded)), Some(0));

        let bare: Result<Summary, _> = serde_json::from_value(serde_json::json!({"checks": 0}));
        assert_eq!(bare.map(|s| s.id).ok(), Some("summary".to_owned()));
    }

    #[test]
    fn node_info_keyed_by_name() {
        let json = serde_json::json!({
            "name": "node-a",
            "started": "2017-05-28T11:00:00Z",
            "updated": "2017-05-28T12:00:00Z",
            "raft": {"state": "Leader"}
        });
        assert_keys_agree(&NodeInfo::BY_NAME, &json);
    }

    #[test]
    fn agent_description_renamed_fields() {
        let json = serde_json::json!({
            "name": "http",
            "remote": false,
            "arguments": [
                {"name": "url", "type": "string", "description": "URL", "default": "", "enum": []}
            ]
        });
        assert_keys_agree(&AgentDescription::BY_NAME, &json);
        let agent: Result<AgentDescription, _> = serde_json::from_value(json);
        let arg_type = agent
            .ok()
            .and_then(|a| a.arguments.first().map(|arg| arg.type_name.clone()));
        assert_eq!(arg_type.as_deref(), Some("string"));
    }

    #[test]
    fn unset_timestamps_carry_no_version() {
        let missing: Result<Evaluation, _> =
            serde_json::from_value(serde_json::json!({"id": 2, "check_id": "web", "state": "down"}));
        assert_eq!(missing.map(|e| e.version()).ok(), Some(None));

        let zero: Result<NodeInfo, _> = serde_json::from_value(serde_json::json!({
            "name": "node-a", "updated": "0001-01-01T00:00:00Z"
        }));
        assert_eq!(zero.map(|n| n.version()).ok(), Some(None));

        let set: Result<Evaluation, _> = serde_json::from_value(serde_json::json!({
            "id": 1, "check_id": "web", "state": "up", "end": "2017-05-28T12:05:00Z"
        }));
        let expected: Option<DateTime<Utc>> = "2017-05-28T12:05:00Z".parse().ok();
        assert_eq!(set.ok().and_then(|e| e.version()), expected);
    }
}
