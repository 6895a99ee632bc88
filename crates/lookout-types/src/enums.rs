//! Enumeration types shared by the sync layer and the dashboard.
//!
//! [`EntityType`] is the tag carried by every feed message and the
//! selector for the REST snapshot resource. [`Command`] is the mutation
//! kind of a feed message, and [`CheckState`] is the evaluated state of a
//! check as reported by the monitoring service.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The kind of server-side entity a record or change message describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum EntityType {
    /// A configured check.
    Check,
    /// The raw result of one node executing one check.
    CheckResult,
    /// The evaluated state of a check.
    Evaluation,
    /// A monitored host reachable over a transport.
    Host,
    /// A person or service that receives notifications.
    Contact,
    /// A named group of contacts.
    ContactGroup,
    /// Cluster membership information for one service node.
    NodeInfo,
    /// The aggregate state summary over all checks.
    Summary,
    /// A check agent (plugin) description.
    Agent,
}

impl EntityType {
    /// Every entity type, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Check,
        Self::CheckResult,
        Self::Evaluation,
        Self::Host,
        Self::Contact,
        Self::ContactGroup,
        Self::NodeInfo,
        Self::Summary,
        Self::Agent,
    ];

    /// The tag used in the `type` field of feed messages.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::CheckResult => "checkresult",
            Self::Evaluation => "evaluation",
            Self::Host => "host",
            Self::Contact => "contact",
            Self::ContactGroup => "contactgroup",
            Self::NodeInfo => "nodeinfo",
            Self::Summary => "summary",
            Self::Agent => "agent",
        }
    }

    /// Look up an entity type by its feed tag.
    ///
    /// Returns `None` for tags this client does not know about.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entity| entity.tag() == tag)
    }

    /// The REST resource under `/api/` that lists every record of this
    /// type, if the service exposes one.
    ///
    /// Check results, node infos and the summary only ever arrive over
    /// the live feed.
    pub const fn resource(self) -> Option<&'static str> {
        match self {
            Self::Check => Some("checks"),
            Self::Evaluation => Some("evaluations"),
            Self::Host => Some("hosts"),
            Self::Contact => Some("contacts"),
            Self::ContactGroup => Some("contactgroups"),
            Self::Agent => Some("agents"),
            Self::CheckResult | Self::NodeInfo | Self::Summary => None,
        }
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.tag())
    }
}

/// The mutation a feed message asks subscribed stores to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum Command {
    /// Insert or replace the full record carried in `data`.
    Save,
    /// Remove the record identified by `data`.
    Delete,
}

impl Command {
    /// Parse the wire name of a command. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "save" => Some(Self::Save),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// The wire name of this command.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }
}

/// The evaluated state of a check.
///
/// The service encodes the unknown state as the empty string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum CheckState {
    /// Not yet up or down.
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// All conditions hold.
    #[serde(rename = "up")]
    Up,
    /// Some conditions fail.
    #[serde(rename = "degraded")]
    Degraded,
    /// The check failed.
    #[serde(rename = "down")]
    Down,
}

impl CheckState {
    /// The key used for this state in a [`Summary`](crate::Summary)
    /// histogram.
    pub const fn summary_key(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Up => "up",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

impl core::fmt::Display for CheckState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let human = match self {
            Self::Unknown => "Unknown",
            Self::Up => "Up",
            Self::Degraded => "Degraded",
            Self::Down => "Down",
        };
        f.write_str(human)
    }
}
