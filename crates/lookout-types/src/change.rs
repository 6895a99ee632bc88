//! The change-feed envelope.
//!
//! Every message on the live feed is a JSON object of the form
//! `{"type": <tag>, "command": "save" | "delete", "data": <object>}`.
//! The envelope keeps `type` and `command` as plain strings so that
//! messages with unknown tags or commands still decode and can be logged
//! and dropped by the receiver instead of failing the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::enums::{Command, EntityType};
use crate::records::Record;

/// One mutation delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeRecord {
    /// Entity type tag selecting the receiving stores.
    #[serde(rename = "type")]
    pub entity: String,
    /// Mutation name, `save` or `delete`.
    pub command: String,
    /// The full record for `save`, at least the identifier for `delete`.
    #[serde(default)]
    pub data: Value,
}

impl ChangeRecord {
    /// Decode one feed text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the frame is not a change envelope.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Build a `save` change for a record.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the record cannot be serialized.
    pub fn save<R: Record>(record: &R) -> Result<Self, serde_json::Error> {
        Ok(Self {
            entity: R::ENTITY.tag().to_owned(),
            command: Command::Save.as_str().to_owned(),
            data: serde_json::to_value(record)?,
        })
    }

    /// Build a `delete` change carrying only the given identifier payload.
    pub fn delete(entity: EntityType, data: Value) -> Self {
        Self {
            entity: entity.tag().to_owned(),
            command: Command::Delete.as_str().to_owned(),
            data,
        }
    }

    /// The entity type of this change, if the tag is known.
    pub fn entity_type(&self) -> Option<EntityType> {
        EntityType::from_tag(&self.entity)
    }

    /// The command of this change, if it is known.
    pub fn command(&self) -> Option<Command> {
        Command::parse(&self.command)
    }

    /// Encode this change as a feed text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if encoding fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
