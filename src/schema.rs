//! Result schemas.
//!
//! Every task that produces a typed result carries a [`ResultSchema`]; the
//! executor validates a successful, non-null result against it before the
//! task may complete with `Success`.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A named, compiled JSON Schema. Cheap to clone.
#[derive(Clone)]
pub struct ResultSchema {
    name: Arc<str>,
    validator: Arc<jsonschema::Validator>,
}

impl ResultSchema {
    /// Compiles `schema`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `schema` is not a valid JSON Schema.
    pub fn compile(name: &str, schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::Config(format!("invalid '{name}' schema: {e}")))?;
        Ok(Self {
            name: Arc::from(name),
            validator: Arc::new(validator),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks `instance`, collecting every violation.
    pub fn validate(&self, instance: &Value) -> Result<()> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaValidation {
                schema: self.name.to_string(),
                errors,
            })
        }
    }
}

impl fmt::Debug for ResultSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The schemas of every result shape the orchestrator produces.
#[derive(Debug, Clone)]
pub struct Schemas {
    pub volume: ResultSchema,
    pub volume_map: ResultSchema,
    pub service_volume_map: ResultSchema,
    pub volume_attach: ResultSchema,
    pub snapshot: ResultSchema,
    pub snapshot_map: ResultSchema,
    pub service_snapshot_map: ResultSchema,
}

impl Schemas {
    pub fn compile() -> Result<Self> {
        let volume = volume_schema();
        let snapshot = snapshot_schema();
        Ok(Self {
            volume: ResultSchema::compile("volume", &volume)?,
            volume_map: ResultSchema::compile("volumeMap", &map_of(&volume))?,
            service_volume_map: ResultSchema::compile(
                "serviceVolumeMap",
                &map_of(&map_of(&volume)),
            )?,
            volume_attach: ResultSchema::compile(
                "volumeAttachResponse",
                &json!({
                    "type": "object",
                    "required": ["volume"],
                    "properties": {
                        "volume": volume,
                        "attachToken": { "type": "string" }
                    }
                }),
            )?,
            snapshot: ResultSchema::compile("snapshot", &snapshot)?,
            snapshot_map: ResultSchema::compile("snapshotMap", &map_of(&snapshot))?,
            service_snapshot_map: ResultSchema::compile(
                "serviceSnapshotMap",
                &map_of(&map_of(&snapshot)),
            )?,
        })
    }
}

fn map_of(value_schema: &Value) -> Value {
    json!({
        "type": "object",
        "additionalProperties": value_schema
    })
}

fn fields_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": { "type": "string" }
    })
}

fn instance_id_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "driver"],
        "properties": {
            "id": { "type": "string" },
            "driver": { "type": "string" },
            "fields": fields_schema()
        }
    })
}

fn volume_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "name"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string" },
            "type": { "type": "string" },
            "size": { "type": "integer", "minimum": 0 },
            "iops": { "type": "integer", "minimum": 0 },
            "status": { "type": "string" },
            "availabilityZone": { "type": "string" },
            "networkName": { "type": "string" },
            "attachmentState": {
                "enum": ["attached", "available", "unavailable"]
            },
            "attachments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["volumeID"],
                    "properties": {
                        "volumeID": { "type": "string" },
                        "instanceID": instance_id_schema(),
                        "deviceName": { "type": "string" },
                        "mountPoint": { "type": "string" },
                        "status": { "type": "string" },
                        "fields": fields_schema()
                    }
                }
            },
            "fields": fields_schema()
        }
    })
}

fn snapshot_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string" },
            "description": { "type": "string" },
            "volumeID": { "type": "string" },
            "volumeSize": { "type": "integer", "minimum": 0 },
            "status": { "type": "string" },
            "startTime": { "type": "integer" },
            "fields": fields_schema()
        }
    })
}
