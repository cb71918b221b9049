//! Activity emitter.
//!
//! Collects the status, artifact and dispatch-response events of one cycle.
//! Events are validated here so consumers can rely on every required field
//! being present.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::{ActivityEvent, ActivityRecord, ArtifactPart, StatusLevel};

pub const TELEMETRY_ARTIFACT_ID: &str = "gmx-allora-telemetry";
pub const EXECUTION_PLAN_ARTIFACT_ID: &str = "gmx-allora-execution-plan";
pub const EXECUTION_RESULT_ARTIFACT_ID: &str = "gmx-allora-execution-result";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivityError {
    #[error("status event has an empty message")]
    EmptyMessage,
    #[error("artifact has an empty id")]
    EmptyArtifactId,
    #[error("{0} event has no parts")]
    EmptyParts(&'static str),
}

/// Check the per-variant required fields.
pub fn validate(event: &ActivityEvent) -> Result<(), ActivityError> {
    match event {
        ActivityEvent::Status { message, .. } if message.trim().is_empty() => {
            Err(ActivityError::EmptyMessage)
        }
        ActivityEvent::Artifact { artifact_id, .. } if artifact_id.trim().is_empty() => {
            Err(ActivityError::EmptyArtifactId)
        }
        ActivityEvent::Artifact { parts, .. } if parts.is_empty() => {
            Err(ActivityError::EmptyParts("artifact"))
        }
        ActivityEvent::DispatchResponse { parts } if parts.is_empty() => {
            Err(ActivityError::EmptyParts("dispatch-response"))
        }
        _ => Ok(()),
    }
}

/// A data part from any serializable value.
pub fn data_part<T: Serialize>(value: &T) -> ArtifactPart {
    ArtifactPart::Data {
        data: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
    }
}

pub fn text_part(text: impl Into<String>) -> ArtifactPart {
    ArtifactPart::Text { text: text.into() }
}

pub struct ActivityEmitter {
    cycle: u64,
    records: Vec<ActivityRecord>,
}

impl ActivityEmitter {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            records: Vec::new(),
        }
    }

    /// Validate and append an event.
    pub fn emit(&mut self, event: ActivityEvent) -> Result<(), ActivityError> {
        validate(&event)?;
        self.records.push(ActivityRecord {
            id: Uuid::new_v4(),
            cycle: self.cycle,
            emitted_at: Utc::now(),
            event,
        });
        Ok(())
    }

    fn emit_or_log(&mut self, event: ActivityEvent) {
        if let Err(e) = self.emit(event) {
            warn!(cycle = self.cycle, error = %e, "Dropped invalid activity event");
        }
    }

    pub fn status(&mut self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Info => info!(cycle = self.cycle, "{message}"),
            StatusLevel::Warning => warn!(cycle = self.cycle, "{message}"),
            StatusLevel::Error => error!(cycle = self.cycle, "{message}"),
        }
        self.emit_or_log(ActivityEvent::Status { message, level });
    }

    pub fn artifact(&mut self, artifact_id: &str, parts: Vec<ArtifactPart>) {
        self.emit_or_log(ActivityEvent::Artifact {
            artifact_id: artifact_id.to_string(),
            parts,
        });
    }

    pub fn dispatch_response(&mut self, parts: Vec<ArtifactPart>) {
        self.emit_or_log(ActivityEvent::DispatchResponse { parts });
    }

    pub fn into_records(self) -> Vec<ActivityRecord> {
        self.records
    }
}
