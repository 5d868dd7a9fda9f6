//! Immutable event record and its mapping onto queue jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::model::{EventType, SyncEvent};
use crate::error::CoreResult;
use crate::queue::{Job, NewJob};

/// An event plus the identity it travels with.
///
/// `event_id` is generated fresh per submission and doubles as the queue's
/// dedup key.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: SyncEvent,
    pub timestamp: DateTime<Utc>,
}

/// Job data as stored by the queue: `{eventId, payload, timestamp}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobData {
    event_id: Uuid,
    payload: Value,
    timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: SyncEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Turn the envelope into a queue submission keyed by `event_id`.
    pub fn to_job(&self) -> CoreResult<NewJob> {
        let data = JobData {
            event_id: self.event_id,
            payload: self.event.payload()?,
            timestamp: self.timestamp,
        };
        Ok(NewJob {
            id: self.event_id.to_string(),
            name: self.event_type().as_str().to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Decode a delivered job back into a typed envelope.
    pub fn from_job(job: &Job) -> CoreResult<Self> {
        let data: JobData = serde_json::from_value(job.data.clone())?;
        let event = SyncEvent::decode(&job.name, data.payload)?;
        Ok(Self {
            event_id: data.event_id,
            event,
            timestamp: data.timestamp,
        })
    }
}
