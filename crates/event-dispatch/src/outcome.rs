//! Dispatcher outputs

use crate::DispatchError;
use chrono::{DateTime, Utc};
use identity_engine::MatchResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolved identity for one face event, published downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub event_id: Uuid,
    /// Originating camera
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    /// Gallery name or `"unknown"`
    pub identity_name: String,
    pub distance: Option<f32>,
}

impl ResolvedIdentity {
    pub fn new(
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        track_id: Option<String>,
        result: &MatchResult,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source: source.into(),
            timestamp,
            track_id,
            identity_name: result.identity_name().to_string(),
            distance: result.distance(),
        }
    }
}

/// Terminal state of one event
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Matched (known or unknown) and ready to publish
    Emitted(ResolvedIdentity),
    /// Not a face event
    Filtered,
    /// Malformed, failed or timed out; processing continues with the next event
    Dropped(DispatchError),
}

impl DispatchOutcome {
    /// Label used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Emitted(_) => "emitted",
            DispatchOutcome::Filtered => "filtered",
            DispatchOutcome::Dropped(_) => "dropped",
        }
    }
}
