//! Face Event Dispatch
//!
//! Turns camera face-crop events into resolved identities:
//! - MQTT intake and outbound publication
//! - Face-event filtering and payload decoding
//! - Bounded, deadline-guarded per-event workers

mod dispatcher;
mod event;
mod mqtt;
mod outcome;

pub use dispatcher::{Dispatcher, DispatcherConfig, MAX_IN_FLIGHT};
pub use event::{Classification, ImagePayload, InboundEvent, InboundMessage};
pub use mqtt::{MqttBridge, MqttConfig};
pub use outcome::{DispatchOutcome, ResolvedIdentity};

use identity_engine::IdentityError;
use std::time::Duration;
use thiserror::Error;

/// Dispatch error types
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Embedding extraction failed: {0}")]
    Extraction(String),

    #[error("Match unavailable: {0}")]
    MatchUnavailable(String),

    #[error("Event deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Identity resolution rejected the event: {0}")]
    Rejected(String),

    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

impl From<IdentityError> for DispatchError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MatchUnavailable(reason) => DispatchError::MatchUnavailable(reason),
            IdentityError::Extraction(reason) => DispatchError::Extraction(reason),
            IdentityError::InvalidEmbedding(reason) => DispatchError::Extraction(reason.to_string()),
            IdentityError::InvalidName
            | IdentityError::NoFaceDetected
            | IdentityError::InvalidThreshold(_) => DispatchError::Rejected(err.to_string()),
        }
    }
}
