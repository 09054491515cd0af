//! Per-event resolution pipeline and worker pool

use crate::event::{InboundEvent, InboundMessage};
use crate::outcome::{DispatchOutcome, ResolvedIdentity};
use crate::DispatchError;
use identity_engine::{
    extract_blocking_guarded, EmbeddingExtractor, IdentityMatcher, ImageInput, MatchResult,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound for `max_in_flight`
pub const MAX_IN_FLIGHT: usize = 1024;

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Events processed concurrently, at most [`MAX_IN_FLIGHT`]. Extractor
    /// calls abandoned at their deadline keep counting until they return.
    pub max_in_flight: usize,
    /// Deadline for one event, extraction and matching included (ms)
    pub event_timeout_ms: u64,
    /// Detection classes that mark an event as a face event
    pub face_labels: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            event_timeout_ms: 5000,
            face_labels: vec!["face".to_string()],
        }
    }
}

impl DispatcherConfig {
    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }
}

/// Resolves face events to identities.
///
/// Each event runs as its own task, at most `max_in_flight` at a time,
/// under its own deadline. No ordering is kept between events.
pub struct Dispatcher {
    config: DispatcherConfig,
    extractor: Arc<dyn EmbeddingExtractor>,
    matcher: Arc<IdentityMatcher>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        extractor: Arc<dyn EmbeddingExtractor>,
        matcher: Arc<IdentityMatcher>,
    ) -> Self {
        let max_in_flight = config.max_in_flight.clamp(1, MAX_IN_FLIGHT);
        info!(
            "Creating dispatcher: max_in_flight={}, timeout={}ms, labels={:?}",
            max_in_flight, config.event_timeout_ms, config.face_labels
        );
        Self {
            config: DispatcherConfig {
                max_in_flight,
                ..config
            },
            extractor,
            matcher,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Consume `inbox` until it closes, sending resolved identities to `outbox`.
    ///
    /// Returns after every in-flight event has finished.
    pub async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<InboundMessage>,
        outbox: mpsc::Sender<ResolvedIdentity>,
    ) {
        info!("Starting event dispatcher");

        while let Some(message) = inbox.recv().await {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => Arc::new(permit),
                Err(_) => break,
            };

            let dispatcher = Arc::clone(&self);
            let outbox = outbox.clone();
            tokio::spawn(async move {
                let outcome = dispatcher.dispatch(message, permit).await;
                if let DispatchOutcome::Emitted(resolved) = outcome {
                    if outbox.send(resolved).await.is_err() {
                        debug!("Outbox closed; dropping resolved identity");
                    }
                }
            });
        }

        // wait for in-flight events, abandoned extractor calls included
        let _ = self
            .permits
            .acquire_many(self.config.max_in_flight as u32)
            .await;
        info!("Event dispatcher stopped");
    }

    /// Take one message through the whole pipeline, waiting for a free slot.
    ///
    /// Never panics or errors: every failure becomes a `Dropped` outcome.
    pub async fn handle(&self, message: InboundMessage) -> DispatchOutcome {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => self.dispatch(message, Arc::new(permit)).await,
            Err(_) => DispatchOutcome::Dropped(DispatchError::ShuttingDown),
        }
    }

    async fn dispatch(
        &self,
        message: InboundMessage,
        permit: Arc<OwnedSemaphorePermit>,
    ) -> DispatchOutcome {
        counter!("face_events_received_total").increment(1);

        let outcome = self.process(&message, permit).await;

        match &outcome {
            DispatchOutcome::Emitted(resolved) => {
                debug!(
                    "Resolved {} on {}: {}",
                    resolved.identity_name, resolved.source, resolved.event_id
                );
            }
            DispatchOutcome::Filtered => debug!("Ignored non-face event on {}", message.topic),
            DispatchOutcome::Dropped(DispatchError::MatchUnavailable(reason)) => {
                counter!("face_match_unavailable_total").increment(1);
                warn!("Match unavailable for event on {}: {}", message.topic, reason);
            }
            DispatchOutcome::Dropped(e) => warn!("Dropped event on {}: {}", message.topic, e),
        }
        counter!("face_events_total", "outcome" => outcome.as_str()).increment(1);

        outcome
    }

    async fn process(
        &self,
        message: &InboundMessage,
        permit: Arc<OwnedSemaphorePermit>,
    ) -> DispatchOutcome {
        let event = match InboundEvent::parse(&message.payload) {
            Ok(event) => event,
            Err(e) => return DispatchOutcome::Dropped(e),
        };

        if !event.is_face_event(&self.config.face_labels) {
            return DispatchOutcome::Filtered;
        }

        let image = match event.image_input() {
            Ok(image) => image,
            Err(e) => return DispatchOutcome::Dropped(e),
        };

        let deadline = self.config.event_timeout();
        let result = match timeout(deadline, self.resolve(image, Arc::clone(&permit))).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return DispatchOutcome::Dropped(e),
            Err(_) => return DispatchOutcome::Dropped(DispatchError::DeadlineExceeded(deadline)),
        };

        let timestamp = event.start_time().unwrap_or(message.received_at);
        DispatchOutcome::Emitted(ResolvedIdentity::new(
            message.source(),
            timestamp,
            event.track_id(),
            &result,
        ))
    }

    /// The blocking extractor job shares `permit`, so a call that outlives
    /// the deadline still holds its slot.
    async fn resolve(
        &self,
        image: ImageInput,
        permit: Arc<OwnedSemaphorePermit>,
    ) -> Result<MatchResult, DispatchError> {
        let faces = extract_blocking_guarded(Arc::clone(&self.extractor), image, permit)
            .await
            .map_err(|e| DispatchError::Extraction(e.to_string()))?;

        let result = self.matcher.match_faces(faces).await?;

        let label = if result.is_known() { "known" } else { "unknown" };
        counter!("face_matches_total", "result" => label).increment(1);
        if let Some(distance) = result.distance() {
            histogram!("face_match_distance").record(distance as f64);
        }

        Ok(result)
    }
}
