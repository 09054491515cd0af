//! Inbound event schema and filtering

use crate::DispatchError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use identity_engine::{ImageInput, RegionFractions};
use serde::Deserialize;
use tracing::debug;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Raw message as delivered by the bus
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Camera identifier: last `/`-separated segment of the topic
    pub fn source(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or(&self.topic)
    }
}

/// One classified detection
#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub score: Option<f32>,
}

/// Embedded, base64-encoded image
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePayload {
    pub data: String,
    #[serde(default)]
    pub bounding_box: Option<RegionFractions>,
}

/// The fields of a camera metadata event this service relies on
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Kept raw; see [`InboundEvent::start_time`]
    #[serde(default)]
    pub start_time: Option<serde_json::Value>,
    pub classes: Vec<Classification>,
    #[serde(default)]
    pub image: Option<ImagePayload>,
}

impl InboundEvent {
    /// Parse a JSON payload
    pub fn parse(payload: &[u8]) -> Result<Self, DispatchError> {
        serde_json::from_slice(payload).map_err(|e| DispatchError::MalformedEvent(e.to_string()))
    }

    /// True if any detection carries one of `labels` (ASCII case-insensitive)
    pub fn is_face_event(&self, labels: &[String]) -> bool {
        self.classes.iter().any(|class| {
            labels
                .iter()
                .any(|label| class.kind.eq_ignore_ascii_case(label))
        })
    }

    /// Tracker id, whether sent as a string or a number
    pub fn track_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Event start as RFC 3339, a naive UTC timestamp or unix seconds.
    ///
    /// Anything else is ignored so the caller can fall back to receipt time.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let parsed = match self.start_time.as_ref()? {
            serde_json::Value::String(s) => parse_timestamp(s.trim()),
            serde_json::Value::Number(n) => n.as_f64().and_then(from_unix_seconds),
            serde_json::Value::Null => return None,
            _ => None,
        };
        if parsed.is_none() {
            debug!(start_time = ?self.start_time, "Ignoring unrecognised start_time");
        }
        parsed
    }

    /// Decode the embedded image; a qualifying event without one is malformed
    pub fn image_input(&self) -> Result<ImageInput, DispatchError> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| DispatchError::MalformedEvent("missing image payload".to_string()))?;

        let data = STANDARD
            .decode(image.data.trim())
            .map_err(|e| DispatchError::MalformedEvent(format!("invalid image encoding: {}", e)))?;

        if data.is_empty() {
            return Err(DispatchError::MalformedEvent("empty image payload".to_string()));
        }

        Ok(ImageInput::new(data).with_region(image.bounding_box))
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Some(time.with_timezone(&Utc));
    }
    if let Some(time) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
    {
        return Some(time.and_utc());
    }
    s.parse::<f64>().ok().and_then(from_unix_seconds)
}

fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels() -> Vec<String> {
        vec!["face".to_string()]
    }

    #[test]
    fn test_face_filter_is_case_insensitive() {
        let event = InboundEvent::parse(br#"{"classes":[{"type":"Human"},{"type":"FACE"}]}"#).unwrap();
        assert!(event.is_face_event(&labels()));

        let event = InboundEvent::parse(br#"{"classes":[{"type":"vehicle"}]}"#).unwrap();
        assert!(!event.is_face_event(&labels()));

        let event = InboundEvent::parse(br#"{"classes":[]}"#).unwrap();
        assert!(!event.is_face_event(&labels()));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            InboundEvent::parse(b"not json"),
            Err(DispatchError::MalformedEvent(_))
        ));
        assert!(matches!(
            InboundEvent::parse(br#"{"image":{"data":""}}"#),
            Err(DispatchError::MalformedEvent(_))
        ));
        assert!(matches!(
            InboundEvent::parse(br#"{"classes":"face"}"#),
            Err(DispatchError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_image_decoding() {
        let event = InboundEvent::parse(
            br#"{"classes":[{"type":"face"}],
                 "image":{"data":"AQID","bounding_box":{"top":0.1,"bottom":0.9,"left":0.2,"right":0.8}}}"#,
        )
        .unwrap();
        let image = event.image_input().unwrap();
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(image.region.unwrap().left, 0.2);
    }

    #[test]
    fn test_missing_or_bad_image() {
        let event = InboundEvent::parse(br#"{"classes":[{"type":"face"}]}"#).unwrap();
        assert!(event.image_input().is_err());

        let event =
            InboundEvent::parse(br#"{"classes":[{"type":"face"}],"image":{"data":"%%%"}}"#).unwrap();
        assert!(event.image_input().is_err());
    }

    #[test]
    fn test_metadata_fields() {
        let event = InboundEvent::parse(
            br#"{"id":42,"start_time":"2025-06-01T12:00:00Z","classes":[{"type":"face","score":0.9}]}"#,
        )
        .unwrap();
        assert_eq!(event.track_id().as_deref(), Some("42"));
        assert_eq!(event.start_time().unwrap().to_rfc3339(), "2025-06-01T12:00:00+00:00");
        assert_eq!(event.classes[0].score, Some(0.9));
    }

    fn start_time_of(raw: &str) -> Option<DateTime<Utc>> {
        let payload = format!(r#"{{"start_time":{},"classes":[]}}"#, raw);
        InboundEvent::parse(payload.as_bytes()).unwrap().start_time()
    }

    #[test]
    fn test_lenient_start_time() {
        let expected = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z").unwrap();

        assert_eq!(start_time_of(r#""2025-06-01 12:00:00""#).unwrap(), expected);
        assert_eq!(start_time_of(r#""2025-06-01T12:00:00""#).unwrap(), expected);
        assert_eq!(start_time_of(r#""2025-06-01T14:00:00+02:00""#).unwrap(), expected);
        assert_eq!(start_time_of("1748779200").unwrap(), expected);
        assert_eq!(start_time_of(r#""1748779200""#).unwrap(), expected);

        let fractional = start_time_of("1748779200.25").unwrap();
        assert_eq!(fractional.timestamp(), 1748779200);
        assert_eq!(fractional.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_unusable_start_time_is_ignored() {
        assert!(start_time_of(r#""yesterday""#).is_none());
        assert!(start_time_of("null").is_none());
        assert!(start_time_of("[1]").is_none());
        assert!(start_time_of("1e300").is_none());

        let event = InboundEvent::parse(br#"{"classes":[]}"#).unwrap();
        assert!(event.start_time().is_none());
    }

    #[test]
    fn test_source_from_topic() {
        assert_eq!(InboundMessage::new("metadata/cam1", "").source(), "cam1");
        assert_eq!(InboundMessage::new("cam2", "").source(), "cam2");
    }

    proptest! {
        #[test]
        fn prop_filter_matches_any_casing(mask in proptest::collection::vec(any::<bool>(), 4), others in 0usize..4) {
            let label: String = "face"
                .chars()
                .zip(mask)
                .map(|(c, upper)| if upper { c.to_ascii_uppercase() } else { c })
                .collect();

            let mut classes: Vec<String> = (0..others).map(|i| format!("{{\"type\":\"other{}\"}}", i)).collect();
            classes.push(format!("{{\"type\":\"{}\"}}", label));
            let payload = format!("{{\"classes\":[{}]}}", classes.join(","));

            let event = InboundEvent::parse(payload.as_bytes()).unwrap();
            prop_assert!(event.is_face_event(&labels()));
        }
    }
}
