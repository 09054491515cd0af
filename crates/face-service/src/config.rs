//! Service configuration
//!
//! Layered in order: built-in defaults, then a TOML/JSON/YAML file, then
//! `FACE_ID_*` environment variables (`__` separates sections, e.g.
//! `FACE_ID_MATCHER__THRESHOLD=0.6`, `FACE_ID_MQTT__TOPICS=a/#,b/#`).

use crate::ServiceError;
use event_dispatch::{DispatcherConfig, MqttConfig, MAX_IN_FLIGHT};
use face_gallery::DistanceMetric;
use identity_engine::{ExtractorConfig, Threshold, DEFAULT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

const DEFAULT_FILE: &str = "config/face-service";
const ENV_PREFIX: &str = "FACE_ID";

/// Gallery storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// SQLite connection URL
    pub url: String,
    pub max_connections: u32,
    pub metric: DistanceMetric,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/gallery.db".to_string(),
            max_connections: 4,
            metric: DistanceMetric::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum distance accepted as a match (strict)
    pub threshold: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<Level, ServiceError> {
        self.level
            .parse()
            .map_err(|_| ServiceError::Config(format!("unknown log level '{}'", self.level)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape address, e.g. `0.0.0.0:9100`; none disables the exporter
    pub listen: Option<String>,
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub mqtt: MqttConfig,
    pub gallery: GalleryConfig,
    pub matcher: MatcherConfig,
    pub dispatcher: DispatcherConfig,
    pub extractor: ExtractorConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl ServiceConfig {
    /// Load from `path` (or `config/face-service.*` if present) plus the environment.
    ///
    /// Not validated: the enrollment tool needs no MQTT section.
    pub fn load(path: Option<&Path>) -> Result<Self, ServiceError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_FILE).required(false),
        };

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("mqtt.topics")
            .with_list_parse_key("dispatcher.face_labels")
            .try_parsing(true);

        let config: ServiceConfig = config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServiceError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), ServiceError> {
        self.threshold()?;
        self.logging.max_level()?;

        if self.mqtt.topics.is_empty() {
            return Err(ServiceError::Config(
                "at least one MQTT topic is required".to_string(),
            ));
        }
        if !(1..=MAX_IN_FLIGHT).contains(&self.dispatcher.max_in_flight) {
            return Err(ServiceError::Config(format!(
                "dispatcher.max_in_flight must be between 1 and {}",
                MAX_IN_FLIGHT
            )));
        }
        if self.dispatcher.event_timeout_ms == 0 {
            return Err(ServiceError::Config(
                "dispatcher.event_timeout_ms must be positive".to_string(),
            ));
        }
        if self.dispatcher.face_labels.is_empty() {
            return Err(ServiceError::Config(
                "dispatcher.face_labels must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn threshold(&self) -> Result<Threshold, ServiceError> {
        Threshold::new(self.matcher.threshold).map_err(|e| ServiceError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.mqtt.topics = vec!["frigate/events/#".to_string()];
        config
    }

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("face-service-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.matcher.threshold, 0.7);
        assert_eq!(config.gallery.metric, DistanceMetric::Cosine);
        assert_eq!(config.dispatcher.face_labels, vec!["face".to_string()]);
        assert!(config.metrics.listen.is_none());
    }

    #[test]
    fn test_validation() {
        assert!(valid().validate().is_ok());
        assert!(ServiceConfig::default().validate().is_err());

        let mut config = valid();
        config.matcher.threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.matcher.threshold = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dispatcher.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dispatcher.max_in_flight = MAX_IN_FLIGHT;
        assert!(config.validate().is_ok());
        config.dispatcher.max_in_flight = usize::MAX;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let path = write_temp(
            r#"
[mqtt]
host = "broker.local"
topics = ["cameras/+/metadata"]
output_topic = "identities"

[matcher]
threshold = 0.55

[gallery]
metric = "euclidean"
"#,
        );

        let config = ServiceConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.output_topic.as_deref(), Some("identities"));
        assert_eq!(config.matcher.threshold, 0.55);
        assert_eq!(config.gallery.metric, DistanceMetric::Euclidean);
        assert_eq!(config.dispatcher.max_in_flight, 8);
    }

    #[test]
    fn test_loaded_negative_threshold_fails_validation() {
        let path = write_temp("[mqtt]\ntopics = [\"a\"]\n[matcher]\nthreshold = -1.0\n");
        let config = ServiceConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(matches!(config.validate(), Err(ServiceError::Config(_))));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(ServiceConfig::load(Some(Path::new("/nonexistent/face-service.toml"))).is_err());
    }
}
