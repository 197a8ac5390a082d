//! Maps a configured backend name to a constructed [`StorageBackend`].

use std::path::PathBuf;

use crate::backend::StorageBackend;
use crate::error::{Error, Result};
use crate::json_backend::JsonFileBackend;
use crate::null_backend::NullBackend;

#[cfg(feature = "influxdb")]
use crate::influx_backend::{InfluxBackend, InfluxConfig};

/// Builds a boxed [`StorageBackend`] from a backend name and its JSON
/// configuration blob, as read from `system.storage` in the service config.
///
/// Recognized names: `"json"` (config key `path`, a directory),
/// `"null"`, and, with the `influxdb` feature enabled, `"influxdb"`
/// (config keys `url`, `org`, `bucket`, `token`).
pub fn build_backend(name: &str, config: &serde_json::Value) -> Result<Box<dyn StorageBackend>> {
    match name {
        "json" => {
            let path = config
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("/data/readings");
            Ok(Box::new(JsonFileBackend::new(PathBuf::from(path))))
        }
        "null" => Ok(Box::new(NullBackend::new())),
        #[cfg(feature = "influxdb")]
        "influxdb" => {
            let cfg = InfluxConfig {
                url: required_str(config, "url")?,
                org: required_str(config, "org")?,
                bucket: required_str(config, "bucket")?,
                token: required_str(config, "token")?,
            };
            Ok(Box::new(InfluxBackend::new(cfg)))
        }
        other => Err(Error::UnknownBackend(other.to_string())),
    }
}

#[cfg(feature = "influxdb")]
fn required_str(config: &serde_json::Value, key: &str) -> Result<String> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidConfig(format!("storage config missing `{key}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_json_backend() {
        let backend = build_backend("json", &serde_json::json!({"path": "/tmp/readings"})).unwrap();
        assert_eq!(backend.backend_name(), "json");
    }

    #[test]
    fn builds_null_backend() {
        let backend = build_backend("null", &serde_json::json!({})).unwrap();
        assert_eq!(backend.backend_name(), "null");
    }

    #[test]
    fn rejects_unknown_backend() {
        let result = build_backend("mongo", &serde_json::json!({}));
        assert!(result.is_err());
    }
}
