//! The common response envelope metadata.

use serde::Serialize;

/// `meta` object attached to every envelope: API version, server time as
/// float seconds since epoch, and an opaque build serial.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub api_version: String,
    pub server_time: f64,
    pub serial: String,
}

impl Meta {
    pub fn new(api_version: &str, serial: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            server_time: chrono_now(),
            serial: serial.to_string(),
        }
    }
}

fn chrono_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_serializes_camel_case() {
        let meta = Meta::new("1.9.0", "2024010100");
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["apiVersion"], "1.9.0");
        assert!(v["serverTime"].as_f64().unwrap() > 0.0);
        assert_eq!(v["serial"], "2024010100");
    }
}
