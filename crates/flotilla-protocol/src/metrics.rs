//! Typed `metrics` envelope payload, with lossy-JSON-tolerant number fields.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserializes a field that may arrive as either a JSON integer or a
/// double (round-tripping through another language's JSON encoder can
/// turn a whole number into `12.0`), clamping negative values to zero.
pub fn non_negative_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(if raw.is_sign_negative() || raw < 0.0 { 0.0 } else { raw })
}

fn non_negative_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw.map(|v| if v < 0.0 { 0.0 } else { v }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub container_id: String,
    #[serde(deserialize_with = "non_negative_f64")]
    pub cpu_percent: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub memory_usage_bytes: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub memory_limit_bytes: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub network_rx_bytes: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub network_tx_bytes: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub block_read_bytes: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub block_write_bytes: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostMetrics {
    #[serde(deserialize_with = "non_negative_f64")]
    pub cpu_percent: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub memory_used_bytes: f64,
    #[serde(deserialize_with = "non_negative_f64")]
    pub memory_total_bytes: f64,
    #[serde(default, deserialize_with = "non_negative_f64_opt")]
    pub disk_used_bytes: Option<f64>,
    #[serde(default, deserialize_with = "non_negative_f64_opt")]
    pub disk_total_bytes: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEnvelope {
    pub host: HostMetrics,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_integer_or_double_and_clamps_negative() {
        let json = serde_json::json!({
            "host": {
                "cpu_percent": -5,
                "memory_used_bytes": 1024.0,
                "memory_total_bytes": 2048,
            },
            "containers": [{
                "container_id": "abc",
                "cpu_percent": 12,
                "memory_usage_bytes": 10.5,
                "memory_limit_bytes": 100,
                "network_rx_bytes": 0,
                "network_tx_bytes": 0,
                "block_read_bytes": 0,
                "block_write_bytes": 0,
            }]
        });
        let env: MetricsEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(env.host.cpu_percent, 0.0);
        assert_eq!(env.host.memory_used_bytes, 1024.0);
        assert_eq!(env.containers[0].cpu_percent, 12.0);
        assert!(env.host.disk_used_bytes.is_none());
    }
}
