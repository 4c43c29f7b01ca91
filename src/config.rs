use crate::models::{DeviceStatus, RelayState};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub devices_file: String,
    pub http_port: u16,
    pub timeouts: TimeoutConf,
    pub tokens: TokenConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

/// Seuils du monitor, en secondes. Le heartbeat est le critère primaire,
/// l'activité générique (`last_seen`) le critère de repli.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConf {
    pub heartbeat_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub stale_threshold_secs: u64,
}

/// Tokens de classification des payloads devices. Les listes du firmware
/// d'origine sont des valeurs par défaut, surchageables par config car
/// tous les firmwares ne parlent pas le même dialecte.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TokenConf {
    pub status_online: Vec<String>,
    pub relay_on: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            devices_file: "devices.json".into(),
            http_port: 8080,
            timeouts: TimeoutConf::default(),
            tokens: TokenConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: "relay-kernel".into(),
        }
    }
}

impl Default for TimeoutConf {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 120,
            status_timeout_secs: 300,
            sweep_interval_secs: 30,
            error_backoff_secs: 120,
            stale_threshold_secs: 60,
        }
    }
}

impl Default for TokenConf {
    fn default() -> Self {
        Self {
            status_online: ["online", "connected", "1", "true"]
                .map(String::from)
                .to_vec(),
            relay_on: ["on", "1", "true", "high"].map(String::from).to_vec(),
        }
    }
}

impl TimeoutConf {
    pub fn heartbeat_timeout(&self) -> time::Duration {
        time::Duration::seconds(self.heartbeat_timeout_secs as i64)
    }

    pub fn status_timeout(&self) -> time::Duration {
        time::Duration::seconds(self.status_timeout_secs as i64)
    }

    pub fn stale_threshold(&self) -> time::Duration {
        time::Duration::seconds(self.stale_threshold_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn error_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.error_backoff_secs)
    }
}

impl TokenConf {
    /// Classification insensible à la casse ; tout token inconnu vaut offline.
    pub fn classify_status(&self, payload: &str) -> DeviceStatus {
        let token = payload.trim().to_ascii_lowercase();
        if self.status_online.iter().any(|t| t.eq_ignore_ascii_case(&token)) {
            DeviceStatus::Connected
        } else {
            DeviceStatus::Disconnected
        }
    }

    pub fn classify_relay(&self, payload: &str) -> RelayState {
        let token = payload.trim().to_ascii_lowercase();
        if self.relay_on.iter().any(|t| t.eq_ignore_ascii_case(&token)) {
            RelayState::On
        } else {
            RelayState::Off
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("RELAY_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return KernelConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("[config] {path} invalide: {e}, config par défaut");
            KernelConfig::default()
        })
    } else {
        warn!("[config] pas de {path}, config par défaut");
        KernelConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_tokens() {
        let tokens = TokenConf::default();
        assert_eq!(tokens.classify_status("online"), DeviceStatus::Connected);
        assert_eq!(tokens.classify_status("Online"), DeviceStatus::Connected);
        assert_eq!(tokens.classify_status("CONNECTED"), DeviceStatus::Connected);
        assert_eq!(tokens.classify_status("1"), DeviceStatus::Connected);
        assert_eq!(tokens.classify_status(" true "), DeviceStatus::Connected);
        assert_eq!(tokens.classify_status("offline"), DeviceStatus::Disconnected);
        assert_eq!(tokens.classify_status("0"), DeviceStatus::Disconnected);
        assert_eq!(tokens.classify_status(""), DeviceStatus::Disconnected);
    }

    #[test]
    fn test_classify_relay_tokens() {
        let tokens = TokenConf::default();
        assert_eq!(tokens.classify_relay("on"), RelayState::On);
        assert_eq!(tokens.classify_relay("HIGH"), RelayState::On);
        assert_eq!(tokens.classify_relay("1"), RelayState::On);
        assert_eq!(tokens.classify_relay("off"), RelayState::Off);
        assert_eq!(tokens.classify_relay("low"), RelayState::Off);
        assert_eq!(tokens.classify_relay("garbage"), RelayState::Off);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg: KernelConfig = serde_yaml::from_str("mqtt:\n  host: broker.lan\n").unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.devices_file, "devices.json");
        assert_eq!(cfg.timeouts.heartbeat_timeout_secs, 120);
    }

    #[test]
    fn test_custom_tokens_override_defaults() {
        let cfg: KernelConfig =
            serde_yaml::from_str("tokens:\n  status_online: [\"up\"]\n").unwrap();
        assert_eq!(cfg.tokens.classify_status("up"), DeviceStatus::Connected);
        assert_eq!(cfg.tokens.classify_status("online"), DeviceStatus::Disconnected);
    }
}
