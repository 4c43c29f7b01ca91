use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Connected => "connected",
            DeviceStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    /// Payload MQTT envoyé sur `{id}/relay/set`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entité device, format identique au fichier de persistance.
/// Les timestamps sont absents pour un device jamais vu depuis le bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device: String,
    pub status: DeviceStatus,
    pub relay_state: RelayState,
    pub mqtt_topic: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_heartbeat: Option<OffsetDateTime>,
}

pub type DevicesMap = HashMap<String, Device>;

/// Événement typé produit par le routage des messages MQTT entrants,
/// découplé du transport pour rester testable sans broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Status { device_id: String, status: DeviceStatus },
    Relay { device_id: String, state: RelayState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    HeartbeatTimeout,
    ActivityTimeout,
    NoEvidence,
}

impl TimeoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutReason::HeartbeatTimeout => "heartbeat timeout",
            TimeoutReason::ActivityTimeout => "activity timeout",
            TimeoutReason::NoEvidence => "connected without evidence",
        }
    }
}

/// Transition appliquée par un sweep de timeouts.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub device_id: String,
    pub old_status: DeviceStatus,
    pub new_status: DeviceStatus,
    pub reason: TimeoutReason,
}

/// Vue détaillée de la connectivité d'un device (requête collaborateurs).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub device_id: String,
    pub status: DeviceStatus,
    pub relay_state: RelayState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_heartbeat: Option<OffsetDateTime>,
    pub seconds_since_seen: Option<i64>,
    pub seconds_since_heartbeat: Option<i64>,
    pub heartbeat_overdue: bool,
}

/// État courant de la session broker.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub subscribed_topics: usize,
}
