use thiserror::Error;

/// Erreurs typées exposées aux collaborateurs (API REST, bot).
/// Aucune opération ne réussit silencieusement si son effet n'a pas eu lieu.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device already exists: {0}")]
    DeviceExists(String),

    #[error("MQTT client not connected")]
    NotConnected,

    #[error("MQTT client error: {0}")]
    Bus(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connect(#[from] rumqttc::ConnectionError),

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;
