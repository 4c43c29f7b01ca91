/**
 * MQTT SERVICE - Pont entre le registry et le broker publish/subscribe
 *
 * RÔLE : Session broker unique du kernel. Abonne les topics de chaque device
 * enregistré, route les messages entrants vers le registry, publie les
 * commandes relais.
 *
 * ARCHITECTURE : AsyncClient rumqttc + task de polling de l'event loop.
 * Le routage (topic, payload) -> événement typé est une fonction pure,
 * testable sans broker. Reconnexion gérée par rumqttc au poll suivant.
 */

use crate::config::{MqttConf, TokenConf};
use crate::errors::{KernelError, Result};
use crate::models::{ConnectionStatus, InboundEvent, RelayState};
use crate::registry::SharedDeviceRegistry;
use crate::state::{new_state, ConnectedFlag, Shared};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Routage pur d'un message entrant. Suffixe `/status` ou `/relay/state`,
/// le reste du topic est l'id du device. Tout autre topic est ignoré.
pub fn route_message(topic: &str, payload: &str, tokens: &TokenConf) -> Option<InboundEvent> {
    if let Some(device_id) = topic.strip_suffix("/status") {
        Some(InboundEvent::Status {
            device_id: device_id.to_string(),
            status: tokens.classify_status(payload),
        })
    } else if let Some(device_id) = topic.strip_suffix("/relay/state") {
        Some(InboundEvent::Relay {
            device_id: device_id.to_string(),
            state: tokens.classify_relay(payload),
        })
    } else {
        None
    }
}

/// (Ré)abonne les deux topics de chaque device enregistré, appelé à chaque
/// ConnAck pour couvrir les reconnexions.
async fn subscribe_all(client: &AsyncClient, registry: &SharedDeviceRegistry) -> Result<()> {
    let devices = registry.list().await;
    for device in &devices {
        client
            .subscribe(format!("{}/status", device.device), QoS::AtLeastOnce)
            .await?;
        client
            .subscribe(format!("{}/relay/state", device.device), QoS::AtLeastOnce)
            .await?;
    }
    info!("[mqtt] subscribed to topics for {} devices", devices.len());
    Ok(())
}

pub struct MqttService {
    registry: SharedDeviceRegistry,
    conf: MqttConf,
    tokens: TokenConf,
    connected: ConnectedFlag,
    client: Shared<Option<AsyncClient>>,
    listener: Shared<Option<JoinHandle<()>>>,
}

impl MqttService {
    pub fn new(registry: SharedDeviceRegistry, conf: MqttConf, tokens: TokenConf) -> Arc<Self> {
        Arc::new(Self {
            registry,
            conf,
            tokens,
            connected: ConnectedFlag::new(),
            client: new_state(None),
            listener: new_state(None),
        })
    }

    /// Établit la session broker et démarre la task de polling. Le premier
    /// poll est attendu ici : un broker injoignable fait échouer cette
    /// tentative, la politique de retry appartient à l'appelant.
    pub async fn connect(self: Arc<Self>) -> Result<()> {
        let mut opts = MqttOptions::new(&self.conf.client_id, &self.conf.host, self.conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        if let (Some(user), Some(pass)) = (&self.conf.username, &self.conf.password) {
            opts.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        *self.client.lock() = Some(client);
        info!(
            "[mqtt] connecting to {}:{} as {}",
            self.conf.host, self.conf.port, self.conf.client_id
        );

        match eventloop.poll().await {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                *self.client.lock() = None;
                return Err(KernelError::Connect(e));
            }
        }

        let service = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => service.handle_event(event).await,
                    Err(e) => {
                        service.connected.set(false);
                        error!("[mqtt] event loop error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
        *self.listener.lock() = Some(handle);
        Ok(())
    }

    /// Arrête le polling et libère la session. Idempotent.
    pub async fn disconnect(&self) {
        let client = self.client.lock().take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!("[mqtt] disconnect: {}", e);
            }
            info!("[mqtt] disconnected");
        }
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.connected.set(false);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn client_handle(&self) -> Result<AsyncClient> {
        self.client.lock().clone().ok_or(KernelError::NotConnected)
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Incoming::ConnAck(_)) => {
                self.connected.set(true);
                info!("[mqtt] connected to {}:{}", self.conf.host, self.conf.port);
                // dans une task : les requêtes subscribe ne sont drainées que
                // par le poll de l'event loop, jamais bloquer le poll dessus
                let Ok(client) = self.client_handle() else {
                    return;
                };
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    if let Err(e) = subscribe_all(&client, &registry).await {
                        error!("[mqtt] failed to subscribe device topics: {}", e);
                    }
                });
            }
            Event::Incoming(Incoming::Publish(publish)) => {
                let topic = publish.topic.clone();
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => self.handle_message(&topic, payload.trim()).await,
                    Err(_) => debug!("[mqtt] non-utf8 payload on {}, discarded", topic),
                }
            }
            Event::Incoming(Incoming::Disconnect) => {
                self.connected.set(false);
                warn!("[mqtt] broker closed the session");
            }
            _ => {}
        }
    }

    /// Route un message entrant et applique la mutation correspondante.
    /// Un id inconnu est loggé puis jeté ; une valeur inchangée ne déclenche
    /// pas de persistance redondante.
    async fn handle_message(&self, topic: &str, payload: &str) {
        match route_message(topic, payload, &self.tokens) {
            Some(InboundEvent::Status { device_id, status }) => {
                let Some(current) = self.registry.get(&device_id).await else {
                    warn!("[mqtt] status for unknown device {}", device_id);
                    return;
                };
                if current.status != status {
                    info!("[mqtt] {} status {} -> {}", device_id, current.status, status);
                    self.registry.update_status(&device_id, status, true).await;
                }
            }
            Some(InboundEvent::Relay { device_id, state }) => {
                let Some(current) = self.registry.get(&device_id).await else {
                    warn!("[mqtt] relay state for unknown device {}", device_id);
                    return;
                };
                if current.relay_state != state {
                    info!(
                        "[mqtt] {} relay {} -> {}",
                        device_id, current.relay_state, state
                    );
                    self.registry.update_relay(&device_id, state).await;
                }
            }
            None => debug!("[mqtt] unhandled topic {}", topic),
        }
    }

    pub async fn subscribe_device(&self, id: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(KernelError::NotConnected);
        }
        let client = self.client_handle()?;
        client
            .subscribe(format!("{id}/status"), QoS::AtLeastOnce)
            .await?;
        client
            .subscribe(format!("{id}/relay/state"), QoS::AtLeastOnce)
            .await?;
        info!("[mqtt] subscribed to topics for {}", id);
        Ok(())
    }

    pub async fn unsubscribe_device(&self, id: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(KernelError::NotConnected);
        }
        let client = self.client_handle()?;
        client.unsubscribe(format!("{id}/status")).await?;
        client.unsubscribe(format!("{id}/relay/state")).await?;
        info!("[mqtt] unsubscribed from topics for {}", id);
        Ok(())
    }

    /// Publie une commande relais sur `{id}/relay/set` (QoS at-least-once),
    /// puis applique la mise à jour locale OPTIMISTE : le registry reflète
    /// l'état commandé dès la remise au transport, avant toute confirmation
    /// du device. Le feedback `relay/state` réconcilie ensuite si besoin.
    pub async fn publish_relay_control(&self, id: &str, state: RelayState) -> Result<()> {
        if !self.is_connected() {
            return Err(KernelError::NotConnected);
        }
        let client = self.client_handle()?;
        let topic = format!("{id}/relay/set");
        client
            .publish(&topic, QoS::AtLeastOnce, false, state.as_str())
            .await?;
        info!("[mqtt] published relay command {} -> {}", topic, state);
        self.registry.update_relay(id, state).await;
        Ok(())
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let connected = self.is_connected();
        ConnectionStatus {
            connected,
            broker_host: self.conf.host.clone(),
            broker_port: self.conf.port,
            subscribed_topics: if connected {
                self.registry.count().await * 2
            } else {
                0
            },
        }
    }
}
