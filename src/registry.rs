/**
 * DEVICE REGISTRY - Gestion de la flotte de contrôleurs embarqués
 *
 * RÔLE : Source de vérité des devices : connectivité, état relais, timestamps
 * d'activité. Persistance write-through : le fichier JSON ne diverge jamais de
 * la mémoire de plus d'une mutation.
 *
 * ARCHITECTURE : Map en mémoire sous un unique Mutex tokio qui couvre à la fois
 * la mutation et l'écriture disque. Les deux mutateurs concurrents (callbacks
 * MQTT et sweep du monitor) sont ainsi sérialisés.
 * UTILITÉ : Seul chemin de recovery après crash, et état consulté par l'API.
 */

use crate::errors::{KernelError, Result};
use crate::models::{
    ConnectionInfo, Device, DeviceStatus, DevicesMap, RelayState, StatusChange, TimeoutReason,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Serialize)]
struct DevicesFileOut<'a> {
    devices: Vec<&'a Device>,
}

/// Le fichier historique existe sous trois formes : enveloppe {devices: [...]},
/// liste nue, ou objet unique. Les trois se chargent, on réécrit en enveloppe.
#[derive(Deserialize)]
#[serde(untagged)]
enum DevicesFileIn {
    Envelope { devices: Vec<Device> },
    List(Vec<Device>),
    Single(Box<Device>),
}

pub struct DeviceRegistry {
    devices: Mutex<DevicesMap>,
    data_file: PathBuf,
}

pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

impl DeviceRegistry {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            data_file: data_file.into(),
        }
    }

    /// Charge le fichier de devices. Toute erreur de lecture ou de parse
    /// abandonne l'état partiel et installe le jeu de devices par défaut :
    /// le démarrage ne doit jamais échouer sur un fichier absent ou corrompu.
    pub async fn load(&self) {
        if !self.data_file.exists() {
            info!(
                "[registry] no devices file at {}, creating defaults",
                self.data_file.display()
            );
            self.install_defaults().await;
            return;
        }

        match self.try_load().await {
            Ok(count) => {
                info!(
                    "[registry] loaded {} devices from {}",
                    count,
                    self.data_file.display()
                );
            }
            Err(e) => {
                error!(
                    "[registry] failed to load {}: {}, creating defaults",
                    self.data_file.display(),
                    e
                );
                self.install_defaults().await;
            }
        }
    }

    async fn try_load(&self) -> Result<usize> {
        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let parsed: DevicesFileIn = serde_json::from_str(&content)?;
        let list = match parsed {
            DevicesFileIn::Envelope { devices } => devices,
            DevicesFileIn::List(devices) => devices,
            DevicesFileIn::Single(device) => vec![*device],
        };

        let mut map = self.devices.lock().await;
        map.clear();
        for device in list {
            map.insert(device.device.clone(), device);
        }
        Ok(map.len())
    }

    fn default_devices() -> Vec<Device> {
        (1..=3)
            .map(|i| Device {
                device: format!("esp-cdc-hrm-{i}"),
                status: DeviceStatus::Disconnected,
                relay_state: RelayState::Off,
                mqtt_topic: format!("esp-cdc-hrm-{i}"),
                last_seen: None,
                last_heartbeat: None,
            })
            .collect()
    }

    async fn install_defaults(&self) {
        let mut map = self.devices.lock().await;
        map.clear();
        for device in Self::default_devices() {
            map.insert(device.device.clone(), device);
        }
        self.persist_locked(&map).await;
    }

    /// Écrit la map complète sur disque, appelé sous le verrou par chaque
    /// mutation. Un échec d'écriture est loggé sans être propagé : la mémoire
    /// reste autoritaire jusqu'à la prochaine sauvegarde réussie.
    async fn persist_locked(&self, map: &DevicesMap) {
        let mut list: Vec<&Device> = map.values().collect();
        list.sort_by(|a, b| a.device.cmp(&b.device));
        let out = DevicesFileOut { devices: list };

        match serde_json::to_string_pretty(&out) {
            Ok(content) => {
                if let Err(e) = tokio::fs::write(&self.data_file, content).await {
                    error!(
                        "[registry] failed to write {}: {}",
                        self.data_file.display(),
                        e
                    );
                }
            }
            Err(e) => error!("[registry] failed to serialize devices: {}", e),
        }
    }

    /// Sauvegarde explicite de l'état courant (les mutateurs persistent déjà).
    pub async fn save(&self) {
        let map = self.devices.lock().await;
        self.persist_locked(&map).await;
    }

    pub async fn get(&self, id: &str) -> Option<Device> {
        self.devices.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Device> {
        let mut list: Vec<Device> = self.devices.lock().await.values().cloned().collect();
        list.sort_by(|a, b| a.device.cmp(&b.device));
        list
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.devices.lock().await.contains_key(id)
    }

    pub async fn count(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn count_by_status(&self, status: DeviceStatus) -> usize {
        self.devices
            .lock()
            .await
            .values()
            .filter(|d| d.status == status)
            .count()
    }

    /// Insère un nouveau device. Conflit explicite si l'id existe déjà.
    pub async fn add(&self, device: Device) -> Result<()> {
        let mut map = self.devices.lock().await;
        if map.contains_key(&device.device) {
            return Err(KernelError::DeviceExists(device.device));
        }
        info!("[registry] added device {}", device.device);
        map.insert(device.device.clone(), device);
        self.persist_locked(&map).await;
        Ok(())
    }

    /// Supprime un device ; no-op si absent.
    pub async fn remove(&self, id: &str) {
        let mut map = self.devices.lock().await;
        if map.remove(id).is_some() {
            info!("[registry] removed device {}", id);
            self.persist_locked(&map).await;
        }
    }

    /// Met à jour la connectivité. Rafraîchit toujours `last_seen` ; le
    /// heartbeat n'est rafraîchi que sur un vrai message de status
    /// (`refresh_heartbeat = false` pour les transitions dérivées).
    /// No-op si l'id est inconnu.
    pub async fn update_status(&self, id: &str, status: DeviceStatus, refresh_heartbeat: bool) {
        let now = OffsetDateTime::now_utc();
        let mut map = self.devices.lock().await;
        let Some(device) = map.get_mut(id) else {
            return;
        };
        device.status = status;
        device.last_seen = Some(now);
        if refresh_heartbeat {
            device.last_heartbeat = Some(now);
        }
        info!("[registry] {} status -> {}", id, status);
        self.persist_locked(&map).await;
    }

    /// Met à jour l'état relais et rafraîchit `last_seen`. No-op si inconnu.
    pub async fn update_relay(&self, id: &str, relay_state: RelayState) {
        let now = OffsetDateTime::now_utc();
        let mut map = self.devices.lock().await;
        let Some(device) = map.get_mut(id) else {
            return;
        };
        device.relay_state = relay_state;
        device.last_seen = Some(now);
        info!("[registry] {} relay -> {}", id, relay_state);
        self.persist_locked(&map).await;
    }

    /// Déconnecte les devices `connected` devenus silencieux :
    /// - heartbeat présent mais plus vieux que `heartbeat_timeout`
    /// - sinon, sans heartbeat, `last_seen` plus vieux que `status_timeout`
    /// - sinon, aucun timestamp du tout ("connected" sans preuve)
    /// Persiste une seule fois, uniquement si quelque chose a changé.
    pub async fn sweep_timeouts(
        &self,
        heartbeat_timeout: Duration,
        status_timeout: Duration,
        now: OffsetDateTime,
    ) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        let mut map = self.devices.lock().await;

        for device in map.values_mut() {
            if device.status != DeviceStatus::Connected {
                continue;
            }
            let reason = match (device.last_heartbeat, device.last_seen) {
                (Some(hb), _) if now - hb > heartbeat_timeout => {
                    Some(TimeoutReason::HeartbeatTimeout)
                }
                (Some(_), _) => None,
                (None, Some(seen)) if now - seen > status_timeout => {
                    Some(TimeoutReason::ActivityTimeout)
                }
                (None, Some(_)) => None,
                (None, None) => Some(TimeoutReason::NoEvidence),
            };
            if let Some(reason) = reason {
                device.status = DeviceStatus::Disconnected;
                warn!("[registry] {} timed out ({})", device.device, reason.as_str());
                changes.push(StatusChange {
                    device_id: device.device.clone(),
                    old_status: DeviceStatus::Connected,
                    new_status: DeviceStatus::Disconnected,
                    reason,
                });
            }
        }

        if !changes.is_empty() {
            self.persist_locked(&map).await;
        }
        changes
    }

    /// Détail de connectivité d'un device, avec âge de chaque timestamp et
    /// drapeau heartbeat en retard par rapport au seuil configuré.
    pub async fn connection_info(
        &self,
        id: &str,
        heartbeat_timeout: Duration,
        now: OffsetDateTime,
    ) -> Result<ConnectionInfo> {
        let map = self.devices.lock().await;
        let device = map
            .get(id)
            .ok_or_else(|| KernelError::DeviceNotFound(id.to_string()))?;

        let heartbeat_overdue = match device.last_heartbeat {
            Some(hb) => now - hb > heartbeat_timeout,
            // connected sans heartbeat = en retard par définition
            None => device.status == DeviceStatus::Connected,
        };

        Ok(ConnectionInfo {
            device_id: device.device.clone(),
            status: device.status,
            relay_state: device.relay_state,
            last_seen: device.last_seen,
            last_heartbeat: device.last_heartbeat,
            seconds_since_seen: device.last_seen.map(|t| (now - t).whole_seconds().max(0)),
            seconds_since_heartbeat: device
                .last_heartbeat
                .map(|t| (now - t).whole_seconds().max(0)),
            heartbeat_overdue,
        })
    }

    /// Devices dont `last_seen` dépasse le seuil, plus ceux marqués
    /// `connected` sans aucun `last_seen` (stale par définition).
    pub async fn stale_devices(&self, threshold: Duration, now: OffsetDateTime) -> Vec<Device> {
        let map = self.devices.lock().await;
        let mut list: Vec<Device> = map
            .values()
            .filter(|d| match d.last_seen {
                Some(seen) => now - seen > threshold,
                None => d.status == DeviceStatus::Connected,
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| a.device.cmp(&b.device));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn temp_file() -> PathBuf {
        std::env::temp_dir().join(format!("relay-kernel-test-{}.json", uuid::Uuid::new_v4()))
    }

    fn device(
        id: &str,
        status: DeviceStatus,
        last_seen: Option<OffsetDateTime>,
        last_heartbeat: Option<OffsetDateTime>,
    ) -> Device {
        Device {
            device: id.to_string(),
            status,
            relay_state: RelayState::Off,
            mqtt_topic: id.to_string(),
            last_seen,
            last_heartbeat,
        }
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let path = temp_file();
        let now = datetime!(2025-06-01 10:00:00 UTC);

        let registry = DeviceRegistry::new(&path);
        registry
            .add(device("d1", DeviceStatus::Connected, Some(now), Some(now)))
            .await
            .unwrap();
        registry
            .add(device("d2", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        let reloaded = DeviceRegistry::new(&path);
        reloaded.load().await;

        assert_eq!(reloaded.count().await, 2);
        let d1 = reloaded.get("d1").await.unwrap();
        assert_eq!(d1.status, DeviceStatus::Connected);
        assert_eq!(d1.relay_state, RelayState::Off);
        assert_eq!(d1.last_seen, Some(now));
        assert_eq!(d1.last_heartbeat, Some(now));
        let d2 = reloaded.get("d2").await.unwrap();
        assert_eq!(d2.last_seen, None);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_load_accepts_bare_list_and_single_object() {
        let path = temp_file();
        std::fs::write(
            &path,
            r#"[{"device":"a","status":"connected","relay_state":"on","mqtt_topic":"a"}]"#,
        )
        .unwrap();
        let registry = DeviceRegistry::new(&path);
        registry.load().await;
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.get("a").await.unwrap().last_seen, None);

        std::fs::write(
            &path,
            r#"{"device":"b","status":"disconnected","relay_state":"off","mqtt_topic":"b"}"#,
        )
        .unwrap();
        let registry = DeviceRegistry::new(&path);
        registry.load().await;
        assert_eq!(registry.count().await, 1);
        assert!(registry.exists("b").await);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_corrupt_file_installs_defaults() {
        let path = temp_file();
        std::fs::write(&path, "not json {{{").unwrap();

        let registry = DeviceRegistry::new(&path);
        registry.load().await;

        assert_eq!(registry.count().await, 3);
        assert!(registry.exists("esp-cdc-hrm-1").await);
        let d = registry.get("esp-cdc-hrm-1").await.unwrap();
        assert_eq!(d.status, DeviceStatus::Disconnected);
        assert_eq!(d.relay_state, RelayState::Off);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_file_installs_defaults_and_persists() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry.load().await;

        assert_eq!(registry.count().await, 3);
        // le jeu par défaut doit être retrouvable après redémarrage
        let reloaded = DeviceRegistry::new(&path);
        reloaded.load().await;
        assert_eq!(reloaded.count().await, 3);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_add_duplicate_rejected() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry
            .add(device("d1", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();
        let err = registry
            .add(device("d1", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::DeviceExists(id) if id == "d1"));
        assert_eq!(registry.count().await, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry.remove("ghost").await;
        assert_eq!(registry.count().await, 0);
        // rien n'a été persisté pour un no-op
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_update_status_refreshes_timestamps() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry
            .add(device("d1", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        registry
            .update_status("d1", DeviceStatus::Connected, true)
            .await;
        let d = registry.get("d1").await.unwrap();
        assert_eq!(d.status, DeviceStatus::Connected);
        assert!(d.last_seen.is_some());
        assert!(d.last_heartbeat.is_some());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_update_status_can_suppress_heartbeat() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry
            .add(device("d1", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        registry
            .update_status("d1", DeviceStatus::Connected, false)
            .await;
        let d = registry.get("d1").await.unwrap();
        assert!(d.last_seen.is_some());
        assert!(d.last_heartbeat.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_noop() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry
            .update_status("ghost", DeviceStatus::Connected, true)
            .await;
        registry.update_relay("ghost", RelayState::On).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_update_relay_idempotent_value() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry
            .add(device("d1", DeviceStatus::Connected, None, None))
            .await
            .unwrap();

        registry.update_relay("d1", RelayState::Off).await;
        let first = registry.get("d1").await.unwrap();
        registry.update_relay("d1", RelayState::Off).await;
        let second = registry.get("d1").await.unwrap();

        // même valeur : seul le timestamp d'activité bouge
        assert_eq!(first.relay_state, second.relay_state);
        assert_eq!(first.status, second.status);
        assert!(second.last_seen >= first.last_seen);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_sweep_timeout_rules() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let hb_timeout = Duration::seconds(120);
        let st_timeout = Duration::seconds(300);

        // heartbeat frais : reste connecté même avec last_seen ancien
        registry
            .add(device(
                "fresh-hb",
                DeviceStatus::Connected,
                Some(now - Duration::hours(2)),
                Some(now - Duration::seconds(30)),
            ))
            .await
            .unwrap();
        // heartbeat expiré
        registry
            .add(device(
                "old-hb",
                DeviceStatus::Connected,
                Some(now),
                Some(now - Duration::seconds(240)),
            ))
            .await
            .unwrap();
        // pas de heartbeat, activité expirée
        registry
            .add(device(
                "old-seen",
                DeviceStatus::Connected,
                Some(now - Duration::seconds(600)),
                None,
            ))
            .await
            .unwrap();
        // pas de heartbeat, activité fraîche
        registry
            .add(device(
                "fresh-seen",
                DeviceStatus::Connected,
                Some(now - Duration::seconds(10)),
                None,
            ))
            .await
            .unwrap();
        // aucun timestamp : "connected" sans preuve
        registry
            .add(device("no-evidence", DeviceStatus::Connected, None, None))
            .await
            .unwrap();
        // déjà déconnecté : jamais touché
        registry
            .add(device("already-off", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        let changes = registry.sweep_timeouts(hb_timeout, st_timeout, now).await;
        let mut changed: Vec<&str> = changes.iter().map(|c| c.device_id.as_str()).collect();
        changed.sort();
        assert_eq!(changed, vec!["no-evidence", "old-hb", "old-seen"]);

        for change in &changes {
            assert_eq!(change.old_status, DeviceStatus::Connected);
            assert_eq!(change.new_status, DeviceStatus::Disconnected);
        }
        assert_eq!(
            registry.get("fresh-hb").await.unwrap().status,
            DeviceStatus::Connected
        );
        assert_eq!(
            registry.get("fresh-seen").await.unwrap().status,
            DeviceStatus::Connected
        );
        assert_eq!(
            registry.get("old-hb").await.unwrap().status,
            DeviceStatus::Disconnected
        );

        // second sweep : plus rien à faire
        let changes = registry.sweep_timeouts(hb_timeout, st_timeout, now).await;
        assert!(changes.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_sweep_double_heartbeat_timeout_scenario() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let hb_timeout = Duration::seconds(120);

        registry
            .add(device(
                "d1",
                DeviceStatus::Connected,
                Some(now - hb_timeout * 2),
                Some(now - hb_timeout * 2),
            ))
            .await
            .unwrap();

        let changes = registry
            .sweep_timeouts(hb_timeout, Duration::seconds(300), now)
            .await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].device_id, "d1");
        assert_eq!(changes[0].new_status, DeviceStatus::Disconnected);
        assert_eq!(changes[0].reason, TimeoutReason::HeartbeatTimeout);
        assert_eq!(
            registry.get("d1").await.unwrap().status,
            DeviceStatus::Disconnected
        );

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_stale_devices() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        let now = datetime!(2025-06-01 12:00:00 UTC);

        registry
            .add(device(
                "d2",
                DeviceStatus::Connected,
                Some(now - Duration::seconds(120)),
                None,
            ))
            .await
            .unwrap();
        registry
            .add(device(
                "fresh",
                DeviceStatus::Connected,
                Some(now - Duration::seconds(5)),
                None,
            ))
            .await
            .unwrap();
        registry
            .add(device("never-seen", DeviceStatus::Connected, None, None))
            .await
            .unwrap();
        registry
            .add(device("offline", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        let stale = registry.stale_devices(Duration::seconds(60), now).await;
        let ids: Vec<&str> = stale.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(ids, vec!["d2", "never-seen"]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_connection_info() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        let now = datetime!(2025-06-01 12:00:00 UTC);

        registry
            .add(device(
                "d1",
                DeviceStatus::Connected,
                Some(now - Duration::seconds(30)),
                Some(now - Duration::seconds(240)),
            ))
            .await
            .unwrap();

        let info = registry
            .connection_info("d1", Duration::seconds(120), now)
            .await
            .unwrap();
        assert_eq!(info.status, DeviceStatus::Connected);
        assert_eq!(info.seconds_since_seen, Some(30));
        assert_eq!(info.seconds_since_heartbeat, Some(240));
        assert!(info.heartbeat_overdue);

        let err = registry
            .connection_info("ghost", Duration::seconds(120), now)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::DeviceNotFound(_)));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let path = temp_file();
        let registry = DeviceRegistry::new(&path);
        registry
            .add(device("a", DeviceStatus::Connected, None, None))
            .await
            .unwrap();
        registry
            .add(device("b", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();
        registry
            .add(device("c", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        assert_eq!(registry.count_by_status(DeviceStatus::Connected).await, 1);
        assert_eq!(
            registry.count_by_status(DeviceStatus::Disconnected).await,
            2
        );

        let _ = std::fs::remove_file(&path);
    }

    // Martèle update_status et sweep_timeouts sur le même id depuis deux
    // contextes : la map ne doit jamais se corrompre ni perdre de device.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_and_sweeps() {
        let path = temp_file();
        let registry = Arc::new(DeviceRegistry::new(&path));
        registry
            .add(device("d1", DeviceStatus::Connected, None, None))
            .await
            .unwrap();
        registry
            .add(device("other", DeviceStatus::Disconnected, None, None))
            .await
            .unwrap();

        let updater = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    registry
                        .update_status("d1", DeviceStatus::Connected, true)
                        .await;
                }
            })
        };
        let sweeper = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    registry
                        .sweep_timeouts(
                            Duration::seconds(0),
                            Duration::seconds(0),
                            OffsetDateTime::now_utc() + Duration::seconds(60),
                        )
                        .await;
                }
            })
        };

        updater.await.unwrap();
        sweeper.await.unwrap();

        assert_eq!(registry.count().await, 2);
        let d1 = registry.get("d1").await.unwrap();
        assert!(d1.last_seen.is_some());
        assert!(registry.exists("other").await);

        // le fichier reflète un état cohérent
        let reloaded = DeviceRegistry::new(&path);
        reloaded.load().await;
        assert_eq!(reloaded.count().await, 2);

        let _ = std::fs::remove_file(&path);
    }
}
