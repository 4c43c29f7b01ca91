/**
 * TIMEOUT MONITOR - Détection périodique des devices silencieux
 *
 * RÔLE : Une seule boucle : dormir, demander un sweep au registry, notifier
 * chaque transition au collaborateur Notifier. Une erreur de cycle est loggée
 * puis suivie d'un backoff prolongé, jamais d'un crash de la boucle.
 */

use crate::config::TimeoutConf;
use crate::models::DeviceStatus;
use crate::registry::{DeviceRegistry, SharedDeviceRegistry};
use anyhow::Result;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Collaborateur consommé par le monitor : une notification par transition.
/// Les couches chat/HTTP s'y branchent pour alerter les opérateurs.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        device_id: &str,
        old_status: DeviceStatus,
        new_status: DeviceStatus,
        reason: &str,
    ) -> Result<()>;
}

/// Notifier par défaut du binaire : trace les transitions dans les logs.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        device_id: &str,
        old_status: DeviceStatus,
        new_status: DeviceStatus,
        reason: &str,
    ) -> Result<()> {
        warn!(
            "[monitor] {}: {} -> {} ({})",
            device_id, old_status, new_status, reason
        );
        Ok(())
    }
}

pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Interrompt le sleep en cours et attend la fin de la boucle. Un sweep
    /// déjà entamé se termine toujours (mutation + persistance en un appel).
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Un cycle : sweep puis notification de chaque transition.
async fn run_cycle(
    registry: &DeviceRegistry,
    notifier: &dyn Notifier,
    conf: &TimeoutConf,
) -> Result<usize> {
    let now = OffsetDateTime::now_utc();
    let changes = registry
        .sweep_timeouts(conf.heartbeat_timeout(), conf.status_timeout(), now)
        .await;
    let count = changes.len();
    for change in changes {
        notifier.notify(
            &change.device_id,
            change.old_status,
            change.new_status,
            change.reason.as_str(),
        )?;
    }
    Ok(count)
}

pub fn spawn_timeout_monitor(
    registry: SharedDeviceRegistry,
    notifier: Arc<dyn Notifier>,
    conf: TimeoutConf,
) -> MonitorHandle {
    let (stop, mut stopped) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(
            "[monitor] started (interval: {}s, heartbeat timeout: {}s)",
            conf.sweep_interval_secs, conf.heartbeat_timeout_secs
        );
        let mut wait = conf.sweep_interval();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stopped.changed() => {
                    info!("[monitor] stopping");
                    break;
                }
            }

            match run_cycle(&registry, notifier.as_ref(), &conf).await {
                Ok(0) => wait = conf.sweep_interval(),
                Ok(count) => {
                    info!("[monitor] disconnected {} silent devices", count);
                    wait = conf.sweep_interval();
                }
                Err(e) => {
                    error!(
                        "[monitor] sweep cycle failed: {}, backing off {}s",
                        e, conf.error_backoff_secs
                    );
                    wait = conf.error_backoff();
                }
            }
        }
    });

    MonitorHandle { stop, task }
}
