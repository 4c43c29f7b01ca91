/**
 * RELAY KERNEL - Point d'entrée du contrôleur de flotte ESP
 *
 * RÔLE : Orchestration des modules : config, registry, MQTT, monitor, HTTP.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : Un registry unique possédé ici et passé par handle (Arc) aux
 * deux mutateurs (callbacks MQTT, sweep du monitor) et à l'API REST. Pas
 * d'état global ambiant.
 */

mod config;
mod errors;
mod http;
mod models;
mod monitor;
mod mqtt;
mod registry;
mod state;

use crate::http::AppState;
use crate::monitor::{spawn_timeout_monitor, LogNotifier, Notifier};
use crate::mqtt::MqttService;
use crate::registry::{DeviceRegistry, SharedDeviceRegistry};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let conf = config::load_config().await;

    // registry des devices, chargé depuis le fichier (défauts si absent/corrompu)
    let registry: SharedDeviceRegistry = Arc::new(DeviceRegistry::new(&conf.devices_file));
    registry.load().await;
    info!(
        "[kernel] tracking {} devices ({} connected)",
        registry.count().await,
        registry
            .count_by_status(crate::models::DeviceStatus::Connected)
            .await
    );

    // session broker : remplit le registry via les topics devices
    let mqtt = MqttService::new(registry.clone(), conf.mqtt.clone(), conf.tokens.clone());
    if let Err(e) = mqtt.clone().connect().await {
        error!("[kernel] MQTT connect failed: {}", e);
        std::process::exit(1);
    }

    // monitor des timeouts, notifie les transitions dans les logs
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let monitor = spawn_timeout_monitor(registry.clone(), notifier, conf.timeouts.clone());

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        registry: registry.clone(),
        mqtt: mqtt.clone(),
        conf: conf.clone(),
    };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], conf.http_port));
    info!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // arrêt ordonné : le sleep du monitor est interrompu, un sweep en cours
    // se termine, puis la session broker est libérée
    monitor.stop().await;
    mqtt.disconnect().await;
    registry.save().await;
    info!("[kernel] shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[kernel] failed to listen for ctrl-c: {}", e);
    }
}
