use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle partagé pour les ressources mutées hors contexte async (pas de `.await`
/// sous le verrou, sinon utiliser `tokio::sync::Mutex` comme dans le registry).
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Drapeau de session broker, lisible depuis tous les contextes.
#[derive(Clone, Default)]
pub struct ConnectedFlag(Arc<AtomicBool>);

impl ConnectedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
