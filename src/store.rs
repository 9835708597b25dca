//! Shared snapshot store with subscriber broadcast
//!
//! The application keeps small shared sets (bookmarked article keys, liked
//! article keys) that several components observe. Instead of a module-level
//! singleton behind implicit global state, this is an explicit store object
//! owned by a single instance and injected into whatever needs it: lazy-load
//! once, then broadcast every mutation to all subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Explicit shared store: `snapshot` / `subscribe` / `mutate`
///
/// Cloning the store clones a handle to the same underlying state. Values
/// are broadcast by clone, so `T` should be cheap to clone (key sets,
/// small maps).
#[derive(Clone, Debug)]
pub struct SharedStore<T: Clone + Send + Sync + 'static> {
    tx: Arc<watch::Sender<T>>,
    loaded: Arc<AtomicBool>,
}

impl<T: Clone + Send + Sync + 'static> SharedStore<T> {
    /// Create a store seeded with an initial value
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current value of the store
    pub fn get_snapshot(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Subscribe to the store; the receiver observes the current value and
    /// every subsequent mutation
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Mutate the value in place and broadcast the result to all subscribers
    pub fn mutate(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Run the loader at most once, replacing the seed value with its result
    ///
    /// Later calls return immediately without invoking the loader; a failed
    /// load leaves the store unloaded so the next call retries.
    pub async fn load_once<F, Fut, E>(&self, loader: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if self.loaded.load(Ordering::SeqCst) {
            return Ok(());
        }
        let value = loader().await?;
        // A racing loader may have won; last write wins, which is acceptable
        // for a lazily-populated cache.
        self.loaded.store(true, Ordering::SeqCst);
        self.tx.send_replace(value);
        Ok(())
    }

    /// Whether the loader has completed successfully
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}
