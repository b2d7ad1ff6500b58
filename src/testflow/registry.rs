use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// In-flight runs addressable by a caller-supplied run id, so a run started on
/// one request can be cancelled from another.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_generation: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `token` under `run_id` until the returned registration is dropped.
    /// Registering an id that is already in use replaces the older entry.
    pub fn register(self: &Arc<Self>, run_id: &str, token: CancellationToken) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.runs().insert(run_id.to_string(), (generation, token));
        Registration {
            registry: Arc::clone(self),
            run_id: run_id.to_string(),
            generation,
        }
    }

    /// Trigger cancellation of the run registered under `run_id`.
    /// Returns `false` if no such run is in flight.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.runs().get(run_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, run_id: &str) -> bool {
        self.runs().contains_key(run_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.runs().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.runs().is_empty()
    }
}

/// Removes its run from the registry on drop, unless a newer run has since
/// taken over the same id.
pub struct Registration {
    registry: Arc<RunRegistry>,
    run_id: String,
    generation: u64,
}

impl Registration {
    #[cfg(test)]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut runs = self.registry.runs();
        if runs.get(&self.run_id).is_some_and(|(generation, _)| *generation == self.generation) {
            runs.remove(&self.run_id);
        }
    }
}
