//! Where a controller keeps its assigned player number between page loads.

use parking_lot::Mutex;

/// Persistence for the player number a host assigned. The client saves it on
/// every sync, so a reloaded page can show the number before the host
/// confirms it again.
pub trait PlayerNumberStore: Send + Sync {
    /// The last saved number, if any.
    fn load(&self) -> Option<u32>;
    /// Replace the stored number.
    fn save(&self, player_number: u32);
    /// Forget the stored number. Clearing an empty store is a no-op.
    fn clear(&self);
}

/// Process-local store. Forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    value: Mutex<Option<u32>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerNumberStore for MemoryStore {
    fn load(&self) -> Option<u32> {
        *self.value.lock()
    }

    fn save(&self, player_number: u32) {
        *self.value.lock() = Some(player_number);
    }

    fn clear(&self) {
        *self.value.lock() = None;
    }
}
