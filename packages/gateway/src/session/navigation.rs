// packages/gateway/src/session/navigation.rs
//! Navigation seam for sign-in redirects

use parking_lot::RwLock;
use tracing::info;

/// Something that knows the current location and can move away from it
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    fn navigate(&self, path: &str);
}

/// In-memory location with a navigation history
pub struct LocationState {
    current: RwLock<String>,
    history: RwLock<Vec<String>>,
}

impl LocationState {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(initial.into()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Every path navigated to, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history.read().clone()
    }
}

impl Default for LocationState {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for LocationState {
    fn current_path(&self) -> String {
        self.current.read().clone()
    }

    fn navigate(&self, path: &str) {
        info!("Navigating to {}", path);
        *self.current.write() = path.to_string();
        self.history.write().push(path.to_string());
    }
}
