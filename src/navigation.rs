//! Navigation collaborator
//!
//! The router is external; the core only commands it to redirect.

use std::sync::Mutex;

/// Router commands issued by the core
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

/// Navigator that remembers every redirect, newest last
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.history.lock().ok().and_then(|h| h.last().cloned())
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, path: &str) {
        tracing::debug!("Redirect to {}", path);
        if let Ok(mut history) = self.history.lock() {
            history.push(path.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let navigator = RecordingNavigator::new();
        assert_eq!(navigator.last(), None);

        navigator.redirect("/requests");
        navigator.redirect("/requests/3");
        assert_eq!(navigator.history(), vec!["/requests", "/requests/3"]);
        assert_eq!(navigator.last().as_deref(), Some("/requests/3"));
    }
}
