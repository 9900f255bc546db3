//! Navigation side effect.
//!
//! The host (webview shell, desktop wrapper, test harness) decides what a
//! full-page navigation means. Any `Fn(&str) + Send + Sync` closure works.

/// Sends the browsing context to a new URL.
pub trait Navigator: Send + Sync {
    /// Navigate to `url`, exactly as given.
    fn navigate(&self, url: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, url: &str) {
        self(url)
    }
}

/// Recording navigator for tests.
#[cfg(any(test, feature = "test-entitlements"))]
pub mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Remembers every navigation in order.
    #[derive(Clone, Default)]
    pub struct RecordingNavigator {
        visits: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNavigator {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn visits(&self) -> Vec<String> {
            self.visits.lock().unwrap().clone()
        }

        /// Where the browsing context ended up: the last navigation.
        #[must_use]
        pub fn current(&self) -> Option<String> {
            self.visits.lock().unwrap().last().cloned()
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, url: &str) {
            self.visits.lock().unwrap().push(url.to_string());
        }
    }
}
