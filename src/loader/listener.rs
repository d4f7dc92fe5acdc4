//! listener.rs
//! Queue-level lifecycle listeners.
//!
//! Callbacks run inline on the orchestrator or on the worker thread that
//! completed the round, so they must return quickly. A panicking listener is
//! caught and logged; it never takes the engine down.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{error, info};

use crate::error::LoaderError;

pub trait QueueListener: Send + Sync {
    fn on_start(&self, _queue: &str) {}

    fn on_pause(&self, _queue: &str) {}

    /// `error` is the first worker failure, if any.
    fn on_finish(&self, _queue: &str, _error: Option<&LoaderError>) {}
}

/// Logs every transition at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl QueueListener for LoggingListener {
    fn on_start(&self, queue: &str) {
        info!("[listener] queue '{queue}' started");
    }

    fn on_pause(&self, queue: &str) {
        info!("[listener] queue '{queue}' paused");
    }

    fn on_finish(&self, queue: &str, error: Option<&LoaderError>) {
        match error {
            Some(e) => info!("[listener] queue '{queue}' finished with error: {e}"),
            None => info!("[listener] queue '{queue}' finished"),
        }
    }
}

/// Call `f` on every listener, isolating panics.
pub(crate) fn notify_all<F>(listeners: &[Arc<dyn QueueListener>], queue: &str, event: &str, f: F)
where
    F: Fn(&dyn QueueListener),
{
    for listener in listeners {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
        if outcome.is_err() {
            error!("Listener of load queue '{queue}' failed during {event}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Exploding;

    impl QueueListener for Exploding {
        fn on_start(&self, _queue: &str) {
            panic!("listener bug");
        }
    }

    #[derive(Default)]
    struct Counting(AtomicU32);

    impl QueueListener for Counting {
        fn on_start(&self, _queue: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let counting = Arc::new(Counting::default());
        let listeners: Vec<Arc<dyn QueueListener>> =
            vec![Arc::new(Exploding), counting.clone(), Arc::new(LoggingListener)];
        notify_all(&listeners, "q", "start", |l| l.on_start("q"));
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
