//! handler.rs
//! Per-caller bookkeeping of named load queues.
//!
//! A `QueueHandler` owns every queue one caller scheduled, keyed by name.
//! FINISHED queues are purged before each operation, so a name can be reused
//! once its previous queue is done. `HandlerRegistry` hands out one handler
//! per caller id.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use log::{info, warn};

use super::{QueueLoader, state::QueueState};
use crate::error::LoaderError;

#[derive(Default)]
pub struct QueueHandler {
    queues: DashMap<String, Arc<dyn QueueLoader>>,
}

impl QueueHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `queue` and keep it under its name.
    pub fn schedule_queue<Q>(&self, queue: Q, synchronized_iterations: bool) -> Result<(), LoaderError>
    where
        Q: QueueLoader + 'static,
    {
        self.cleanup_finished_queues();

        match self.queues.entry(queue.name().to_string()) {
            Entry::Occupied(existing) => Err(LoaderError::QueueAlreadyExists {
                name: existing.key().clone(),
                state: existing.get().state(),
            }),
            Entry::Vacant(slot) => {
                queue.schedule(synchronized_iterations)?;
                info!("Scheduled queue '{}'", slot.key());
                slot.insert(Arc::new(queue));
                Ok(())
            }
        }
    }

    /// Schedule without synchronized iterations, then start.
    pub fn execute_queue<Q>(&self, queue: Q) -> Result<(), LoaderError>
    where
        Q: QueueLoader + 'static,
    {
        let name = queue.name().to_string();
        self.schedule_queue(queue, false)?;
        self.start_queue(&name)
    }

    pub fn start_queue(&self, name: &str) -> Result<(), LoaderError> {
        self.cleanup_finished_queues();
        let queue = self.get(name)?;
        info!("Starting queue '{name}'");
        queue.start()
    }

    pub fn resume_queue(&self, name: &str) -> Result<(), LoaderError> {
        self.cleanup_finished_queues();
        self.get(name)?.resume()
    }

    pub fn cancel_queue(&self, name: &str) {
        if let Some(queue) = self.lookup(name) {
            queue.cancel();
            info!("Cancelled execution of queue '{name}'");
        }
        self.cleanup_finished_queues();
    }

    pub fn cancel_all_queues(&self) {
        for queue in self.snapshot() {
            queue.cancel();
            info!("Cancelled execution of queue '{}'", queue.name());
        }
        self.cleanup_finished_queues();
    }

    /// A missing queue is only worth a warning here.
    pub fn wait_until_queue_finish(&self, name: &str) {
        match self.lookup(name) {
            Some(queue) => {
                queue.wait_until_finished();
                self.cleanup_finished_queues();
            }
            None => warn!(
                "We will not wait for queue with name '{name}' to finish as such queue is not present"
            ),
        }
    }

    pub fn wait_until_all_queues_finish(&self) {
        for queue in self.snapshot() {
            queue.wait_until_finished();
        }
        self.cleanup_finished_queues();
    }

    /// `true` if the queue paused, `false` if it finished instead.
    pub fn wait_until_queue_paused(&self, name: &str) -> Result<bool, LoaderError> {
        Ok(self.get(name)?.wait_until_paused())
    }

    pub fn running_queues_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|q| q.state() == QueueState::Running)
            .count()
    }

    /// Known to this handler and not yet purged.
    pub fn is_queue_present(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn queue_state(&self, name: &str) -> Option<QueueState> {
        self.lookup(name).map(|q| q.state())
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn cleanup_finished_queues(&self) {
        self.queues.retain(|_, q| q.state() != QueueState::Finished);
    }

    // clone out of the map so no shard lock is held while blocking
    fn lookup(&self, name: &str) -> Option<Arc<dyn QueueLoader>> {
        self.queues.get(name).map(|q| q.value().clone())
    }

    fn get(&self, name: &str) -> Result<Arc<dyn QueueLoader>, LoaderError> {
        self.lookup(name)
            .ok_or_else(|| LoaderError::NoSuchQueue(name.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<dyn QueueLoader>> {
        self.queues.iter().map(|e| e.value().clone()).collect()
    }
}

/// One `QueueHandler` per caller.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<QueueHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The caller's handler, created on first use.
    pub fn handler(&self, caller: &str) -> Arc<QueueHandler> {
        self.handlers
            .entry(caller.to_string())
            .or_insert_with(|| Arc::new(QueueHandler::new()))
            .clone()
    }

    /// Cancel everything the caller still runs and forget the caller.
    pub fn cancel_all_queues_from(&self, caller: &str) {
        if let Some((_, handler)) = self.handlers.remove(caller) {
            handler.cancel_all_queues();
            let remaining = handler.queue_names();
            if !remaining.is_empty() {
                warn!("Remaining queues from caller [{caller}]: {remaining:?}");
            }
        }
    }

    pub fn callers(&self) -> Vec<String> {
        let mut callers: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        callers.sort();
        callers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Loader stand-in that just walks the state machine.
    struct Scripted {
        name: String,
        state: Mutex<QueueState>,
    }

    impl Scripted {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                state: Mutex::new(QueueState::NotStarted),
            }
        }
    }

    impl QueueLoader for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn state(&self) -> QueueState {
            *self.state.lock()
        }

        fn schedule(&self, _synchronized_iterations: bool) -> Result<(), LoaderError> {
            *self.state.lock() = QueueState::Scheduled;
            Ok(())
        }

        fn start(&self) -> Result<(), LoaderError> {
            *self.state.lock() = QueueState::Running;
            Ok(())
        }

        fn resume(&self) -> Result<(), LoaderError> {
            *self.state.lock() = QueueState::Running;
            Ok(())
        }

        fn cancel(&self) {
            *self.state.lock() = QueueState::Finished;
        }

        fn wait_until_finished(&self) {}

        fn wait_until_paused(&self) -> bool {
            *self.state.lock() == QueueState::Paused
        }
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let handler = QueueHandler::new();
        handler.schedule_queue(Scripted::new("q"), false).unwrap();
        let err = handler.schedule_queue(Scripted::new("q"), false).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::QueueAlreadyExists {
                state: QueueState::Scheduled,
                ..
            }
        ));
    }

    #[test]
    fn test_finished_queue_frees_its_name() {
        let handler = QueueHandler::new();
        handler.execute_queue(Scripted::new("q")).unwrap();
        assert_eq!(handler.running_queues_count(), 1);
        handler.cancel_queue("q");
        assert!(!handler.is_queue_present("q"));
        handler.schedule_queue(Scripted::new("q"), false).unwrap();
        assert!(handler.is_queue_present("q"));
    }

    #[test]
    fn test_unknown_queue() {
        let handler = QueueHandler::new();
        assert!(matches!(
            handler.start_queue("nope"),
            Err(LoaderError::NoSuchQueue(_))
        ));
        assert!(handler.wait_until_queue_paused("nope").is_err());
        handler.wait_until_queue_finish("nope");
    }

    #[test]
    fn test_registry_per_caller() {
        let registry = HandlerRegistry::new();
        let a = registry.handler("10.0.0.1");
        a.schedule_queue(Scripted::new("q"), false).unwrap();
        let b = registry.handler("10.0.0.2");
        b.schedule_queue(Scripted::new("q"), false).unwrap();
        assert!(Arc::ptr_eq(&a, &registry.handler("10.0.0.1")));
        assert_eq!(registry.callers(), vec!["10.0.0.1", "10.0.0.2"]);

        registry.cancel_all_queues_from("10.0.0.1");
        assert_eq!(a.running_queues_count(), 0);
        assert!(!a.is_queue_present("q"));
        assert_eq!(registry.callers(), vec!["10.0.0.2"]);
    }
}
