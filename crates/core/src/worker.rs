//! # Memory Worker
//!
//! Async front for [`MemoryManager`]. Every call runs on tokio's blocking
//! pool so database round trips never stall the scheduler, and a semaphore
//! caps how many run at once.

use crate::error::{MemoryError, Result};
use crate::manager::MemoryManager;
use crate::memory::contract::ChatMessage;
use crate::registry::ModuleSummary;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default number of concurrent blocking calls
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Cloneable handle; clones share the manager and the permit pool
#[derive(Clone)]
pub struct MemoryWorker {
    manager: Arc<MemoryManager>,
    permits: Arc<Semaphore>,
}

impl MemoryWorker {
    pub fn new(manager: Arc<MemoryManager>, max_concurrent: usize) -> Self {
        Self {
            manager,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    /// Stop accepting calls; in-flight calls finish normally
    pub fn close(&self) {
        self.permits.close();
    }

    async fn run<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&MemoryManager) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| MemoryError::Worker(e.to_string()))?;
        let manager = Arc::clone(&self.manager);

        tokio::task::spawn_blocking(move || {
            let _permit = permit; // Held until the call returns
            call(&manager)
        })
        .await
        .map_err(|e| MemoryError::Worker(format!("memory task failed: {}", e)))?
    }

    pub async fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()> {
        let (role, content, session) = (role.to_string(), content.to_string(), session.to_string());
        self.run(move |m| m.add_message(&role, &content, &session))
            .await
    }

    pub async fn get_messages(&self, session: &str) -> Result<Vec<ChatMessage>> {
        let session = session.to_string();
        self.run(move |m| m.get_messages(&session)).await
    }

    pub async fn clear(&self, session: &str) -> Result<()> {
        let session = session.to_string();
        self.run(move |m| m.clear(&session)).await
    }

    pub async fn get_context_string(&self, session: &str) -> Result<String> {
        let session = session.to_string();
        self.run(move |m| m.get_context_string(&session)).await
    }

    /// May construct a backend (and open its database), so it is offloaded too
    pub async fn set_active_module(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |m| m.set_active_module(&id)).await
    }

    pub fn active_module_id(&self) -> Option<String> {
        self.manager.active_module_id()
    }

    pub fn list_modules(&self) -> Vec<ModuleSummary> {
        self.manager.list_modules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InMemoryConfig, ACTIVE_MODULE_KEY, DATABASE_URL_KEY};

    fn worker(active: &str) -> MemoryWorker {
        let config = Arc::new(
            InMemoryConfig::new()
                .with(DATABASE_URL_KEY, ":memory:")
                .with(ACTIVE_MODULE_KEY, active),
        );
        MemoryWorker::new(Arc::new(MemoryManager::new(config)), 2)
    }

    #[tokio::test]
    async fn test_contract_through_worker() {
        let worker = worker("stm_prp");

        worker.add_message("user", "hello", "s").await.unwrap();
        worker.add_message("assistant", "hi there", "s").await.unwrap();

        assert_eq!(
            worker.get_context_string("s").await.unwrap(),
            "user: hello\nassistant: hi there"
        );

        worker.clear("s").await.unwrap();
        assert!(worker.get_messages("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_do_not_interfere() {
        let worker = worker("stm_eth");

        let mut handles = Vec::new();
        for n in 0..8 {
            let worker = worker.clone();
            handles.push(tokio::spawn(async move {
                let session = format!("session-{}", n);
                for i in 0..5 {
                    worker
                        .add_message("user", &format!("{}-{}", n, i), &session)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for n in 0..8 {
            let messages = worker.get_messages(&format!("session-{}", n)).await.unwrap();
            let contents: Vec<String> = messages.into_iter().map(|m| m.content).collect();
            let expected: Vec<String> = (0..5).map(|i| format!("{}-{}", n, i)).collect();
            assert_eq!(contents, expected);
        }
    }

    #[tokio::test]
    async fn test_switch_through_worker() {
        let worker = worker("stm_eth");
        assert!(worker.set_active_module("nope").await.is_err());
        assert_eq!(worker.active_module_id().as_deref(), Some("stm_eth"));

        worker.set_active_module("utm_anyai").await.unwrap();
        worker
            .add_message("user", "tell me about memory", "s")
            .await
            .unwrap();
        let context = worker.get_context_string("s").await.unwrap();
        assert!(context.starts_with("system: Topic: Memory Architecture"));
    }

    #[tokio::test]
    async fn test_closed_worker_rejects_calls() {
        let worker = worker("stm_eth");
        worker.close();

        let err = worker.get_messages("s").await.unwrap_err();
        assert!(matches!(err, MemoryError::Worker(_)));
    }

    #[tokio::test]
    async fn test_panicking_call_becomes_worker_error() {
        let worker = worker("stm_eth");
        let result: Result<()> = worker.run(|_| panic!("backend blew up")).await;
        assert!(matches!(result, Err(MemoryError::Worker(_))));

        // Permit was released
        worker.add_message("user", "still alive", "s").await.unwrap();
    }

    #[test]
    fn test_sync_host_can_drive_worker() {
        let worker = worker("stm_eth");
        assert_eq!(worker.list_modules().len(), 4);

        let context = tokio_test::block_on(async {
            worker.add_message("user", "sync host", "s").await.unwrap();
            worker.get_context_string("s").await.unwrap()
        });
        assert_eq!(context, "user: sync host");
    }
}
