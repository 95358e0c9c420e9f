//! The four pluggable providers an `ExecutableGraph` may be attached to:
//! logging, persistence, notifications, and per-compute context. Each
//! ships an in-memory reference implementation so the engine is usable
//! without external wiring, mirroring `langgraph_core::store::Store`'s
//! trait-plus-`InMemoryStore` pairing.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, RwLock};

/// Log severities, widest to narrowest. `InputGuard` is a dedicated level
/// so sanitizer warnings can be filtered independently of ordinary
/// application logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    InputGuard,
}

#[async_trait]
pub trait LoggerProvider: Send + Sync {
    async fn log(&self, level: LogLevel, message: String);
}

/// Forwards to the `tracing` subscriber the host process has installed,
/// matching how the rest of the engine logs.
pub struct TracingLogger;

#[async_trait]
impl LoggerProvider for TracingLogger {
    async fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn | LogLevel::InputGuard => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Fatal => tracing::error!(fatal = true, "{message}"),
        }
    }
}

#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    async fn save_state(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn delete_state(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryPersistence {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryPersistence {
    async fn save_state(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete_state(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// A payload broadcast through `notify`/`broadcast`, delivered to every
/// live `subscribe`r of the matching topic (or every topic, for
/// `broadcast`).
#[derive(Debug, Clone)]
pub struct Notification {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn notify(&self, topic: &str, payload: serde_json::Value) -> Result<()>;
    async fn broadcast(&self, payload: serde_json::Value) -> Result<()>;
    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Notification>;
    /// Releases a subscription. A no-op for the broadcast-channel backed
    /// provider below: a subscriber unsubscribes simply by dropping its
    /// receiver, there's no server-side registry entry to remove.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

pub struct InMemoryNotifications {
    sender: broadcast::Sender<Notification>,
}

impl Default for InMemoryNotifications {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

impl InMemoryNotifications {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl NotificationProvider for InMemoryNotifications {
    async fn notify(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        let _ = self.sender.send(Notification {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn broadcast(&self, payload: serde_json::Value) -> Result<()> {
        let _ = self.sender.send(Notification {
            topic: "*".to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<()> {
        Ok(())
    }
}

/// Process-wide fallback logger, used by call sites with no per-engine
/// `LoggerProvider` attached. Set at most once; later calls to
/// `set_global_logger` are ignored, matching `ProviderSet`'s "attach before
/// use" contract at the process level instead of the engine level.
static GLOBAL_LOGGER: OnceLock<Arc<dyn LoggerProvider>> = OnceLock::new();

/// Installs the process-wide logger. Returns `Err` with the rejected
/// provider if one was already installed.
pub fn set_global_logger(logger: Arc<dyn LoggerProvider>) -> std::result::Result<(), Arc<dyn LoggerProvider>> {
    GLOBAL_LOGGER.set(logger)
}

/// The process-wide logger, or a `TracingLogger` if none was ever installed.
pub fn global_logger() -> Arc<dyn LoggerProvider> {
    GLOBAL_LOGGER
        .get_or_init(|| Arc::new(TracingLogger))
        .clone()
}

/// Per-compute context handed to a plugin alongside its config and inputs,
/// e.g. to read request-scoped values a host application injected.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context_for(&self, node_id: &str) -> Result<serde_json::Value>;
}

pub struct EmptyContext;

#[async_trait]
impl ContextProvider for EmptyContext {
    async fn context_for(&self, _node_id: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}

/// The set of providers an `ExecutableGraph` may have attached. Each slot
/// is `None` until a builder operator attaches one; methods that need a
/// provider fail with `ProviderNotRegistered` rather than panicking.
#[derive(Default)]
pub struct ProviderSet {
    pub logger: Option<Arc<dyn LoggerProvider>>,
    pub persistence: Option<Arc<dyn PersistenceProvider>>,
    pub notifications: Option<Arc<dyn NotificationProvider>>,
    pub context: Option<Arc<dyn ContextProvider>>,
}

impl ProviderSet {
    pub fn persistence(&self) -> Result<&Arc<dyn PersistenceProvider>> {
        self.persistence
            .as_ref()
            .ok_or(EngineError::ProviderNotRegistered { kind: "persistence" })
    }

    pub fn notifications(&self) -> Result<&Arc<dyn NotificationProvider>> {
        self.notifications
            .as_ref()
            .ok_or(EngineError::ProviderNotRegistered { kind: "notifications" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_persistence_round_trips() {
        let store = InMemoryPersistence::new();
        store.save_state("k", json!(1)).await.unwrap();
        assert_eq!(store.load_state("k").await.unwrap(), Some(json!(1)));
        store.delete_state("k").await.unwrap();
        assert_eq!(store.load_state("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_notifications_deliver_to_subscribers() {
        let notifications = InMemoryNotifications::new();
        let mut receiver = notifications.subscribe("topic").await;
        notifications.notify("topic", json!("hi")).await.unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.topic, "topic");
        assert_eq!(received.payload, json!("hi"));
    }

    #[tokio::test]
    async fn global_logger_is_callable_and_idempotently_installed() {
        // `GLOBAL_LOGGER` is process-wide, so this only exercises that the
        // accessor returns a usable logger and a second `set` is rejected
        // rather than panicking or replacing the first.
        let logger = global_logger();
        logger.log(LogLevel::Info, "probe".to_string()).await;
        assert!(set_global_logger(Arc::new(TracingLogger)).is_err());
    }

    #[tokio::test]
    async fn provider_set_reports_missing_provider() {
        let providers = ProviderSet::default();
        assert!(matches!(
            providers.persistence(),
            Err(EngineError::ProviderNotRegistered { kind: "persistence" })
        ));
    }
}
