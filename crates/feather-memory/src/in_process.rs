use crate::manager::{MemoryTurn, RawSessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory [`RawSessionStore`] — a flat `Vec<MemoryTurn>` per session
/// behind a single mutex. The reference backend for tests and embedders
/// that don't need cross-restart persistence.
#[derive(Default)]
pub struct InProcessStore {
    sessions: Mutex<HashMap<String, Vec<MemoryTurn>>>,
}

impl InProcessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawSessionStore for InProcessStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Vec<MemoryTurn>> {
        Ok(self
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(&self, session_id: &str, turns: Vec<MemoryTurn>) -> anyhow::Result<()> {
        self.sessions.lock().await.insert(session_id.to_string(), turns);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.sessions.lock().await.remove(session_id);
        Ok(())
    }
}
