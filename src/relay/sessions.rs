// ABOUTME: In-memory session table mapping relay session ids to a Coder and its thread
// ABOUTME: Creation builds the Coder from the registry and starts a thread before inserting
use chrono::{DateTime, Utc};
use coder_agent::{AdapterRegistry, Coder, Result, StartOpts, ThreadHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::metrics;

/// One relay session: a started thread on one coder
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub provider: String,
    pub coder: Coder,
    pub thread: ThreadHandle,
    pub created_at: DateTime<Utc>,
}

/// Process-wide session table. Clones share the same table.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `provider`.
    ///
    /// Unknown providers fail with a configuration-class error before anything is stored.
    pub async fn create(
        &self,
        registry: &AdapterRegistry,
        provider: &str,
        opts: StartOpts,
    ) -> Result<Session> {
        let coder = registry.create_coder(provider, StartOpts::default())?;
        let thread = coder.start_thread(opts).await?;
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            coder,
            thread,
            created_at: Utc::now(),
        };

        let count = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            sessions.insert(session.id.clone(), session.clone());
            sessions.len()
        };
        metrics::set_active_sessions(count);
        tracing::info!(
            session_id = %session.id,
            provider = %provider,
            thread_id = ?session.thread.id(),
            "Session created"
        );
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Remove a session, returning it so the caller can close its thread
    pub fn evict(&self, session_id: &str) -> Option<Session> {
        let (removed, count) = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let removed = sessions.remove(session_id);
            (removed, sessions.len())
        };
        if removed.is_some() {
            metrics::set_active_sessions(count);
            tracing::info!(session_id = %session_id, "Session evicted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
