//! Session store for multi-user, multi-chat command handling.
//!
//! Each conversation gets its own `Arc<Mutex<Session>>`, so events for one
//! conversation are serialized while different conversations progress in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::engine::session::{CommandInstance, Session, SessionKey};

/// Owns every session slot.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the session for `key`.
    pub async fn get_or_create(&self, key: &SessionKey) -> Arc<Mutex<Session>> {
        // Fast path: check if session exists
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key) {
                return Arc::clone(session);
            }
        }

        // Slow path: create new session
        let mut sessions = self.sessions.write().await;
        // Double-check after acquiring write lock
        if let Some(session) = sessions.get(key) {
            return Arc::clone(session);
        }

        tracing::debug!(session = %key, "Creating session");
        let session = Arc::new(Mutex::new(Session::new(key.clone())));
        sessions.insert(key.clone(), Arc::clone(&session));
        session
    }

    /// Get or create the session for `key` and lock it.
    ///
    /// The returned session is still registered in the store once locked,
    /// so a prune racing with the lock cannot leave it orphaned.
    pub async fn lock_or_create(
        &self,
        key: &SessionKey,
    ) -> (Arc<Mutex<Session>>, OwnedMutexGuard<Session>) {
        loop {
            let session = self.get_or_create(key).await;
            let guard = Arc::clone(&session).lock_owned().await;
            if self.holds(key, &session).await {
                return (session, guard);
            }
            tracing::debug!(session = %key, "Session pruned while waiting for its lock, retrying");
        }
    }

    /// Whether `session` is the one registered for `key`.
    pub async fn holds(&self, key: &SessionKey, session: &Arc<Mutex<Session>>) -> bool {
        self.sessions
            .read()
            .await
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Get the session for `key` without creating one.
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Detach instances idle for longer than `max_idle` and drop sessions
    /// left empty and idle.
    ///
    /// Returns the detached instances so the caller can tell their users.
    /// Sessions locked by an in-progress event are skipped.
    pub async fn prune_idle(&self, max_idle: std::time::Duration) -> Vec<CommandInstance> {
        let cutoff = chrono::Utc::now()
            - chrono::TimeDelta::milliseconds(max_idle.as_millis().min(i64::MAX as u128) as i64);

        let mut expired = Vec::new();
        let mut empty = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (key, session) in sessions.iter() {
                // Try to lock; skip if contended (an event is being handled)
                let Ok(mut sess) = session.try_lock() else {
                    continue;
                };

                if sess
                    .active
                    .as_ref()
                    .is_some_and(|inst| inst.last_active_at < cutoff)
                    && let Some(inst) = sess.take_active()
                {
                    expired.push(inst);
                }

                if sess.active.is_none() && sess.last_active_at < cutoff {
                    empty.push(key.clone());
                }
            }
        }

        if !empty.is_empty() {
            let mut sessions = self.sessions.write().await;
            for key in &empty {
                // Re-check: an event may have arrived since the scan
                let still_idle = sessions
                    .get(key)
                    .and_then(|s| s.try_lock().ok().map(|s| s.active.is_none() && s.last_active_at < cutoff))
                    .unwrap_or(false);
                if still_idle {
                    sessions.remove(key);
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!(
                "Pruned {} idle command instance(s) (idle > {}s)",
                expired.len(),
                max_idle.as_secs()
            );
        }

        expired
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
