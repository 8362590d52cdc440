//! Process-local `BuildSession` registry. One session is mutated only by
//! the coroutine driving `stream_progress`/`retry_page` for it, per §9's
//! single-owner-coroutine design note; the registry itself only needs to
//! hand out/remove the `Arc<RwLock<_>>` for a session id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use webforge_types::BuildSession;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<RwLock<BuildSession>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: BuildSession) -> Arc<RwLock<BuildSession>> {
        let handle = Arc::new(RwLock::new(session));
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.read().await.id.clone(), handle.clone());
        handle
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<RwLock<BuildSession>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Removes a session once it has reached a terminal state with no
    /// remaining failed pages. A failed session is retained indefinitely;
    /// cleanup of those is an explicit operator action, never automatic.
    pub async fn remove_if_clean(&self, session_id: &str) {
        let should_remove = match self.get(session_id).await {
            Some(handle) => {
                let session = handle.read().await;
                session.is_done() && !session.has_failures()
            }
            None => false,
        };
        if should_remove {
            self.sessions.write().await.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> BuildSession {
        BuildSession {
            id: id.to_string(),
            project_id: "proj".to_string(),
            user_id: "user".to_string(),
            build_plan_id: "plan".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let registry = SessionRegistry::new();
        registry.insert(session("s1")).await;
        assert!(registry.get("s1").await.is_some());
    }

    #[tokio::test]
    async fn remove_if_clean_keeps_failed_sessions() {
        let registry = SessionRegistry::new();
        let mut s = session("s2");
        s.pages = vec![];
        s.failed_pages.insert("page-1".to_string());
        registry.insert(s).await;
        registry.remove_if_clean("s2").await;
        assert!(registry.get("s2").await.is_some());
    }
}
