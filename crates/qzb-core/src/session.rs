use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::{
    domain::{FileRef, UserId},
    errors::Error,
    Result,
};

/// Per-user record of an open batch's accumulated file references.
///
/// A user has at most one open session; insertion order of references is
/// preserved because it determines download submission order. State lives
/// only in process memory: a restart loses all open batches and the user
/// re-batches.
#[derive(Default)]
pub struct SessionTracker {
    state: Mutex<HashMap<UserId, Vec<FileRef>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re-)open a session, discarding any prior unfinished one for the user.
    pub async fn start(&self, user_id: UserId) {
        self.state.lock().await.insert(user_id, Vec::new());
    }

    /// Append a reference to the user's open session.
    ///
    /// Files sent without `/add` are deliberately not an error; returns
    /// whether the reference was recorded.
    pub async fn record(&self, user_id: UserId, reference: FileRef) -> bool {
        let mut st = self.state.lock().await;
        match st.get_mut(&user_id) {
            Some(refs) => {
                refs.push(reference);
                true
            }
            None => false,
        }
    }

    pub async fn has_open(&self, user_id: UserId) -> bool {
        self.state.lock().await.contains_key(&user_id)
    }

    /// True if a session is open but nothing has been recorded yet.
    pub async fn is_empty(&self, user_id: UserId) -> bool {
        self.state
            .lock()
            .await
            .get(&user_id)
            .map(|refs| refs.is_empty())
            .unwrap_or(false)
    }

    /// Consume and remove the session. The removal is atomic with respect to
    /// concurrent `record`/`cancel` calls for the same user.
    pub async fn take(&self, user_id: UserId) -> Result<Vec<FileRef>> {
        self.state
            .lock()
            .await
            .remove(&user_id)
            .ok_or_else(|| Error::UserState(format!("no open batch for user {}", user_id.0)))
    }

    /// Drop the session if present; idempotent.
    pub async fn cancel(&self, user_id: UserId) {
        self.state.lock().await.remove(&user_id);
    }
}
