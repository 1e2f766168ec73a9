//! Dual-path profile backing: the same service logic runs against the
//! fast-store session blob at engagement latency, or against the persistent
//! document when no session exists.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::db::ProfileRepo;
use crate::error::{AppError, Result};
use crate::models::{ProfileState, SessionProfile};
use crate::session::SessionStore;
use crate::util::now_ms;

#[async_trait]
pub trait ProfileAccess: Send + Sync {
    fn user_id(&self) -> Uuid;

    /// EMA alpha for this backing: the session path reacts fast, the
    /// persistent path smooths hard.
    fn ema_alpha(&self, scoring: &ScoringConfig) -> f64;

    async fn load(&self) -> Result<ProfileState>;
    async fn store(&self, state: &ProfileState) -> Result<()>;
}

pub struct SessionAccess {
    store: SessionStore,
    session_id: String,
    user_id: Uuid,
}

impl SessionAccess {
    pub fn new(store: SessionStore, session_id: String, user_id: Uuid) -> Self {
        Self {
            store,
            session_id,
            user_id,
        }
    }
}

#[async_trait]
impl ProfileAccess for SessionAccess {
    fn user_id(&self) -> Uuid {
        self.user_id
    }

    fn ema_alpha(&self, scoring: &ScoringConfig) -> f64 {
        scoring.ema_alpha_session
    }

    async fn load(&self) -> Result<ProfileState> {
        let profile = self
            .store
            .get_session(&self.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", self.session_id)))?;
        if profile.user_id != self.user_id {
            return Err(AppError::Authentication(format!(
                "session {} does not belong to user {}",
                self.session_id, self.user_id
            )));
        }
        Ok(profile.into_state())
    }

    async fn store(&self, state: &ProfileState) -> Result<()> {
        let blob = SessionProfile::from_state(self.user_id, state.clone());
        self.store.put_session(&self.session_id, &blob).await?;
        self.store.touch(&self.session_id, now_ms()).await
    }
}

pub struct PersistentAccess {
    repo: Arc<ProfileRepo>,
    user_id: Uuid,
}

impl PersistentAccess {
    pub fn new(repo: Arc<ProfileRepo>, user_id: Uuid) -> Self {
        Self { repo, user_id }
    }
}

#[async_trait]
impl ProfileAccess for PersistentAccess {
    fn user_id(&self) -> Uuid {
        self.user_id
    }

    fn ema_alpha(&self, scoring: &ScoringConfig) -> f64 {
        scoring.ema_alpha_db
    }

    async fn load(&self) -> Result<ProfileState> {
        let profile = self
            .repo
            .load(self.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", self.user_id)))?;
        Ok(profile.state)
    }

    async fn store(&self, state: &ProfileState) -> Result<()> {
        self.repo.save_state(self.user_id, state).await
    }
}
