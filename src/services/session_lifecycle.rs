//! Session lifecycle: hydrate on first authenticated request, refresh on
//! activity, merge back into the persistent profile on expiry or logout.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::ProfileRepo;
use crate::error::{AppError, Result};
use crate::models::SessionProfile;
use crate::services::merge::merge_session_into_profile;
use crate::session::{SessionLocks, SessionStore};
use crate::util::now_ms;

pub struct SessionLifecycle {
    store: SessionStore,
    profiles: Arc<ProfileRepo>,
    locks: SessionLocks,
    config: Arc<Config>,
}

impl SessionLifecycle {
    pub fn new(
        store: SessionStore,
        profiles: Arc<ProfileRepo>,
        locks: SessionLocks,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            profiles,
            locks,
            config,
        }
    }

    /// Hydrate a new session from the persistent profile.
    pub async fn start(&self, session_id: &str, user_id: Uuid) -> Result<()> {
        let profile = self
            .profiles
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

        let blob = SessionProfile::from_state(user_id, profile.state);
        self.store.put_session(session_id, &blob).await?;
        self.store.touch(session_id, now_ms()).await?;

        info!(session_id = session_id, user_id = %user_id, "Session started");
        Ok(())
    }

    /// Bump the last-access score; the blob itself carries no TTL.
    pub async fn refresh(&self, session_id: &str) -> Result<()> {
        self.store.touch(session_id, now_ms()).await
    }

    /// Expire one session: merge the blob back, then delete blob and index
    /// entry together. Each failure branch follows the recovery policy for
    /// that condition; callers force index removal on unexpected errors.
    pub async fn expire(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(session_id).await;

        let blob = match self.store.get_session(session_id).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                // Blob already gone; just drop the index entry.
                self.store.remove_index_entry(session_id).await?;
                self.locks.forget(session_id);
                return Ok(());
            }
            Err(AppError::CorruptSession(_)) => {
                warn!(session_id = session_id, "Corrupt session blob, dropping");
                self.store.remove_session(session_id).await?;
                self.locks.forget(session_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let user_id = blob.user_id;
        match self.merge_into_persistent(blob).await {
            Ok(()) => {
                self.store.remove_session(session_id).await?;
                self.locks.forget(session_id);
                info!(session_id = session_id, user_id = %user_id, "Session merged and expired");
                Ok(())
            }
            Err(AppError::NotFound(_)) => {
                // Unknown profile behind the blob: refuse the merge, keep the
                // blob for inspection, stop rescanning it.
                warn!(
                    session_id = session_id,
                    user_id = %user_id,
                    "Merge-back refused: persistent profile missing; leaving blob"
                );
                self.store.remove_index_entry(session_id).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Explicit logout: merge (when a blob exists) and destroy the session.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(session_id).await;

        match self.store.get_session(session_id).await {
            Ok(Some(blob)) => {
                let user_id = blob.user_id;
                self.merge_into_persistent(blob).await?;
                info!(session_id = session_id, user_id = %user_id, "Session merged on logout");
            }
            Ok(None) => {}
            Err(AppError::CorruptSession(_)) => {
                warn!(session_id = session_id, "Corrupt session blob on logout");
            }
            Err(e) => return Err(e),
        }

        self.store.remove_session(session_id).await?;
        self.locks.forget(session_id);
        Ok(())
    }

    async fn merge_into_persistent(&self, blob: SessionProfile) -> Result<()> {
        let user_id = blob.user_id;
        let profile = self
            .profiles
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

        let mut state = profile.state;
        merge_session_into_profile(
            &mut state,
            &blob.into_state(),
            &self.config.scoring,
            &self.config.pools,
            now_ms(),
        );
        self.profiles.save_state(user_id, &state).await
    }

    /// One sweep of the expiry worker: drain sessions idle past the TTL.
    /// Individual failures never stop the sweep; a failed session is removed
    /// from the index so it cannot wedge the worker.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let cutoff = now_ms() - self.config.session.ttl_ms();
        let idle = self.store.sessions_idle_since(cutoff).await?;
        let total = idle.len();

        for session_id in idle {
            if let Err(e) = self.expire(&session_id).await {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Session expiry failed; removing from index"
                );
                if let Err(e) = self.store.remove_index_entry(&session_id).await {
                    warn!(session_id = %session_id, error = %e, "Index cleanup failed");
                }
            }
        }
        Ok(total)
    }
}
