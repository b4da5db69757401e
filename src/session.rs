//! Process-wide authenticated-user state.
//!
//! A mounted [`Session`] follows the backend's auth-state feed for its whole
//! lifetime and keeps the signed-in user's profile loaded. State lives in a
//! `watch` channel so callers can snapshot it or wait for a condition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthEvent, AuthSession, AuthUser, Backend, SignUpOutcome};
use crate::data::auth::{self, Registration};
use crate::data::profiles;
use crate::error::AuthError;
use crate::models::{Profile, Role};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionState {
    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    /// Admins count as teachers.
    pub fn is_teacher(&self) -> bool {
        matches!(self.role(), Some(Role::Teacher | Role::Admin))
    }

    pub fn is_student(&self) -> bool {
        self.role() == Some(Role::Student)
    }
}

struct Inner {
    backend: Arc<dyn Backend>,
    state: watch::Sender<SessionState>,
    alive: AtomicBool,
}

impl Inner {
    /// Every state write goes through here; nothing lands after unmount.
    fn set(&self, update: impl FnOnce(&mut SessionState)) {
        if !self.alive.load(Ordering::SeqCst) {
            debug!("session unmounted; dropping state update");
            return;
        }
        self.state.send_modify(update);
    }

    async fn initialize(&self) {
        match self.backend.get_session().await {
            Ok(Some(session)) => {
                self.set(|s| s.user = Some(session.user));
                self.load_profile().await;
            }
            Ok(None) => self.set(|s| {
                s.user = None;
                s.loading = false;
            }),
            Err(e) => {
                warn!(error = %e, "could not read the current session");
                self.set(|s| s.loading = false);
            }
        }
    }

    async fn apply(&self, event: AuthEvent) {
        debug!(change = ?event.change, "auth state changed");
        match event.session {
            Some(session) => {
                self.set(|s| {
                    s.user = Some(session.user);
                    s.loading = true;
                });
                self.load_profile().await;
            }
            None => self.set(|s| {
                s.user = None;
                s.profile = None;
                s.loading = false;
            }),
        }
    }

    async fn load_profile(&self) {
        match profiles::current_profile(self.backend.as_ref()).await {
            Ok(profile) => self.set(|s| {
                s.profile = profile;
                s.loading = false;
            }),
            Err(e) => {
                warn!(error = %e, "failed to load profile");
                self.set(|s| {
                    s.profile = None;
                    s.loading = false;
                });
            }
        }
    }

    async fn track<T>(&self, call: impl std::future::Future<Output = Result<T, AuthError>>) -> Result<T, AuthError> {
        self.set(|s| s.loading = true);
        let result = call.await;
        self.set(|s| s.loading = false);
        result
    }
}

pub struct Session {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Reads the current session and starts following auth changes. Must be
    /// called inside a tokio runtime.
    pub fn mount(backend: Arc<dyn Backend>) -> Self {
        let (state, _) = watch::channel(SessionState {
            loading: true,
            ..SessionState::default()
        });
        // Subscribe first so nothing emitted during the initial read is lost.
        let mut subscription = backend.on_auth_state_change();
        let inner = Arc::new(Inner {
            backend,
            state,
            alive: AtomicBool::new(true),
        });
        let task = Arc::clone(&inner);
        let listener = tokio::spawn(async move {
            task.initialize().await;
            while let Some(event) = subscription.next().await {
                if !task.alive.load(Ordering::SeqCst) {
                    break;
                }
                task.apply(event).await;
            }
            debug!("auth listener stopped");
        });
        Session {
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Stops following auth changes and discards any pending state update.
    pub fn unmount(&self) {
        if self.inner.alive.swap(false, Ordering::SeqCst) {
            info!("session unmounted");
        }
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Resolves with the first state satisfying `pred` (possibly the current one).
    pub async fn wait_for(&self, pred: impl FnMut(&SessionState) -> bool) -> SessionState {
        let mut rx = self.subscribe();
        let result = match rx.wait_for(pred).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        result
    }

    /// Re-reads the signed-in user's profile, e.g. after it was edited.
    pub async fn reload_profile(&self) {
        self.inner.load_profile().await;
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.inner
            .track(auth::sign_in(self.inner.backend.as_ref(), email, password))
            .await
    }

    pub async fn sign_up(&self, registration: Registration) -> Result<SignUpOutcome, AuthError> {
        self.inner
            .track(auth::sign_up(self.inner.backend.as_ref(), registration))
            .await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner
            .track(auth::sign_out(self.inner.backend.as_ref()))
            .await?;
        self.inner.set(|s| {
            s.user = None;
            s.profile = None;
        });
        Ok(())
    }

    pub async fn verify_email(&self, email: &str, token: &str) -> Result<AuthSession, AuthError> {
        self.inner
            .track(self.inner.backend.verify_email(email, token))
            .await
    }

    pub async fn refresh(&self) -> Result<AuthSession, AuthError> {
        self.inner.track(self.inner.backend.refresh_session()).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unmount();
    }
}
