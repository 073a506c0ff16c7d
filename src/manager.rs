use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::clock::{Clock, System};
use crate::config::TokenManagerConfig;
use crate::issuer::{IssuanceError, TokenIssuer};
use crate::tokens::Token;

/// The reason a token could not be acquired
#[derive(Debug, Error)]
pub enum TokenError {
    /// The issuer failed with an error that retrying will not fix
    #[error("token issuance failed with a non-retryable error")]
    Issuance(#[source] IssuanceError),
    /// Every attempt permitted by the retry policy failed
    #[error("token issuance retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// The number of attempts made
        attempts: u32,
        /// The failure of the final attempt
        #[source]
        source: AttemptError,
    },
    /// The manager has been disposed and no longer issues tokens
    #[error("token manager has been disposed")]
    Disposed,
    /// A blocking acquisition was made without a usable runtime
    #[error("blocking token acquisition requires a multi-threaded tokio runtime")]
    NoRuntime,
}

/// The failure of a single issuance attempt
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The attempt did not complete within the issuance timeout
    #[error("issuance attempt exceeded the {}ms timeout", .0.as_millis())]
    Timeout(Duration),
    /// The issuer reported an error
    #[error(transparent)]
    Issuance(#[from] IssuanceError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshMode {
    /// Reuse the current token if it has not expired
    OnExpiry,
    /// Supersede the current token even if it is still valid
    Force,
}

/// Manages a current token and keeps it fresh in the background
///
/// The manager owns the current [`Token`], enforces that at most one
/// issuance is in flight regardless of how many callers want a token, and
/// re-arms a proactive renewal after every successful issuance so callers on
/// the common path find a fresh token already cached.
///
/// Cloning the manager is cheap and produces another handle onto the same
/// engine. Disposing any handle cancels the pending scheduled renewal and
/// terminates the engine; an issuance already in flight is left to complete
/// and publish harmlessly.
pub struct TokenManager<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for TokenManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for TokenManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .field("disposed", &*self.inner.shutdown.borrow())
            .finish()
    }
}

struct Inner<C> {
    issuer: Arc<dyn TokenIssuer>,
    config: TokenManagerConfig,
    clock: C,
    current: watch::Sender<Option<Arc<Token>>>,
    flight: Mutex<()>,
    shutdown: watch::Sender<bool>,
    renewal_started: AtomicBool,
}

impl TokenManager<System> {
    /// Constructs a manager over the given issuer using the system clock
    pub fn new(issuer: impl TokenIssuer + 'static, config: TokenManagerConfig) -> Self {
        Self::with_clock(issuer, config, System)
    }
}

impl<C: Clock + Send + Sync + 'static> TokenManager<C> {
    /// Constructs a manager using the given clock
    pub fn with_clock(issuer: impl TokenIssuer + 'static, config: TokenManagerConfig, clock: C) -> Self {
        let (current, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                issuer: Arc::new(issuer),
                config,
                clock,
                current,
                flight: Mutex::new(()),
                shutdown,
                renewal_started: AtomicBool::new(false),
            }),
        }
    }

    /// Acquires the current token, issuing a new one only if required
    ///
    /// Returns the cached token immediately whenever it has not expired,
    /// even while a renewal is in flight. With no usable token cached, the
    /// caller joins the single in-flight issuance, or starts one subject to
    /// the retry policy; every concurrent caller resolves from the token
    /// that one issuance publishes. Should the issuance fail outright, the
    /// queued callers retry in turn rather than failing together.
    pub async fn get_token(&self) -> Result<Arc<Token>, TokenError> {
        if self.inner.is_disposed() {
            return Err(TokenError::Disposed);
        }

        if let Some(token) = self.inner.fresh_token() {
            return Ok(token);
        }

        let token = self.inner.refresh(RefreshMode::OnExpiry).await?;
        self.ensure_renewal_task();
        Ok(token)
    }

    /// Acquires the current token, blocking the calling thread
    ///
    /// Same contract as [`get_token`][Self::get_token]. A cached fresh token
    /// is returned without touching the runtime at all; otherwise the call
    /// bridges onto the ambient multi-threaded tokio runtime. Without one,
    /// [`TokenError::NoRuntime`] is returned rather than panicking.
    pub fn get_token_blocking(&self) -> Result<Arc<Token>, TokenError> {
        if self.inner.is_disposed() {
            return Err(TokenError::Disposed);
        }

        if let Some(token) = self.inner.fresh_token() {
            return Ok(token);
        }

        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| TokenError::NoRuntime)?;
        if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
            return Err(TokenError::NoRuntime);
        }

        tokio::task::block_in_place(|| handle.block_on(self.get_token()))
    }

    /// The currently published token, if any, regardless of freshness
    pub fn current_token(&self) -> Option<Arc<Token>> {
        self.inner.current.borrow().clone()
    }

    /// Subscribes to token publications
    ///
    /// Each successful issuance, foreground or background, publishes the new
    /// token to all subscribers.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Token>>> {
        self.inner.current.subscribe()
    }

    /// Permanently shuts the manager down
    ///
    /// The pending scheduled renewal never fires and subsequent
    /// acquisitions fail with [`TokenError::Disposed`]. An issuance already
    /// in flight is not interrupted; its result is published but no further
    /// renewal is scheduled from it.
    pub fn dispose(&self) {
        if !self.inner.shutdown.send_replace(true) {
            tracing::debug!("token manager disposed");
        }
    }

    /// Starts the background renewal loop once the first token exists
    fn ensure_renewal_task(&self) {
        if self.inner.renewal_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        let published = self.inner.current.subscribe();
        tokio::spawn(renew_in_background(weak, shutdown, published));
    }
}

impl<C: Clock> Inner<C> {
    fn is_disposed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn fresh_token(&self) -> Option<Arc<Token>> {
        let now = self.clock.now();
        self.current
            .borrow()
            .as_ref()
            .filter(|token| !token.is_expired_at(now))
            .cloned()
    }

    fn publish(&self, token: Token) -> Arc<Token> {
        let token = Arc::new(token);
        self.current.send_modify(|slot| {
            if let Some(previous) = slot.as_ref() {
                if token.expires_at() < previous.expires_at() {
                    tracing::debug!(
                        previous_expiry = previous.expires_at().0,
                        new_expiry = token.expires_at().0,
                        "newly issued token expires earlier than its predecessor"
                    );
                }
            }
            *slot = Some(Arc::clone(&token));
        });
        token
    }

    /// Runs one coalesced issuance under the retry policy
    ///
    /// Holding the flight lock is what makes concurrent acquisitions
    /// single-flight: late arrivals block on the lock and then pick up the
    /// freshly published token from the re-check instead of issuing again.
    /// When the flight fails instead, each queued caller runs its own retry
    /// sequence in turn, still one at a time; the first waiter after a
    /// transient recovery gets a token rather than a replay of the stale
    /// error.
    async fn refresh(&self, mode: RefreshMode) -> Result<Arc<Token>, TokenError> {
        let _guard = self.flight.lock().await;

        if self.is_disposed() {
            return Err(TokenError::Disposed);
        }

        // Disposal mid-sequence lets the in-flight attempt run to completion
        // but must not start another one.
        let mut shutdown = self.shutdown.subscribe();

        if mode == RefreshMode::OnExpiry {
            if let Some(token) = self.fresh_token() {
                return Ok(token);
            }
        }

        let policy = self.config.retry_policy();
        let timeout = self.config.issuance_timeout();
        let mut attempts = 0;
        let mut last_failure;

        loop {
            attempts += 1;

            match tokio::time::timeout(timeout, self.issuer.issue()).await {
                Ok(Ok(token)) => {
                    let token = self.publish(token);
                    tracing::debug!(
                        attempts,
                        expires_at = token.expires_at().0,
                        "issued and published a new token"
                    );
                    return Ok(token);
                }
                Ok(Err(error)) if !error.is_retryable() => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "token issuance failed and cannot be retried"
                    );
                    return Err(TokenError::Issuance(error));
                }
                Ok(Err(error)) => last_failure = AttemptError::Issuance(error),
                Err(_) => last_failure = AttemptError::Timeout(timeout),
            }

            if attempts >= policy.max_attempts() {
                return Err(TokenError::RetriesExhausted {
                    attempts,
                    source: last_failure,
                });
            }

            let delay = policy.delay_for(attempts);
            tracing::debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_failure,
                "token issuance attempt failed, retrying"
            );
            tokio::select! {
                _ = shutdown.changed() => return Err(TokenError::Disposed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Proactively renews the current token until shutdown
///
/// Re-armed after every publication rather than running on a fixed period,
/// since the renewal point depends on each token's actual lifetime. The
/// loop holds only a weak reference between renewals, so dropping the last
/// manager handle ends it as well.
async fn renew_in_background<C>(
    inner: Weak<Inner<C>>,
    mut shutdown: watch::Receiver<bool>,
    mut published: watch::Receiver<Option<Arc<Token>>>,
) where
    C: Clock + Send + Sync + 'static,
{
    let mut delays = {
        let Some(inner) = inner.upgrade() else { return };
        inner.config.renewal_backoff().delays()
    };

    loop {
        let wait = {
            let Some(inner) = inner.upgrade() else { return };
            if inner.is_disposed() {
                return;
            }
            let current = published.borrow_and_update().clone();
            current.map(|token| inner.config.next_renewal_in(&token, inner.clock.now()))
        };

        match wait {
            None => {
                // No token yet; renewal is re-armed by the first publication.
                tokio::select! {
                    _ = shutdown.changed() => return,
                    changed = published.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }
            Some(delay) => {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    changed = published.changed() => {
                        // A foreground issuance published first; re-arm.
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        loop {
            let Some(inner) = inner.upgrade() else { return };
            if inner.is_disposed() {
                return;
            }

            match inner.refresh(RefreshMode::Force).await {
                Ok(token) => {
                    delays.reset();
                    tracing::debug!(
                        expires_at = token.expires_at().0,
                        "background renewal published a fresh token"
                    );
                    break;
                }
                Err(error) => {
                    let delay = delays.failure();
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        retry_in_ms = delay.as_millis() as u64,
                        "background renewal failed, will retry"
                    );
                    drop(inner);
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
