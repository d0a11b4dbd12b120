//! Single-flight access token cache
//!
//! A fresh token is handed out without blocking. Otherwise the first caller
//! renews while holding no lock, and everyone arriving during the renewal
//! waits on a condition variable for that renewal's outcome. A failed renewal
//! is reported to every waiter and then forgotten, so the next caller tries
//! again.

use log::{info, warn};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::claims;
use crate::error::{RemoteError, Result};

/// Tokens are renewed this many seconds before they expire
pub const RENEWAL_SKEW_SECS: i64 = 15 * 60;

/// Error reported by the interactive sign-in
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Error {code}: {message}")]
pub struct RenewalFailure {
    pub code: String,
    pub message: String,
}

impl RenewalFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Interactive credential prompt returning a raw JWT
pub trait TokenSource: Send + Sync {
    fn acquire(&self) -> std::result::Result<String, RenewalFailure>;
}

impl<F> TokenSource for F
where
    F: Fn() -> std::result::Result<String, RenewalFailure> + Send + Sync,
{
    fn acquire(&self) -> std::result::Result<String, RenewalFailure> {
        self()
    }
}

/// Anything that can produce an `Authorization` value
pub trait Credentials: Send + Sync {
    fn credential(&self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    /// `Bearer <token>`
    pub credential: String,
    /// Epoch seconds
    pub expires_at: i64,
}

impl CachedToken {
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at - RENEWAL_SKEW_SECS
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    Renewing,
    Ready(CachedToken),
    Failed(String),
}

#[derive(Debug)]
struct Inner {
    state: State,
    /// Bumped every time a renewal finishes
    generation: u64,
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

pub struct TokenCache {
    source: Box<dyn TokenSource>,
    clock: Clock,
    inner: Mutex<Inner>,
    renewed: Condvar,
}

impl TokenCache {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self::with_clock(source, || chrono::Utc::now().timestamp())
    }

    /// Use `clock` (epoch seconds) instead of the system time
    pub fn with_clock(
        source: impl TokenSource + 'static,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Box::new(source),
            clock: Box::new(clock),
            inner: Mutex::new(Inner {
                state: State::Idle,
                generation: 0,
            }),
            renewed: Condvar::new(),
        }
    }

    /// A valid `Bearer` credential, renewing it if needed
    pub fn get(&self) -> Result<String> {
        let mut inner = self.lock();
        loop {
            match &inner.state {
                State::Ready(token) if token.is_fresh((self.clock)()) => {
                    return Ok(token.credential.clone());
                }
                State::Renewing => {
                    let generation = inner.generation;
                    inner = self
                        .renewed
                        .wait_while(inner, |i| i.generation == generation)
                        .unwrap_or_else(PoisonError::into_inner);
                    // Outcome of the renewal we waited for (or a later one)
                    match &inner.state {
                        State::Ready(token) => return Ok(token.credential.clone()),
                        State::Failed(reason) => {
                            return Err(RemoteError::CredentialRenewal(reason.clone()));
                        }
                        State::Idle | State::Renewing => continue,
                    }
                }
                State::Idle | State::Ready(_) | State::Failed(_) => {
                    inner.state = State::Renewing;
                    drop(inner);
                    return self.renew();
                }
            }
        }
    }

    /// The cached token, if any
    pub fn cached(&self) -> Option<CachedToken> {
        match &self.lock().state {
            State::Ready(token) => Some(token.clone()),
            _ => None,
        }
    }

    fn renew(&self) -> Result<String> {
        info!("Renewing access token");
        let mut guard = RenewalGuard {
            cache: self,
            done: false,
        };

        let outcome = self
            .source
            .acquire()
            .and_then(|token| {
                let expires_at = claims::expiry(&token)?;
                Ok(CachedToken {
                    credential: format!("Bearer {}", token),
                    expires_at,
                })
            })
            .map_err(|failure| failure.to_string());

        guard.done = true;
        let state = match &outcome {
            Ok(token) => State::Ready(token.clone()),
            Err(reason) => {
                warn!("Access token renewal failed: {}", reason);
                State::Failed(reason.clone())
            }
        };
        self.finish(state);

        outcome
            .map(|token| token.credential)
            .map_err(RemoteError::CredentialRenewal)
    }

    fn finish(&self, state: State) {
        let mut inner = self.lock();
        inner.state = state;
        inner.generation += 1;
        drop(inner);
        self.renewed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Credentials for TokenCache {
    fn credential(&self) -> Result<String> {
        self.get()
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        let state = match &inner.state {
            State::Idle => "idle",
            State::Renewing => "renewing",
            State::Ready(_) => "ready",
            State::Failed(_) => "failed",
        };
        f.debug_struct("TokenCache")
            .field("state", &state)
            .field("generation", &inner.generation)
            .finish()
    }
}

/// Releases waiters if the token source panics mid-renewal
struct RenewalGuard<'a> {
    cache: &'a TokenCache,
    done: bool,
}

impl Drop for RenewalGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache
                .finish(State::Failed("Token renewal was interrupted".to_string()));
        }
    }
}
