//! Session pool with a bounded number of live sessions.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{Session, SessionError, SessionFactory};

/// A session checked out of the pool.
///
/// Holds one of the pool's permits until released or dropped, so the
/// number of live sessions never exceeds the pool bound.
pub struct PooledSession {
    session: Box<dyn Session>,
    healthy: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// False once a probe failed or the handle was torn down.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Flag the session so it is discarded on release.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }
}

impl Deref for PooledSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

/// Counters for pool activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub reused: usize,
    pub restarted: usize,
    pub discarded: usize,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    reused: AtomicUsize,
    restarted: AtomicUsize,
    discarded: AtomicUsize,
}

/// Pool of browsing sessions.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    idle: Mutex<Vec<Box<dyn Session>>>,
    permits: Arc<Semaphore>,
    max_idle: usize,
    max_age: Option<Duration>,
    probe_timeout: Duration,
    counters: Counters,
}

impl SessionPool {
    /// Create a pool allowing at most `max_sessions` live sessions.
    pub fn new(factory: Arc<dyn SessionFactory>, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        info!("Created session pool (max {} session(s))", max_sessions);
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_idle: max_sessions,
            max_age: None,
            probe_timeout: Duration::from_secs(10),
            counters: Counters::default(),
        }
    }

    /// Replace idle sessions older than `max_age` instead of reusing them.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            restarted: self.counters.restarted.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    fn expired(&self, session: &dyn Session) -> bool {
        self.max_age
            .map(|age| !age.is_zero() && session.created_at().elapsed() >= age)
            .unwrap_or(false)
    }

    async fn probe(&self, session: &mut dyn Session) -> bool {
        tokio::time::timeout(self.probe_timeout, session.probe())
            .await
            .unwrap_or(false)
    }

    async fn discard(&self, mut session: Box<dyn Session>) {
        session.close().await;
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Check out a session, reusing a live idle one or creating a new one.
    ///
    /// Waits while the pool is at its bound.
    pub async fn acquire(&self) -> Result<PooledSession, SessionError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Closed)?;

        loop {
            let candidate = self.idle.lock().await.pop();
            let Some(mut session) = candidate else {
                break;
            };

            if self.expired(session.as_ref()) {
                debug!("Idle session expired, replacing");
                self.discard(session).await;
                continue;
            }
            if !self.probe(session.as_mut()).await {
                warn!("Idle session failed liveness probe, replacing");
                self.discard(session).await;
                continue;
            }

            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledSession {
                session,
                healthy: true,
                _permit: permit,
            });
        }

        let session = self.factory.create().await?;
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        debug!("Created new browsing session");
        Ok(PooledSession {
            session,
            healthy: true,
            _permit: permit,
        })
    }

    /// Return a session. Unhealthy sessions and surplus idle ones are closed.
    pub async fn release(&self, pooled: PooledSession) {
        let PooledSession {
            session,
            healthy,
            _permit,
        } = pooled;

        if !healthy {
            self.discard(session).await;
            return;
        }

        let surplus = {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.max_idle {
                idle.push(session);
                None
            } else {
                Some(session)
            }
        };
        if let Some(session) = surplus {
            self.discard(session).await;
        }
    }

    /// Probe a checked-out session. A failed probe marks it unhealthy.
    pub async fn is_alive(&self, pooled: &mut PooledSession) -> bool {
        if !pooled.healthy {
            return false;
        }
        let alive = self.probe(pooled.session.as_mut()).await;
        if !alive {
            pooled.healthy = false;
        }
        alive
    }

    /// Close the session's handle and replace it with a fresh one.
    ///
    /// On failure the session stays unhealthy and is discarded on release.
    pub async fn restart(&self, pooled: &mut PooledSession) -> Result<(), SessionError> {
        pooled.session.close().await;
        pooled.healthy = false;
        self.counters.restarted.fetch_add(1, Ordering::Relaxed);

        let fresh = self.factory.create().await?;
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        pooled.session = fresh;
        pooled.healthy = true;
        info!("Restarted browsing session");
        Ok(())
    }

    /// Close every idle session.
    pub async fn close_all(&self) {
        let drained: Vec<Box<dyn Session>> = self.idle.lock().await.drain(..).collect();
        for mut session in drained {
            session.close().await;
        }
    }
}
