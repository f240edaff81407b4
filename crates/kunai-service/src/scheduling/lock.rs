//! Per-UID leases serializing scheduling of one calendar object.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::{SchedulingError, SchedulingResult};

/// Longest wait between checks for an expired lease.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Lease {
    owner: Uuid,
    expires: Instant,
}

/// Leases keyed by calendar object UID.
///
/// A lease is held by one owner token until its guard is dropped or its
/// expiry passes, whichever comes first. An expired lease may be taken over
/// by the next caller, so a crashed holder cannot block a UID forever.
#[derive(Debug)]
pub struct UidLocks {
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
    timeout: Duration,
    expiry: Duration,
}

impl UidLocks {
    /// `timeout` bounds how long [`UidLocks::acquire`] waits, `expiry` how
    /// long a lease lives.
    #[must_use]
    pub fn new(timeout: Duration, expiry: Duration) -> Arc<Self> {
        Arc::new(Self {
            leases: Mutex::new(HashMap::new()),
            released: Notify::new(),
            timeout,
            expiry,
        })
    }

    /// Waits for the lease on `uid`.
    ///
    /// ## Errors
    /// Returns [`SchedulingError::LockTimeout`] if the lease is still held
    /// by someone else when the acquire timeout passes.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(self: &Arc<Self>, uid: &str) -> SchedulingResult<UidLease> {
        let owner = Uuid::new_v4();
        let deadline = Instant::now() + self.timeout;

        loop {
            let released = self.released.notified();
            if self.try_take(uid, owner) {
                tracing::trace!(owner = %owner, "Acquired UID lease");
                return Ok(UidLease {
                    locks: Arc::clone(self),
                    uid: uid.to_string(),
                    owner,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("Timed out waiting for UID lease");
                return Err(SchedulingError::LockTimeout(uid.to_string()));
            }
            let wait = (deadline - now).min(POLL_INTERVAL);
            // A timeout here only means it is time to look again.
            let _elapsed = tokio::time::timeout(wait, released).await;
        }
    }

    fn try_take(&self, uid: &str, owner: Uuid) -> bool {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(lease) = leases.get(uid) {
            if lease.expires > now {
                return false;
            }
            tracing::warn!(uid = %uid, previous = %lease.owner, "Taking over expired UID lease");
        }
        leases.insert(
            uid.to_string(),
            Lease {
                owner,
                expires: now + self.expiry,
            },
        );
        true
    }

    fn release(&self, uid: &str, owner: Uuid) {
        let mut leases = self.leases.lock();
        if leases.get(uid).is_some_and(|lease| lease.owner == owner) {
            leases.remove(uid);
        }
        drop(leases);
        self.released.notify_waiters();
    }

    #[must_use]
    pub fn is_held(&self, uid: &str) -> bool {
        self.leases
            .lock()
            .get(uid)
            .is_some_and(|lease| lease.expires > Instant::now())
    }
}

/// A held lease; dropping it releases the UID.
#[derive(Debug)]
pub struct UidLease {
    locks: Arc<UidLocks>,
    uid: String,
    owner: Uuid,
}

impl Drop for UidLease {
    fn drop(&mut self) {
        self.locks.release(&self.uid, self.owner);
    }
}
