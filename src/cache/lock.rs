//! Poison-tolerant lock access for the in-process store.

use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), source, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), source, op, "rwlock.write")
}

/// Take over a poisoned guard instead of propagating the panic.
fn recover<G>(
    result: LockResult<G>,
    source: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            source,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned cache store lock"
        );
        poisoned.into_inner()
    })
}
