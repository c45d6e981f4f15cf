//! Retry-guarded apply: serialized writes to a contended external resource.
//!
//! Several processes (and several settings in this process) may want to write
//! the same device at once. [`guarded_apply`] takes a named cross-process lock,
//! opens the resource, performs the write, and releases both, with bounded
//! retries on each step:
//!
//! - lock not acquired within `lock_timeout`: back off and retry, at most
//!   `lock_attempts` times, then report the request as unconfirmed;
//! - resource not available: retry the open `open_attempts` times with a
//!   fixed delay, then report unconfirmed (the lock is still released).
//!
//! Lock guards and resource handles are RAII values, so every exit path,
//! including a failed write, releases them.

use std::time::{Duration, Instant};

use crate::control::{Applied, ApplyError, Result};
use crate::value::Value;

/// Retry budget for [`guarded_apply`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How long one lock attempt may wait.
    pub lock_timeout: Duration,
    /// Total lock attempts before giving up.
    pub lock_attempts: u32,
    /// Pause between failed lock attempts.
    pub lock_backoff: Duration,
    /// Total open attempts while holding the lock.
    pub open_attempts: u32,
    /// Pause between failed open attempts.
    pub open_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(200),
            lock_attempts: 10,
            lock_backoff: Duration::from_millis(200),
            open_attempts: 10,
            open_delay: Duration::from_millis(200),
        }
    }
}

/// A named mutual-exclusion lock. The lock is held while the returned guard
/// is alive.
pub trait NamedLock {
    type Guard;

    /// Try to take the lock, waiting at most `timeout`.
    fn try_lock(&self, timeout: Duration) -> Option<Self::Guard>;
}

/// Something that must be opened before it can be written. The handle is
/// released when dropped.
pub trait Resource {
    type Handle;

    fn open(&mut self) -> Result<Self::Handle>;
}

/// Run `write` against `resource` under `lock`, following `policy`.
///
/// Returns `Confirmed` with the write's result on success, `Unconfirmed`
/// carrying `requested` when the lock or the resource could not be obtained,
/// and `Err` only when the write itself failed.
pub fn guarded_apply<L, R, F>(
    lock: &L,
    resource: &mut R,
    policy: &RetryPolicy,
    requested: &Value,
    write: F,
) -> Result<Applied>
where
    L: NamedLock,
    R: Resource,
    F: FnOnce(&mut R::Handle) -> Result<Value>,
{
    let attempts = policy.lock_attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(guard) = lock.try_lock(policy.lock_timeout) {
            let outcome = write_with_retries(resource, policy, requested, write);
            drop(guard);
            return outcome;
        }
        log::debug!("[guard] lock not acquired (attempt {attempt}/{attempts})");
        if attempt < attempts {
            std::thread::sleep(policy.lock_backoff);
        }
    }
    log::warn!("[guard] lock busy after {attempts} attempts, {requested} left unconfirmed");
    Ok(Applied::Unconfirmed(requested.clone()))
}

fn write_with_retries<R, F>(
    resource: &mut R,
    policy: &RetryPolicy,
    requested: &Value,
    write: F,
) -> Result<Applied>
where
    R: Resource,
    F: FnOnce(&mut R::Handle) -> Result<Value>,
{
    let attempts = policy.open_attempts.max(1);
    for attempt in 1..=attempts {
        match resource.open() {
            Ok(mut handle) => {
                let confirmed = write(&mut handle)?;
                return Ok(Applied::Confirmed(confirmed));
            }
            Err(e) => {
                log::debug!("[guard] resource unavailable (attempt {attempt}/{attempts}): {e}");
                if attempt < attempts {
                    std::thread::sleep(policy.open_delay);
                }
            }
        }
    }
    log::warn!("[guard] resource unavailable after {attempts} attempts, {requested} left unconfirmed");
    Ok(Applied::Unconfirmed(requested.clone()))
}

// ── Lock implementations ──

/// Poll interval while waiting for a contended [`InstanceLock`].
const LOCK_POLL: Duration = Duration::from_millis(10);

/// Cross-process named lock backed by `single-instance`.
///
/// Two holders with the same name exclude each other whether they live in the
/// same process or in different ones.
#[derive(Debug, Clone)]
pub struct InstanceLock {
    name: String,
}

impl InstanceLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NamedLock for InstanceLock {
    type Guard = single_instance::SingleInstance;

    fn try_lock(&self, timeout: Duration) -> Option<Self::Guard> {
        let deadline = Instant::now() + timeout;
        loop {
            match single_instance::SingleInstance::new(&self.name) {
                Ok(instance) if instance.is_single() => return Some(instance),
                Ok(_) => {}
                Err(e) => log::debug!("[guard] lock {}: {e}", self.name),
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(LOCK_POLL.min(deadline - now));
        }
    }
}

/// Lock that is always free, for unguarded writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLock;

impl NamedLock for NoLock {
    type Guard = ();

    fn try_lock(&self, _timeout: Duration) -> Option<()> {
        Some(())
    }
}

pub mod mock {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Lock that refuses the first `fail_times` attempts. Tracks how many
    /// guards are alive.
    #[derive(Debug, Default)]
    pub struct MockLock {
        pub fail_times: Cell<u32>,
        pub attempts: Cell<u32>,
        pub held: Rc<Cell<u32>>,
    }

    impl MockLock {
        pub fn failing(times: u32) -> Self {
            let lock = Self::default();
            lock.fail_times.set(times);
            lock
        }
    }

    pub struct MockGuard(Rc<Cell<u32>>);

    impl Drop for MockGuard {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    impl NamedLock for MockLock {
        type Guard = MockGuard;

        fn try_lock(&self, _timeout: Duration) -> Option<MockGuard> {
            self.attempts.set(self.attempts.get() + 1);
            if self.fail_times.get() > 0 {
                self.fail_times.set(self.fail_times.get() - 1);
                return None;
            }
            self.held.set(self.held.get() + 1);
            Some(MockGuard(self.held.clone()))
        }
    }

    /// Resource whose first `fail_times` opens fail. Tracks open handles and
    /// the values written through them.
    #[derive(Debug, Default)]
    pub struct MockResource {
        pub fail_times: u32,
        pub opens: u32,
        pub open_handles: Rc<Cell<i32>>,
    }

    impl MockResource {
        pub fn failing(times: u32) -> Self {
            Self {
                fail_times: times,
                ..Self::default()
            }
        }
    }

    pub struct MockHandle {
        open: Rc<Cell<i32>>,
        pub written: Vec<Value>,
    }

    impl Drop for MockHandle {
        fn drop(&mut self) {
            self.open.set(self.open.get() - 1);
        }
    }

    impl Resource for MockResource {
        type Handle = MockHandle;

        fn open(&mut self) -> Result<MockHandle> {
            self.opens += 1;
            if self.fail_times > 0 {
                self.fail_times -= 1;
                return Err(ApplyError::NotFound("mock resource".into()));
            }
            self.open_handles.set(self.open_handles.get() + 1);
            Ok(MockHandle {
                open: self.open_handles.clone(),
                written: Vec::new(),
            })
        }
    }
}
