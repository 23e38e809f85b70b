//! # Access
//!
//! Reference counting of device opens by access type.
//!
//! ## Philosophy
//!
//! - **One arbitration point**: every open goes through [`AccessArbiter::acquire`]
//! - **Exclusivity is a rule, not a convention**: an exclusive open is refused
//!   while any other reference exists
//! - **Teardown is final**: [`AccessArbiter::seal`] checks for holders and
//!   refuses new opens in the same step
//!
//! ## Rules
//!
//! | Requested   | Refused when                           |
//! |-------------|----------------------------------------|
//! | `Exclusive` | any counter is non-zero                |
//! | `Shared`    | an exclusive reference is held         |
//! | `Monitor`   | never                                  |

use core_types::CoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mode under which a caller opens the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Sole control of the device
    Exclusive,
    /// Cooperative control alongside other shared holders
    Shared,
    /// Read-only observation
    Monitor,
}

impl AccessType {
    /// Number of access types
    pub const COUNT: usize = 3;

    /// All access types, in counter order
    pub const ALL: [AccessType; Self::COUNT] =
        [AccessType::Exclusive, AccessType::Shared, AccessType::Monitor];

    fn index(self) -> usize {
        match self {
            AccessType::Exclusive => 0,
            AccessType::Shared => 1,
            AccessType::Monitor => 2,
        }
    }
}

impl TryFrom<u32> for AccessType {
    type Error = CoreError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        AccessType::ALL
            .get(raw as usize)
            .copied()
            .ok_or_else(|| CoreError::InvalidArgument(format!("bad access type {}", raw)))
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Exclusive => write!(f, "exclusive"),
            AccessType::Shared => write!(f, "shared"),
            AccessType::Monitor => write!(f, "monitor"),
        }
    }
}

/// Snapshot of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessCounts {
    pub exclusive: usize,
    pub shared: usize,
    pub monitor: usize,
}

impl AccessCounts {
    /// Returns the count for `access`
    pub fn get(&self, access: AccessType) -> usize {
        match access {
            AccessType::Exclusive => self.exclusive,
            AccessType::Shared => self.shared,
            AccessType::Monitor => self.monitor,
        }
    }

    /// Returns the sum over all access types
    pub fn total(&self) -> usize {
        self.exclusive + self.shared + self.monitor
    }
}

/// Per-device access arbiter
///
/// Counters are atomics so they can be read without the lock; changes are
/// made under the arbiter lock so the check and the increment are one step.
/// The lock also guards the sealed flag.
#[derive(Debug, Default)]
pub struct AccessArbiter {
    sealed: Mutex<bool>,
    counters: [AtomicUsize; AccessType::COUNT],
}

impl AccessArbiter {
    /// Creates an arbiter with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a reference of type `access`
    ///
    /// Returns the new count for `access`.
    ///
    /// Fails with `DeviceRemoved` once the arbiter is sealed.
    pub fn acquire(&self, access: AccessType) -> Result<usize, CoreError> {
        let sealed = self.sealed.lock();
        if *sealed {
            return Err(CoreError::DeviceRemoved);
        }
        let counts = self.counts();
        if let Some(reason) = Self::refusal(access, &counts) {
            log::warn!("refusing {} access: {}", access, reason);
            return Err(CoreError::ResourceBusy(reason));
        }
        let count = self.counters[access.index()].fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("{} access acquired, count now {}", access, count);
        Ok(count)
    }

    /// Drops a reference of type `access`
    ///
    /// Releasing with a zero counter is a caller bug and is reported as
    /// `InvalidState`; the counter stays at zero.
    pub fn release(&self, access: AccessType) -> Result<usize, CoreError> {
        let _guard = self.sealed.lock();
        let counter = &self.counters[access.index()];
        let current = counter.load(Ordering::Acquire);
        if current == 0 {
            log::error!("{} access released more often than acquired", access);
            return Err(CoreError::InvalidState(format!(
                "{} access released without matching acquire",
                access
            )));
        }
        counter.store(current - 1, Ordering::Release);
        log::debug!("{} access released, count now {}", access, current - 1);
        Ok(current - 1)
    }

    /// Returns the number of holders of `access`
    pub fn count(&self, access: AccessType) -> usize {
        self.counters[access.index()].load(Ordering::Acquire)
    }

    /// Returns a snapshot of all counters
    pub fn counts(&self) -> AccessCounts {
        AccessCounts {
            exclusive: self.count(AccessType::Exclusive),
            shared: self.count(AccessType::Shared),
            monitor: self.count(AccessType::Monitor),
        }
    }

    /// Returns whether no reference of any type is held
    pub fn is_idle(&self) -> bool {
        self.counts().total() == 0
    }

    /// Refuses every later acquire, provided nobody holds the device
    ///
    /// Fails with `ResourceBusy` and leaves the arbiter open while any
    /// counter is non-zero.
    pub fn seal(&self) -> Result<(), CoreError> {
        let mut sealed = self.sealed.lock();
        let counts = self.counts();
        if counts.total() > 0 {
            return Err(CoreError::ResourceBusy(format!(
                "device still open (exclusive={}, shared={}, monitor={})",
                counts.exclusive, counts.shared, counts.monitor
            )));
        }
        *sealed = true;
        Ok(())
    }

    /// Seals regardless of holders; their releases still balance
    pub fn force_seal(&self) -> AccessCounts {
        let mut sealed = self.sealed.lock();
        *sealed = true;
        self.counts()
    }

    pub fn is_sealed(&self) -> bool {
        *self.sealed.lock()
    }

    fn refusal(access: AccessType, counts: &AccessCounts) -> Option<String> {
        match access {
            AccessType::Exclusive if counts.total() > 0 => Some(format!(
                "device in use (exclusive={}, shared={}, monitor={})",
                counts.exclusive, counts.shared, counts.monitor
            )),
            AccessType::Shared if counts.exclusive > 0 => {
                Some("device is exclusively held".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_exclusive_on_idle_device() {
        let arbiter = AccessArbiter::new();
        assert_eq!(arbiter.acquire(AccessType::Exclusive), Ok(1));
        assert!(!arbiter.is_idle());
        assert_eq!(arbiter.release(AccessType::Exclusive), Ok(0));
        assert!(arbiter.is_idle());
    }

    #[test]
    fn test_exclusive_refused_while_any_held() {
        for held in AccessType::ALL {
            let arbiter = AccessArbiter::new();
            arbiter.acquire(held).unwrap();
            let result = arbiter.acquire(AccessType::Exclusive);
            assert!(matches!(result, Err(CoreError::ResourceBusy(_))), "held {}", held);
            assert_eq!(arbiter.count(AccessType::Exclusive), held_exclusive(held));
        }
    }

    fn held_exclusive(held: AccessType) -> usize {
        usize::from(held == AccessType::Exclusive)
    }

    #[test]
    fn test_shared_refused_under_exclusive() {
        let arbiter = AccessArbiter::new();
        arbiter.acquire(AccessType::Exclusive).unwrap();
        assert!(matches!(
            arbiter.acquire(AccessType::Shared),
            Err(CoreError::ResourceBusy(_))
        ));
        // monitoring stays possible
        assert_eq!(arbiter.acquire(AccessType::Monitor), Ok(1));
    }

    #[test]
    fn test_shared_references_stack() {
        let arbiter = AccessArbiter::new();
        for expected in 1..=3 {
            assert_eq!(arbiter.acquire(AccessType::Shared), Ok(expected));
        }
        arbiter.release(AccessType::Shared).unwrap();
        arbiter.release(AccessType::Shared).unwrap();
        assert!(arbiter.acquire(AccessType::Exclusive).is_err());
        arbiter.release(AccessType::Shared).unwrap();
        assert!(arbiter.is_idle());
        assert!(arbiter.acquire(AccessType::Exclusive).is_ok());
    }

    #[test]
    fn test_release_underflow_is_reported() {
        let arbiter = AccessArbiter::new();
        let result = arbiter.release(AccessType::Monitor);
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
        assert_eq!(arbiter.count(AccessType::Monitor), 0);
    }

    #[test]
    fn test_seal_refused_while_held() {
        let arbiter = AccessArbiter::new();
        arbiter.acquire(AccessType::Monitor).unwrap();
        assert!(matches!(arbiter.seal(), Err(CoreError::ResourceBusy(_))));
        assert!(!arbiter.is_sealed());

        arbiter.release(AccessType::Monitor).unwrap();
        arbiter.seal().unwrap();
        assert_eq!(
            arbiter.acquire(AccessType::Monitor),
            Err(CoreError::DeviceRemoved)
        );
    }

    #[test]
    fn test_force_seal_keeps_releases_balanced() {
        let arbiter = AccessArbiter::new();
        arbiter.acquire(AccessType::Shared).unwrap();
        assert_eq!(arbiter.force_seal().shared, 1);
        assert!(arbiter.acquire(AccessType::Shared).is_err());
        assert_eq!(arbiter.release(AccessType::Shared), Ok(0));
        assert!(arbiter.is_idle());
    }

    #[test]
    fn test_seal_and_acquire_never_both_win() {
        for _ in 0..200 {
            let arbiter = Arc::new(AccessArbiter::new());
            let opener = {
                let arbiter = Arc::clone(&arbiter);
                thread::spawn(move || arbiter.acquire(AccessType::Exclusive).is_ok())
            };
            let sealed = arbiter.seal().is_ok();
            let opened = opener.join().unwrap();
            assert!(sealed != opened, "sealed={} opened={}", sealed, opened);
        }
    }

    #[test]
    fn test_access_type_from_raw() {
        assert_eq!(AccessType::try_from(0), Ok(AccessType::Exclusive));
        assert_eq!(AccessType::try_from(2), Ok(AccessType::Monitor));
        assert!(matches!(
            AccessType::try_from(3),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_concurrent_exclusive_has_single_winner() {
        let arbiter = Arc::new(AccessArbiter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let arbiter = Arc::clone(&arbiter);
                thread::spawn(move || arbiter.acquire(AccessType::Exclusive).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(arbiter.count(AccessType::Exclusive), 1);
    }

    #[test]
    fn test_counts_serialize() {
        let arbiter = AccessArbiter::new();
        arbiter.acquire(AccessType::Shared).unwrap();
        let json = serde_json::to_string(&arbiter.counts()).unwrap();
        assert_eq!(json, r#"{"exclusive":0,"shared":1,"monitor":0}"#);
    }
}
