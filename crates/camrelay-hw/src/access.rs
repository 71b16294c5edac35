//! Per-device access bookkeeping: one exclusive holder, or any number of
//! read-only holders, never both.

use crate::backend::{AccessMode, DeviceError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Current holders of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Holders {
    pub exclusive: bool,
    pub readers: usize,
}

/// Shared registry of device holders. Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct AccessRegistry {
    inner: Arc<Mutex<HashMap<String, Holders>>>,
}

impl AccessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` in `mode`, or fail with [`DeviceError::Busy`].
    pub fn acquire(&self, id: &str, mode: AccessMode) -> Result<AccessGuard, DeviceError> {
        let mut map = self.lock();
        let holders = map.entry(id.to_string()).or_default();
        match mode {
            AccessMode::Exclusive => {
                if holders.exclusive {
                    return Err(DeviceError::Busy(format!("{id} is held exclusively")));
                }
                if holders.readers > 0 {
                    return Err(DeviceError::Busy(format!(
                        "{id} has {} read-only session(s) open",
                        holders.readers
                    )));
                }
                holders.exclusive = true;
            }
            AccessMode::ReadOnly => {
                if holders.exclusive {
                    return Err(DeviceError::Busy(format!("{id} is held exclusively")));
                }
                holders.readers += 1;
            }
        }
        tracing::trace!(device = id, ?mode, "access acquired");
        Ok(AccessGuard {
            registry: self.clone(),
            id: id.to_string(),
            mode,
            held: true,
        })
    }

    pub fn holders(&self, id: &str) -> Holders {
        self.lock().get(id).copied().unwrap_or_default()
    }

    fn release(&self, id: &str, mode: AccessMode) {
        let mut map = self.lock();
        let Some(holders) = map.get_mut(id) else {
            return;
        };
        match mode {
            AccessMode::Exclusive => holders.exclusive = false,
            AccessMode::ReadOnly => holders.readers = holders.readers.saturating_sub(1),
        }
        if *holders == Holders::default() {
            map.remove(id);
        }
        tracing::trace!(device = id, ?mode, "access released");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Holders>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Holds a claim on a device until released or dropped.
#[derive(Debug)]
pub struct AccessGuard {
    registry: AccessRegistry,
    id: String,
    mode: AccessMode,
    held: bool,
}

impl AccessGuard {
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Give up the claim. Idempotent.
    pub fn release(&mut self) {
        if std::mem::take(&mut self.held) {
            self.registry.release(&self.id, self.mode);
        }
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "DEV_000F314C6B39";

    #[test]
    fn test_exclusive_blocks_everything() {
        let reg = AccessRegistry::new();
        let _g = reg.acquire(ID, AccessMode::Exclusive).unwrap();
        assert!(matches!(
            reg.acquire(ID, AccessMode::Exclusive),
            Err(DeviceError::Busy(_))
        ));
        assert!(matches!(
            reg.acquire(ID, AccessMode::ReadOnly),
            Err(DeviceError::Busy(_))
        ));
    }

    #[test]
    fn test_readers_coexist_but_block_exclusive() {
        let reg = AccessRegistry::new();
        let a = reg.acquire(ID, AccessMode::ReadOnly).unwrap();
        let b = reg.acquire(ID, AccessMode::ReadOnly).unwrap();
        assert_eq!(reg.holders(ID).readers, 2);
        assert!(reg.acquire(ID, AccessMode::Exclusive).is_err());
        drop(a);
        drop(b);
        assert!(reg.acquire(ID, AccessMode::Exclusive).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let reg = AccessRegistry::new();
        let mut g = reg.acquire(ID, AccessMode::ReadOnly).unwrap();
        let _other = reg.acquire(ID, AccessMode::ReadOnly).unwrap();
        g.release();
        g.release();
        drop(g);
        assert_eq!(reg.holders(ID).readers, 1);
    }

    #[test]
    fn test_devices_are_independent() {
        let reg = AccessRegistry::new();
        let _g = reg.acquire(ID, AccessMode::Exclusive).unwrap();
        assert!(reg.acquire("DEV_000F314C611E", AccessMode::Exclusive).is_ok());
    }
}
