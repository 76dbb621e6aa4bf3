//! Backing storage for the global pools, and borrowed views of it.
//!
//! A master owns its [`PoolStorage`] through an `Arc`. Secondaries hold a
//! [`PoolView`]: a `Weak` reference plus the address range they may carve
//! from. Dropping the master's storage turns every outstanding view into
//! [`MemoryError::PoolUninitialized`] instead of a dangling range.

use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::MemoryError;

/// Host bytes of one pool plus the length of its device counterpart.
///
/// Device memory belongs to the accelerator backend; only its extent is
/// tracked here.
#[derive(Debug)]
pub struct PoolStorage {
    host: Mutex<Vec<u8>>,
    host_len: usize,
    device_len: usize,
}

/// Shared handle to a pool.
pub type SharedPool = Arc<PoolStorage>;

impl PoolStorage {
    /// Allocate a zeroed host pool of `host_len` bytes and record a
    /// device pool of `device_len` bytes.
    pub fn new(host_len: usize, device_len: usize) -> SharedPool {
        Arc::new(Self {
            host: Mutex::new(vec![0; host_len]),
            host_len,
            device_len,
        })
    }

    /// Host pool size in bytes.
    pub fn host_len(&self) -> usize {
        self.host_len
    }

    /// Device pool size in bytes.
    pub fn device_len(&self) -> usize {
        self.device_len
    }

    /// Run `f` on the host bytes in `range`.
    pub(crate) fn with_host<R>(
        &self,
        range: Range<usize>,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemoryError> {
        let mut bytes = self.host.lock().unwrap_or_else(PoisonError::into_inner);
        let slice = bytes
            .get_mut(range.clone())
            .ok_or_else(|| MemoryError::InvalidConfig {
                reason: format!(
                    "range {:#x}..{:#x} outside host pool of {} bytes",
                    range.start, range.end, self.host_len
                ),
            })?;
        Ok(f(slice))
    }
}

/// Non-owning view of a master's pool, handed to a secondary.
#[derive(Clone, Debug)]
pub struct PoolView {
    storage: Weak<PoolStorage>,
    host: Range<usize>,
    device: Option<Range<usize>>,
}

impl PoolView {
    pub(crate) fn new(storage: &SharedPool, host: Range<usize>, device: Option<Range<usize>>) -> Self {
        Self {
            storage: Arc::downgrade(storage),
            host,
            device,
        }
    }

    /// Host addresses the view covers.
    pub fn host_range(&self) -> Range<usize> {
        self.host.clone()
    }

    /// Device addresses the view covers.
    pub fn device_range(&self) -> Option<Range<usize>> {
        self.device.clone()
    }

    /// Whether the master's storage is still alive.
    pub fn is_live(&self) -> bool {
        self.storage.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Result<SharedPool, MemoryError> {
        self.storage.upgrade().ok_or(MemoryError::PoolUninitialized)
    }
}

/// Where a manager's pool bytes come from.
#[derive(Clone, Debug, Default)]
pub(crate) enum Backing {
    /// No pool installed.
    #[default]
    None,
    /// This manager owns the pool.
    Owned(SharedPool),
    /// Borrowed from a master.
    Borrowed(PoolView),
}

impl Backing {
    pub(crate) fn storage(&self) -> Result<SharedPool, MemoryError> {
        match self {
            Self::None => Err(MemoryError::PoolUninitialized),
            Self::Owned(pool) => Ok(Arc::clone(pool)),
            Self::Borrowed(view) => view.upgrade(),
        }
    }

    pub(crate) fn is_installed(&self) -> bool {
        match self {
            Self::None => false,
            Self::Owned(_) => true,
            Self::Borrowed(view) => view.is_live(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_bytes_are_zeroed_and_writable() {
        let pool = PoolStorage::new(64, 128);
        assert_eq!(pool.device_len(), 128);
        pool.with_host(8..16, |b| b.fill(7)).unwrap();
        let sum: u32 = pool
            .with_host(0..64, |b| b.iter().map(|&x| u32::from(x)).sum())
            .unwrap();
        assert_eq!(sum, 56);
    }

    #[test]
    fn out_of_range_rejected() {
        let pool = PoolStorage::new(16, 0);
        assert!(pool.with_host(8..32, |_| ()).is_err());
    }

    #[test]
    fn view_dies_with_owner() {
        let pool = PoolStorage::new(16, 0);
        let view = PoolView::new(&pool, 4..16, None);
        let backing = Backing::Borrowed(view.clone());
        assert!(backing.is_installed());
        drop(pool);
        assert!(!view.is_live());
        assert!(!backing.is_installed());
        assert!(matches!(backing.storage(), Err(MemoryError::PoolUninitialized)));
    }
}
