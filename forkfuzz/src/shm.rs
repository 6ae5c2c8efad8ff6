//! Memory that stays shared between a process and every process it forks afterwards.
//!
//! A region is backed by an unlinked temporary file mapped with `MAP_SHARED`, so
//! all processes forked after its creation see the same physical pages.

use std::{
    fmt::{
        Debug,
        Formatter,
    },
    marker::PhantomData,
    ops::Deref,
};

use memmap2::{
    MmapMut,
    MmapOptions,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedMemoryError {
    #[error("Attempted to create a zero-length shared region")]
    EmptyRegion,

    #[error("Shared region of {0} elements is too large")]
    TooLarge(usize),

    #[error("Can't create the backing file: {0}")]
    Backing(std::io::Error),

    #[error("Can't map shared memory: {0}")]
    Map(std::io::Error),
}

/// Types that may be placed into a shared region.
///
/// # Safety
/// The all-zero bit pattern must be a valid value of the type, and the type must not
/// contain pointers into process-private memory. Every field that is written after
/// the first fork must be an atomic.
pub unsafe trait Shareable: Sync {}

unsafe impl Shareable for std::sync::atomic::AtomicBool {}
unsafe impl Shareable for std::sync::atomic::AtomicU32 {}
unsafe impl Shareable for std::sync::atomic::AtomicU64 {}
unsafe impl Shareable for std::sync::atomic::AtomicI32 {}
unsafe impl Shareable for std::sync::atomic::AtomicI64 {}

/// A fixed number of zero-initialized `T`s in shared memory
pub struct SharedSlice<T: Shareable> {
    map: MmapMut,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Shareable> SharedSlice<T> {
    pub fn new(len: usize) -> Result<Self, SharedMemoryError> {
        if len == 0 || std::mem::size_of::<T>() == 0 {
            return Err(SharedMemoryError::EmptyRegion);
        }

        let size = std::mem::size_of::<T>().checked_mul(len).ok_or(SharedMemoryError::TooLarge(len))?;
        let file = tempfile::tempfile().map_err(SharedMemoryError::Backing)?;
        file.set_len(size as u64).map_err(SharedMemoryError::Backing)?;

        let map = unsafe { MmapOptions::new().len(size).map_mut(&file) }.map_err(SharedMemoryError::Map)?;
        debug_assert_eq!(map.as_ptr() as usize % std::mem::align_of::<T>(), 0);

        Ok(Self {
            map,
            len,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T: Shareable> Deref for SharedSlice<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // The mapping is page aligned, zero filled and lives as long as self
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const T, self.len) }
    }
}

impl<T: Shareable> Debug for SharedSlice<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSlice<{}>[{}]", std::any::type_name::<T>(), self.len)
    }
}

/// A single zero-initialized `T` in shared memory
#[derive(Debug)]
pub struct Shared<T: Shareable> {
    inner: SharedSlice<T>,
}

impl<T: Shareable> Shared<T> {
    pub fn new() -> Result<Self, SharedMemoryError> {
        Ok(Self {
            inner: SharedSlice::new(1)?,
        })
    }
}

impl<T: Shareable> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner[0]
    }
}
