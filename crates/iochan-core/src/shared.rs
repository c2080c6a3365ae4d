//! Atomically reference-counted ownership handle
//!
//! Every channel, context and pool instance is held through `Shared<T>`.
//! The count lives next to the value in one heap block; handles are
//! created by `Shared::new`/`Shared::from_box` and by `clone()`, and the
//! value is destroyed inside the `drop()` that observes the count reach
//! zero.
//!
//! Memory ordering follows the classic discipline:
//! - acquiring a new handle is `Relaxed` (a clone already proves the
//!   object is live),
//! - releasing is `Release`, and the releaser that observes zero issues an
//!   `Acquire` fence before destroying, so every write made through any
//!   other handle happens-before the destructor.
//!
//! The value is stored boxed, which lets `T` be unsized:
//! `Shared<dyn Channel>` is built with `Shared::from_box(Box::new(ch))`.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};

/// Counts above this are treated as a leak and abort the process.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Heap block shared by all handles.
struct SharedBox<T: ?Sized> {
    /// Number of live handles. Starts at 0 (constructed, not yet owned).
    count: AtomicUsize,
    value: Box<T>,
}

impl<T: ?Sized> SharedBox<T> {
    #[inline]
    fn acquire(&self) {
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Returns `true` if this release dropped the count to zero.
    #[inline]
    fn release(&self) -> bool {
        if self.count.fetch_sub(1, Ordering::Release) != 1 {
            return false;
        }
        atomic::fence(Ordering::Acquire);
        true
    }
}

/// Owning handle to a reference-counted value.
///
/// No raw pointer to the value escapes the handle; the only way to end
/// ownership is to drop the handle.
pub struct Shared<T: ?Sized> {
    ptr: NonNull<SharedBox<T>>,
    _marker: PhantomData<SharedBox<T>>,
}

// Safety: same bounds as `Arc`: a handle can move the value's destruction
// to another thread (needs Send) and hands out `&T` to several threads
// (needs Sync).
unsafe impl<T: ?Sized + Send + Sync> Send for Shared<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Allocate `value` and return the first handle (count = 1).
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Shared<T> {
    /// Take ownership of an already-boxed (possibly unsized) value.
    pub fn from_box(value: Box<T>) -> Self {
        let block = Box::new(SharedBox {
            count: AtomicUsize::new(0),
            value,
        });
        let ptr = NonNull::from(Box::leak(block));
        let handle = Self { ptr, _marker: PhantomData };
        handle.block().acquire();
        handle
    }

    #[inline]
    fn block(&self) -> &SharedBox<T> {
        // Safety: the block stays allocated while any handle exists.
        unsafe { self.ptr.as_ref() }
    }

    /// Current number of handles. Diagnostic only: the value may change
    /// before the caller looks at it.
    pub fn ref_count(this: &Self) -> usize {
        this.block().count.load(Ordering::Acquire)
    }

    /// Whether two handles point at the same object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr.as_ptr() as *const u8 == b.ptr.as_ptr() as *const u8
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    #[inline]
    fn clone(&self) -> Self {
        self.block().acquire();
        Self { ptr: self.ptr, _marker: PhantomData }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        if self.block().release() {
            // Safety: count reached zero exactly once; no other handle
            // can observe the block any more.
            unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.block().value
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
