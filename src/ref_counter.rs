//! RefCounter: a counted owner of one object plus the destructor that
//! disposes of it.
//!
//! The counter does no synchronization of its own. `RcHashTable` relies on
//! `&mut` access for exclusivity and `SyncRcHashTable` keeps every counter
//! behind its entry lock.

use crate::error::{Error, Release};
use core::fmt;

/// Caller-supplied disposal hook. Runs at most once per counted object.
pub type Destructor<T> = Box<dyn FnOnce(T) + Send>;

pub struct RefCounter<T> {
    object: Option<T>,
    destructor: Option<Destructor<T>>,
    count: usize,
}

impl<T> RefCounter<T> {
    /// Adopt `object` with a count of one.
    pub fn new(object: T, destructor: Option<Destructor<T>>) -> Self {
        Self {
            object: Some(object),
            destructor,
            count: 1,
        }
    }

    /// Acquire one more reference. Returns the new count.
    #[inline]
    pub fn incref(&mut self) -> Result<usize, Error> {
        if self.count == 0 {
            return Err(Error::AlreadyFreed);
        }
        let n = self.count.wrapping_add(1);
        if n == 0 {
            // Same policy as Rc: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        self.count = n;
        Ok(n)
    }

    /// Give back one reference, destroying the object when the count hits
    /// zero. Releasing an already freed counter is a no-op.
    #[inline]
    pub fn decref(&mut self) -> Release {
        let (released, disposal) = self.decref_deferred();
        if let Some(disposal) = disposal {
            disposal.run();
        }
        released
    }

    /// Like `decref`, but on the transition to zero the object is handed
    /// back with its destructor instead of being destroyed in place. The
    /// counter already reads as freed when the caller runs the disposal.
    pub fn decref_deferred(&mut self) -> (Release, Option<Disposal<T>>) {
        if self.count == 0 {
            return (Release::Freed, None);
        }
        self.count -= 1;
        if self.count == 0 {
            (Release::Freed, self.detach())
        } else {
            (Release::Live(self.count), None)
        }
    }

    /// Destroy the object regardless of outstanding references.
    pub fn force_free(&mut self) {
        self.count = 0;
        if let Some(disposal) = self.detach() {
            disposal.run();
        }
    }

    /// Swap in a new destructor, returning the previous one. Passing `None`
    /// detaches the object so that teardown merely drops it.
    pub fn set_destructor(&mut self, destructor: Option<Destructor<T>>) -> Option<Destructor<T>> {
        core::mem::replace(&mut self.destructor, destructor)
    }

    /// Move the object out without running the destructor. The count is left
    /// as is; once taken, teardown has nothing left to destroy.
    pub fn take_object(&mut self) -> Option<T> {
        self.object.take()
    }

    pub fn object(&self) -> Option<&T> {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> Option<&mut T> {
        self.object.as_mut()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_freed(&self) -> bool {
        self.count == 0
    }

    fn detach(&mut self) -> Option<Disposal<T>> {
        let object = self.object.take()?;
        Some(Disposal {
            object,
            destructor: self.destructor.take(),
        })
    }
}

/// An object whose count reached zero, detached together with its
/// destructor. Nothing else refers to it any more.
pub struct Disposal<T> {
    object: T,
    destructor: Option<Destructor<T>>,
}

impl<T> Disposal<T> {
    pub fn object(&self) -> &T {
        &self.object
    }

    /// Run the destructor, or just drop the object when there is none.
    pub fn run(self) {
        let Disposal { object, destructor } = self;
        match destructor {
            Some(d) => d(object),
            None => drop(object),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Disposal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposal")
            .field("object", &self.object)
            .field("has_destructor", &self.destructor.is_some())
            .finish()
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCounter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounter")
            .field("object", &self.object)
            .field("has_destructor", &self.destructor.is_some())
            .field("count", &self.count)
            .finish()
    }
}
