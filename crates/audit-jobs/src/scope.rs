//! Scoped connections.
//!
//! The warehouse client and the audit store must each be released exactly
//! once per run, whatever path the run takes. [`Scoped`] owns a connection
//! and closes it when dropped.

use std::ops::{Deref, DerefMut};

use tracing::debug;

/// A connection that can be released.
pub trait Closeable {
    /// Release the underlying connection. Implementations tolerate repeat calls.
    fn close(&mut self);
}

/// Owns a connection and closes it on drop.
pub struct Scoped<T: Closeable> {
    inner: T,
    name: &'static str,
}

impl<T: Closeable> Scoped<T> {
    pub fn new(name: &'static str, inner: T) -> Self {
        Self { inner, name }
    }
}

impl<T: Closeable> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Closeable> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Closeable> Drop for Scoped<T> {
    fn drop(&mut self) {
        debug!(connection = self.name, "releasing connection");
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting(Rc<Cell<u32>>);

    impl Closeable for Counting {
        fn close(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_closes_once_on_drop() {
        let closes = Rc::new(Cell::new(0));
        {
            let _scoped = Scoped::new("test", Counting(closes.clone()));
            assert_eq!(closes.get(), 0);
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_closes_on_early_return() {
        fn fails(closes: Rc<Cell<u32>>) -> Result<(), &'static str> {
            let _scoped = Scoped::new("test", Counting(closes));
            let step: Result<(), &'static str> = Err("boom");
            step?;
            Ok(())
        }

        let closes = Rc::new(Cell::new(0));
        assert!(fails(closes.clone()).is_err());
        assert_eq!(closes.get(), 1);
    }
}
