use std::ops::{Deref, DerefMut};

/// Something holding external resources that must be released when its
/// owner goes away.
pub trait Shutdown {
    /// Releases the resources according to the configured shutdown mode.
    /// Failures are logged, there is nobody left to report them to.
    fn shutdown(&mut self);
}

/// Owns a value and shuts it down when dropped, including during unwinding
/// of a failed test.
pub struct ShutdownGuard<T: Shutdown> {
    inner: T,
    armed: bool,
}

impl<T: Shutdown> ShutdownGuard<T> {
    pub fn new(inner: T) -> Self {
        ShutdownGuard { inner, armed: true }
    }

    /// Keeps the resources alive past the guard, e.g. to reuse a container
    /// in the next run.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Shuts down now instead of at drop. Later calls do nothing.
    pub fn shutdown_now(&mut self) {
        if self.armed {
            self.armed = false;
            self.inner.shutdown();
        }
    }
}

impl<T: Shutdown> Deref for ShutdownGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Shutdown> DerefMut for ShutdownGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Shutdown> Drop for ShutdownGuard<T> {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
