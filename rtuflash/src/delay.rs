//! Blocking waits for device settle and retry backoff.

use std::thread;
use std::time::Duration;

/// Something that can block the current run for a fixed time.
pub trait Delay {
    /// Wait for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// Waits with [`thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration);
    }
}
