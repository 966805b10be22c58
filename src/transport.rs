//! Seams to the outside world: the byte transport and the clock.

use std::io;
use std::time::{Duration, Instant};

/// A duplex, non-blocking byte stream to the BMS.
pub trait Transport {
    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Reads up to `buf.len()` of the available bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        (**self).bytes_to_read()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }
}

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;

    fn sleep(&self, duration: Duration);
}

/// Clock backed by [`Instant`], counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now_ms() >= before + 2);
    }
}
