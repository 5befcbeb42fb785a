use std::thread;
use std::time::Duration;

/// Blocking, bounded polling: wait `interval`, probe, repeat up to `attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Poll {
    /// Used to confirm that a freshly submitted torrent shows up in the backend.
    pub const SUBMISSION: Poll = Poll {
        attempts: 10,
        interval: Duration::from_secs(2),
    };

    pub fn new(attempts: u32, interval: Duration) -> Self {
        Poll { attempts, interval }
    }

    /// Returns true as soon as `probe` does, false once the attempts run out.
    pub fn until<F>(&self, mut probe: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for attempt in 1..=self.attempts {
            thread::sleep(self.interval);
            if probe() {
                return true;
            }
            log::debug!("Attempt {attempt}/{} came back empty", self.attempts);
        }
        false
    }
}
