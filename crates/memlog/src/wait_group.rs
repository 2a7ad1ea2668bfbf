use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counts outstanding work and lets a thread block until it drains.
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        *self.count.lock().expect("wait group lock poisoned") += n;
    }

    /// Mark one unit of work complete.
    pub fn done(&self) {
        let mut count = self
            .count
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        debug_assert!(*count > 0, "WaitGroup::done without matching add");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().expect("wait group lock poisoned")
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let count = self.count.lock().expect("wait group lock poisoned");
        let _count = self
            .zero
            .wait_while(count, |c| *c > 0)
            .expect("wait group lock poisoned");
    }

    /// Block until the count reaches zero or `timeout` elapses. Returns
    /// `true` if the count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().expect("wait group lock poisoned");
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .zero
                .wait_timeout(count, deadline - now)
                .expect("wait group lock poisoned")
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_on_empty_returns() {
        let wg = WaitGroup::new();
        wg.wait();
        assert!(wg.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_blocks_until_done() {
        let wg = Arc::new(WaitGroup::new());
        wg.add(3);

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let wg = Arc::clone(&wg);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10 * (i + 1)));
                    wg.done();
                })
            })
            .collect();

        wg.wait();
        assert_eq!(wg.count(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_timeout_expires() {
        let wg = WaitGroup::new();
        wg.add(1);
        assert!(!wg.wait_timeout(Duration::from_millis(20)));
        assert_eq!(wg.count(), 1);
        wg.done();
        assert!(wg.wait_timeout(Duration::from_millis(20)));
    }
}
