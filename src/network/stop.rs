//! Cooperative cancellation shared by every worker

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slice used when a blocking push has to re-check for stop
const PUSH_SLICE: Duration = Duration::from_millis(100);

/// Stop flag plus a channel that disconnects on stop, so timed waits wake
/// immediately instead of sleeping out their interval.
#[derive(Debug, Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    wake: Receiver<()>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(tx))),
            wake: rx,
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.trigger.lock().take();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` or until stopped. Returns true when stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.wake.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_stopped(),
        }
    }

    /// Receiver that disconnects on stop, for use in `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.wake
    }

    /// Push into a bounded channel, blocking while it is full but giving up
    /// on stop or disconnect. Returns true when the item was queued.
    pub fn send_blocking<T>(&self, tx: &Sender<T>, mut item: T) -> bool {
        loop {
            match tx.send_timeout(item, PUSH_SLICE) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.is_stopped() {
                        return false;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_when_running() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        stop.stop();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_send_blocking_gives_up_on_stop() {
        let stop = StopSignal::new();
        let (tx, _rx) = bounded::<u8>(1);
        assert!(stop.send_blocking(&tx, 1));
        stop.stop();
        assert!(!stop.send_blocking(&tx, 2));
    }
}
