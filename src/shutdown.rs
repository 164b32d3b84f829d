//! Cooperative cancellation for the capture and replay loops.
//!
//! A [`ShutdownHandle`] is cloned into the interrupt handler; the running loop
//! holds the [`Shutdown`] side and checks it between record writes and while
//! waiting for a record's publish time. Dropping every handle counts as a
//! trigger.
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Sender<()>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        // A full channel already carries a pending trigger.
        let _ = self.tx.try_send(());
    }
}

#[derive(Debug)]
pub struct Shutdown {
    rx: Receiver<()>,
    tripped: AtomicBool,
}

pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = bounded(1);
    (ShutdownHandle { tx }, Shutdown { rx, tripped: AtomicBool::new(false) })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        if self.tripped.load(Ordering::Acquire) {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => self.trip(),
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Block for at most `timeout`. Returns true if shutdown was requested,
    /// false once the full timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.tripped.load(Ordering::Acquire) {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.trip(),
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Raw receiver for `select!` alongside other channels. A message or a
    /// disconnect on it must be followed by [`Shutdown::is_triggered`] or
    /// treated as a trigger directly.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    pub(crate) fn trip(&self) -> bool {
        self.tripped.store(true, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn wait_times_out_without_trigger() {
        let (_handle, sd) = channel();
        let t0 = Instant::now();
        assert!(!sd.wait(Duration::from_millis(30)));
        assert!(t0.elapsed() >= Duration::from_millis(30));
        assert!(!sd.is_triggered());
    }

    #[test]
    fn trigger_interrupts_wait_and_latches() {
        let (handle, sd) = channel();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.trigger();
            handle.trigger();
        });
        let t0 = Instant::now();
        assert!(sd.wait(Duration::from_secs(5)));
        assert!(t0.elapsed() < Duration::from_secs(1));
        t.join().unwrap();
        assert!(sd.is_triggered());
        assert!(sd.wait(Duration::from_secs(5)));
    }

    #[test]
    fn dropped_handles_count_as_trigger() {
        let (handle, sd) = channel();
        drop(handle);
        assert!(sd.is_triggered());
    }
}
