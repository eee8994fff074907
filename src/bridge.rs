//! Bridge socket pair and cancellation token (spec §3, §9).
//!
//! Grounded on `original_source/include/nettalk.h`'s `socket_pair_t` (a
//! `socketpair(AF_UNIX, SOCK_STREAM, ...)` decoupling the cipher engine from
//! the audio/text pipelines) and its `reset_pipe` sentinel, redesigned per §9
//! as a cooperative, message-passing cancellation token rather than a raw
//! byte pipe a reader has to drain.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{NettalkError, Result};

/// A local socket pair decoupling the Forwarding Engine (`remote`) from the
/// Audio Pipeline and text plane (`local`).
pub struct Bridge {
    pub local: UnixStream,
    pub remote: UnixStream,
}

impl Bridge {
    pub fn new() -> Result<Self> {
        let (local, remote) = UnixStream::pair().map_err(NettalkError::Io)?;
        remote.set_nonblocking(true).map_err(NettalkError::Io)?;
        Ok(Self { local, remote })
    }
}

/// A cooperative cancellation signal: one send cancels every bounded wait
/// observing it. `cancel()` is idempotent; `is_cancelled()` is a cheap
/// non-blocking check usable from any number of clones, while `receiver()`
/// gives the one thread doing readiness polling a channel it can fold into a
/// `select!`.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { flag: Arc::new(AtomicBool::new(false)), tx, rx }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Drain any pending signal and clear the flag, readying the token for
    /// the Supervisor's next session attempt.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        while self.rx.try_recv().is_ok() {}
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_idempotent_and_observed_by_every_clone() {
        let token = CancelToken::new();
        let clone = token.clone();

        token.cancel();
        token.cancel(); // must not panic or block on a full bounded(1) channel

        assert!(clone.is_cancelled());
        assert!(token.receiver().recv_timeout(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn reset_clears_flag_and_pending_signal() {
        let token = CancelToken::new();
        token.cancel();
        token.reset();
        assert!(!token.is_cancelled());
        assert!(token.receiver().try_recv().is_err());
    }

    #[test]
    fn bridge_pair_is_bidirectional() {
        use std::io::{Read, Write};
        let bridge = Bridge::new().unwrap();
        let mut local = bridge.local;
        let mut remote = bridge.remote;
        remote.set_nonblocking(false).unwrap();

        local.write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }
}
