//! Session state owned exclusively by the Supervisor (spec §3 Data Model,
//! §5 Concurrency & Resource Model "Ownership").
//!
//! Generalized from `original_source/include/nettalk.h`'s
//! `nettalk_session_t`/`nettalk_context_t`, broken up per the redesign note
//! in §9: rather than one god-context threads reach into, the Supervisor
//! holds a `Session` and hands narrow borrows (bridge ends, cipher
//! directions, the reset flags, the cancel token, the message timestamp
//! ring) to the Forwarding Engine and Audio Pipeline threads it spawns.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::audio::capture::ResetFlags;
use crate::bridge::{Bridge, CancelToken};
use crate::cipher::SessionCipher;

const MAX_TIMESTAMPS: usize = 48;

/// Ring of recent message timestamps, retained only for UI-facing display
/// (spec §3: "used only for UI retention, not protocol").
#[derive(Default)]
pub struct MessageTimestamps {
    ring: VecDeque<SystemTime>,
}

impl MessageTimestamps {
    pub fn new() -> Self {
        Self { ring: VecDeque::with_capacity(MAX_TIMESTAMPS) }
    }

    pub fn record(&mut self, at: SystemTime) {
        if self.ring.len() == MAX_TIMESTAMPS {
            self.ring.pop_front();
        }
        self.ring.push_back(at);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemTime> {
        self.ring.iter()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// A single live session's shared resources, constructed fresh on every
/// reconnect attempt by the Supervisor.
pub struct Session {
    pub bridge: Bridge,
    pub cancel: CancelToken,
    pub reset_flags: Arc<ResetFlags>,
    pub cipher: SessionCipher,
    pub timestamps: Arc<Mutex<MessageTimestamps>>,
}

impl Session {
    pub fn new(cipher: SessionCipher, cancel: CancelToken) -> std::io::Result<Self> {
        Ok(Self {
            bridge: Bridge::new()?,
            cancel,
            reset_flags: Arc::new(ResetFlags::default()),
            cipher,
            timestamps: Arc::new(Mutex::new(MessageTimestamps::new())),
        })
    }
}

/// Minimum online duration below which a dropped session is treated as a
/// fast failure rather than a graceful close (spec §9, mirrors
/// `nettask.c`'s `ts + 2 >= time(NULL)` retry-delay check).
pub const FAST_FAILURE_WINDOW: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let mut ts = MessageTimestamps::new();
        let base = SystemTime::UNIX_EPOCH;
        for i in 0..MAX_TIMESTAMPS + 5 {
            ts.record(base + Duration::from_secs(i as u64));
        }
        assert_eq!(ts.len(), MAX_TIMESTAMPS);
        let first = *ts.iter().next().unwrap();
        assert_eq!(first, base + Duration::from_secs(5));
    }
}
