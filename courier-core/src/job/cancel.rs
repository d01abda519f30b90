// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cooperative cancellation.
//!
//! Jobs poll the token before every network round trip. Sub-operations that
//! can be torn down early (an upload stream) register a disposer that runs
//! once on cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CourierError;

type Disposer = Box<dyn FnOnce() + Send>;

const POLL_SLICE: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    disposers: Mutex<Vec<Disposer>>,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and runs registered disposers. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let disposers = std::mem::take(&mut *self.inner.disposers.lock());
        for dispose in disposers {
            dispose();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token is cancelled.
    pub fn check(&self) -> Result<(), CourierError> {
        if self.is_cancelled() {
            Err(CourierError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, returning `Err(Cancelled)` early if the token
    /// is cancelled meanwhile.
    pub fn sleep(&self, duration: Duration) -> Result<(), CourierError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(POLL_SLICE));
        }
    }

    /// Registers `dispose` to run on cancellation; runs it immediately if
    /// the token is already cancelled.
    pub fn on_cancel<F>(&self, dispose: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut disposers = self.inner.disposers.lock();
            if !self.is_cancelled() {
                disposers.push(Box::new(dispose));
                return;
            }
        }
        dispose();
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
