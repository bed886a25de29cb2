// Drydock
// Copyright (C) 2025 - Drydock Project Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Cooperative cancellation. A `CancelToken` is cloned into every workflow,
//! session and API client; each checks it before starting work and between
//! bounded waits. Cancellation is a distinct ABORTED outcome, not an error
//! in the failure sense.

use crate::error::{DrydockError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with `Cancelled` if the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DrydockError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep in short slices so a cancel lands within ~100ms instead of the
    /// full backoff delay. Returns `Cancelled` when interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        const SLICE: Duration = Duration::from_millis(100);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            self.check()?;
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        self.check()
    }
}

/// Trip the token on ctrl-c. Runs a small current-thread runtime on a
/// background thread; the watcher lives for the remainder of the process.
pub fn install_ctrl_c_handler(token: &CancelToken) {
    let token = token.clone();
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(_) => return,
        };
        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    });
}
