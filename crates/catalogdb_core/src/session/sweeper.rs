//! Background expiry of idle sessions.

use super::SessionRegistry;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Thread that periodically expires idle sessions.
#[derive(Debug)]
pub(crate) struct SessionSweeper {
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSweeper {
    pub(crate) fn spawn(registry: Arc<SessionRegistry>, timeout: Duration, interval: Duration) -> CoreResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("catalogdb-session-sweep".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    thread::park_timeout(interval);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    let expired = registry.sweep(timeout);
                    if expired > 0 {
                        debug!(expired, "idle sessions expired");
                    }
                }
            })
            .map_err(|e| CoreError::invalid_operation(format!("failed to spawn session sweep thread: {e}")))?;
        Ok(Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stops the thread and waits for it.
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for SessionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
