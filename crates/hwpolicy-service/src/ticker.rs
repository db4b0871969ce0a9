use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::service::PolicyService;

/// Background thread that calls [`PolicyService::decay`] on a fixed interval.
/// Dropping the ticker stops the thread and waits for it.
#[derive(Debug)]
pub struct DecayTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DecayTicker {
    /// Returns `Ok(None)` when `interval` is zero.
    pub fn spawn(service: Arc<PolicyService>, interval: Duration) -> io::Result<Option<Self>> {
        if interval.is_zero() {
            tracing::info!("decay ticker disabled");
            return Ok(None);
        }
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("hwpolicy-decay".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let applied = service.decay();
                        if applied.value {
                            tracing::debug!(
                                version = service.policy().version,
                                durable = applied.persistence.is_durable(),
                                "scheduled decay applied"
                            );
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        tracing::info!(interval_secs = interval.as_secs_f64(), "decay ticker started");
        Ok(Some(Self {
            stop: Some(stop),
            handle: Some(handle),
        }))
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("decay ticker thread panicked");
            }
        }
    }
}

impl Drop for DecayTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
