//! Dedicated timer thread for the collapse scheduler.
//!
//! Owns a current-thread tokio runtime. Countdown, start and tick tasks are
//! spawned through its [`Handle`]; none of them touch world state directly.

use std::io;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{info, warn};

pub const SCHEDULER_THREAD_NAME: &str = "tower-collapse-scheduler";

pub struct SchedulerThread {
    handle: Handle,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerThread {
    pub fn spawn() -> io::Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || {
                let rt = match Builder::new_current_thread().enable_time().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(rt.handle().clone()));
                rt.block_on(async {
                    let _ = stop_rx.await;
                });
                // pending timers are dropped with the runtime
                info!("Collapse scheduler thread stopped");
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "scheduler thread exited early"))??;

        info!(thread = SCHEDULER_THREAD_NAME, "Collapse scheduler thread started");
        Ok(Self {
            handle,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Stops the runtime and joins the thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Collapse scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
