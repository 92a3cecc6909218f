//! World Runner - one thread per world, executing jobs in submission order
//!
//! ```text
//! scheduler thread ──submit(WorldJob)──┐
//! axum handler ─────with_world(f)──────┼─► mpsc ─► "world-<id>" thread ─► &mut SimWorld
//!                                      │                                        │
//!          oneshot::Receiver ◄─────────┴──────────── oneshot::Sender ◄──────────┘
//! ```
//!
//! Jobs never overlap, so the simulated world needs no locking of its own.

use collapse_core::error::HostError;
use collapse_core::host::{WorldContext, WorldJob, WorldRegistry};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::sim_world::SimWorld;

type SimJob = Box<dyn FnOnce(&mut SimWorld) + Send + 'static>;

pub struct WorldRunner {
    id: String,
    sender: Mutex<Option<mpsc::UnboundedSender<SimJob>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorldRunner {
    pub fn spawn(mut world: SimWorld) -> io::Result<Arc<Self>> {
        let id = world.id().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<SimJob>();
        let thread = std::thread::Builder::new()
            .name(format!("world-{id}"))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job(&mut world);
                }
                debug!(world = world.id(), "World runner drained");
            })?;
        info!(world = %id, "World runner started");
        Ok(Arc::new(Self {
            id,
            sender: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    fn send(&self, job: SimJob) -> Result<(), HostError> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| HostError::WorldClosed(self.id.clone()))?;
        sender
            .send(job)
            .map_err(|_| HostError::WorldClosed(self.id.clone()))
    }

    /// Runs `f` on the world thread and waits for its result
    pub async fn with_world<T, F>(&self, f: F) -> Result<T, HostError>
    where
        F: FnOnce(&mut SimWorld) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(Box::new(move |world| {
            let _ = tx.send(f(world));
        }))?;
        rx.await.map_err(|_| HostError::WorldClosed(self.id.clone()))
    }

    /// Stops accepting jobs, lets queued ones finish, joins the thread.
    /// Must not be called from the world thread itself.
    pub fn close(&self) {
        self.sender.lock().take();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
            info!(world = %self.id, "World runner stopped");
        }
    }
}

impl WorldContext for WorldRunner {
    fn world_id(&self) -> &str {
        &self.id
    }

    fn submit(&self, job: WorldJob) -> Result<(), HostError> {
        self.send(Box::new(move |world: &mut SimWorld| job(world)))
    }
}

// ============================================================================
// Directory
// ============================================================================

/// Live worlds by id, mirrored into the [`WorldRegistry`] the scheduler reads
pub struct WorldDirectory {
    registry: Arc<WorldRegistry>,
    runners: RwLock<HashMap<String, Arc<WorldRunner>>>,
}

impl WorldDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: WorldRegistry::new(),
            runners: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<WorldRegistry> {
        &self.registry
    }

    pub fn insert(&self, runner: Arc<WorldRunner>) {
        self.registry.register(runner.clone());
        self.runners.write().insert(runner.id.clone(), runner);
    }

    pub fn get(&self, world_id: &str) -> Option<Arc<WorldRunner>> {
        self.runners.read().get(world_id).cloned()
    }

    pub fn world_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runners.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn shutdown_all(&self) {
        let runners: Vec<Arc<WorldRunner>> = self.runners.write().drain().map(|(_, r)| r).collect();
        for runner in runners {
            self.registry.unregister(&runner.id);
            runner.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collapse_core::host::run_in_world;

    #[tokio::test]
    async fn test_jobs_run_in_order_on_world_thread() {
        let runner = WorldRunner::spawn(SimWorld::new("overworld")).unwrap();
        for i in 0..5 {
            runner
                .with_world(move |w| w.set_block(i, 64, 0, crate::sim_world::SimBlock::solid("Rock_Stone")))
                .await
                .unwrap();
        }
        let name = runner
            .with_world(|_| std::thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("world-overworld"));
        assert_eq!(runner.with_world(|w| w.block_count()).await.unwrap(), 5);
        runner.close();
    }

    #[tokio::test]
    async fn test_host_jobs_through_context() {
        let runner = WorldRunner::spawn(SimWorld::new("overworld")).unwrap();
        let ctx: Arc<dyn WorldContext> = runner.clone();
        let id = run_in_world(ctx.as_ref(), |w| w.world_id().to_string()).await.unwrap();
        assert_eq!(id, "overworld");
        runner.close();
    }

    #[tokio::test]
    async fn test_closed_runner_rejects_jobs() {
        let runner = WorldRunner::spawn(SimWorld::new("nether")).unwrap();
        runner.close();
        let result = runner.with_world(|w| w.block_count()).await;
        assert_eq!(result, Err(HostError::WorldClosed("nether".into())));
    }

    #[tokio::test]
    async fn test_directory_registers_and_shuts_down() {
        let dir = WorldDirectory::new();
        dir.insert(WorldRunner::spawn(SimWorld::new("overworld")).unwrap());
        assert!(dir.registry().get("overworld").is_some());
        assert_eq!(dir.world_ids(), vec!["overworld".to_string()]);
        dir.shutdown_all();
        assert!(dir.get("overworld").is_none());
        assert!(dir.registry().get("overworld").is_none());
    }
}
