//! Collapse scheduler: countdown, delay, tick-driven implosion, cleanup
//!
//! ## Architecture
//! ```text
//!             trigger()                    start timer             interval(tick_ms)
//!   Idle ───────────────► Scheduled ─────────────────► Imploding ───────────────┐
//!                          │    ▲                        │                      │
//!                 delay()  └────┘ cancel + reschedule     │ ImplosionRun::step  │
//!                                                         │ (inside the world)  │
//!                                                         ▼                      │
//!                                            cursor < ruin floor ◄──────────────┘
//!                                                         │
//!                                                         ▼
//!                                          Complete: entry removed, follow-up sweeps
//! ```
//!
//! All timers are tasks on the scheduler runtime ([`SchedulerThread`]). They
//! never touch blocks or entities directly; every world access is a job
//! submitted to that world's [`WorldContext`].

mod implosion;
mod thread;

pub use implosion::{CompletionPlan, ImplosionRun, TickStep};
pub use thread::SchedulerThread;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CollapseConfig;
use crate::constants::{COUNTDOWN_CHECKPOINTS, FOLLOW_UP_SWEEP_SECS, MAX_DELAY_REMAINING_SECS};
use crate::error::CollapseError;
use crate::host::{run_in_world, HostWorld, WorldContext, WorldRegistry};
use crate::removal::EffectEmitter;
use crate::state::{
    CancelHandle, CollapsePhase, SharedState, StructureKey, StructureState, StructureStatus,
    TowerStateStore,
};

// ============================================================================
// Countdown arithmetic
// ============================================================================

/// `(fire_after_secs, seconds_left)` for every checkpoint that fits into
/// `delay_secs`. Checkpoints at or past the start are skipped.
pub fn countdown_checkpoints(delay_secs: u64) -> Vec<(u64, u64)> {
    COUNTDOWN_CHECKPOINTS
        .iter()
        .filter(|&&left| delay_secs > left)
        .map(|&left| (delay_secs - left, left))
        .collect()
}

/// Remaining seconds after adding `extra`, capped at 180.
///
/// `None` when the countdown already exceeds the cap, since any capped
/// result would shorten it.
pub fn delayed_remaining(remaining: u64, extra: u64) -> Option<u64> {
    if remaining > MAX_DELAY_REMAINING_SECS {
        return None;
    }
    Some(remaining.saturating_add(extra).min(MAX_DELAY_REMAINING_SECS))
}

/// Monotonic and wall-clock start of a countdown
#[derive(Debug, Clone, Copy)]
struct StartDeadline {
    delay_secs: u64,
    at: Instant,
    epoch_ms: i64,
}

impl StartDeadline {
    /// `None` when either clock cannot represent the start
    fn after(delay_secs: u64) -> Option<Self> {
        let delay_secs = delay_secs.max(1);
        let at = Instant::now().checked_add(Duration::from_secs(delay_secs))?;
        let epoch_ms = i64::try_from(delay_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .and_then(|ms| chrono::Utc::now().timestamp_millis().checked_add(ms))?;
        Some(Self {
            delay_secs,
            at,
            epoch_ms,
        })
    }
}

pub fn shudder_message(delay_secs: u64) -> String {
    format!("The tower shudders... it will implode in {delay_secs} seconds!")
}

pub fn checkpoint_message(seconds_left: u64) -> String {
    format!("Tower implodes in {seconds_left} seconds!")
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct CollapseScheduler {
    store: Arc<TowerStateStore>,
    worlds: Arc<WorldRegistry>,
    runtime: Handle,
    config: RwLock<CollapseConfig>,
    effects: EffectEmitter,
    follow_ups: Mutex<Vec<CancelHandle>>,
    /// Scheduled → Imploding transitions; one tick loop each
    implosions_started: AtomicU64,
    implosions_completed: AtomicU64,
}

impl CollapseScheduler {
    pub fn new(
        store: Arc<TowerStateStore>,
        worlds: Arc<WorldRegistry>,
        runtime: Handle,
        config: CollapseConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            worlds,
            runtime,
            config: RwLock::new(config.clamped()),
            effects: EffectEmitter::new(),
            follow_ups: Mutex::new(Vec::new()),
            implosions_started: AtomicU64::new(0),
            implosions_completed: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &Arc<TowerStateStore> {
        &self.store
    }

    pub fn worlds(&self) -> &Arc<WorldRegistry> {
        &self.worlds
    }

    pub fn config(&self) -> CollapseConfig {
        self.config.read().clone()
    }

    /// Replaces the live config; running countdowns keep their timing
    pub fn apply_config(&self, config: CollapseConfig) {
        let clamped = config.clamped();
        info!(?clamped, "Collapse config applied");
        *self.config.write() = clamped;
    }

    /// Idle → Scheduled. Returns false (and changes nothing) when the
    /// structure is already scheduled or imploding, or when `delay_secs`
    /// is too large for the clocks to represent.
    pub fn trigger(self: &Arc<Self>, key: &StructureKey, base_y: i32, delay_secs: u64) -> bool {
        let Some(deadline) = StartDeadline::after(delay_secs) else {
            warn!(structure = %key, delay_secs, "Collapse delay out of range; not scheduled");
            return false;
        };
        let shared = self.store.get_or_create(key);
        let announcement = {
            let mut state = shared.lock();
            if state.collapse_scheduled() {
                debug!(structure = %key, "Collapse already scheduled");
                return false;
            }
            state.phase = CollapsePhase::Scheduled;
            state.base_y = base_y;
            self.schedule_start_locked(key, &shared, &mut state, deadline)
        };
        info!(structure = %key, base_y, delay_secs, "Collapse scheduled");
        self.announce(key, announcement);
        true
    }

    /// `trigger` with the configured delay
    pub fn trigger_default(self: &Arc<Self>, key: &StructureKey, base_y: i32) -> bool {
        let delay = self.config.read().delay_seconds;
        self.trigger(key, base_y, delay)
    }

    /// Pushes a pending start back by `extra_secs`; returns the new
    /// remaining seconds.
    pub fn delay(self: &Arc<Self>, key: &StructureKey, extra_secs: u64) -> Result<u64, CollapseError> {
        if extra_secs == 0 {
            return Err(CollapseError::InvalidDelay);
        }
        let shared = self.store.get(key).ok_or(CollapseError::NoPendingCollapse)?;

        let (new_remaining, announcement) = {
            let mut state = shared.lock();
            match state.phase {
                CollapsePhase::Imploding => return Err(CollapseError::AlreadyImploding),
                CollapsePhase::Idle => return Err(CollapseError::NoPendingCollapse),
                CollapsePhase::Scheduled => {}
            }
            let remaining = state.remaining_seconds(Instant::now()).unwrap_or(0);
            let new_remaining =
                delayed_remaining(remaining, extra_secs).ok_or(CollapseError::DelayCapReached)?;
            let deadline = StartDeadline::after(new_remaining).ok_or(CollapseError::InvalidDelay)?;
            let msg = self.schedule_start_locked(key, &shared, &mut state, deadline);
            (new_remaining, msg)
        };

        info!(structure = %key, extra_secs, new_remaining, "Collapse delayed");
        self.announce(key, announcement);
        Ok(new_remaining)
    }

    /// Smallest positive remaining time among pending collapses within
    /// `radius` of `(x, z)`.
    pub fn nearest_pending_remaining_seconds(
        &self,
        world_id: &str,
        x: i32,
        z: i32,
        radius: i32,
    ) -> Option<u64> {
        let r = radius.max(1) as f64;
        let now = Instant::now();
        let mut best: Option<u64> = None;
        self.store.for_each(
            |key| key.world_id == world_id && key.horizontal_distance_sq(x as f64, z as f64) <= r * r,
            |_, shared| {
                if let Some(remaining) = pending_remaining(&shared.lock(), now) {
                    best = Some(best.map_or(remaining, |b| b.min(remaining)));
                }
            },
        );
        best
    }

    /// Delays the closest pending collapse within `radius` of `(x, z)`
    pub fn delay_nearest_pending(
        self: &Arc<Self>,
        world_id: &str,
        x: i32,
        z: i32,
        radius: i32,
        extra_secs: u64,
    ) -> Result<u64, CollapseError> {
        if extra_secs == 0 {
            return Err(CollapseError::InvalidDelay);
        }
        let r = radius.max(1) as f64;
        let now = Instant::now();
        let mut nearest: Option<(f64, StructureKey)> = None;
        self.store.for_each(
            |key| key.world_id == world_id,
            |key, shared| {
                if pending_remaining(&shared.lock(), now).is_none() {
                    return;
                }
                let dist_sq = key.horizontal_distance_sq(x as f64, z as f64);
                if dist_sq > r * r {
                    return;
                }
                if nearest.as_ref().map_or(true, |(d, _)| dist_sq < *d) {
                    nearest = Some((dist_sq, key.clone()));
                }
            },
        );

        let (_, key) = nearest.ok_or(CollapseError::NoPendingCollapse)?;
        self.delay(&key, extra_secs)
    }

    pub fn status(&self) -> Vec<StructureStatus> {
        self.store.snapshot(Instant::now())
    }

    pub fn implosions_started(&self) -> u64 {
        self.implosions_started.load(Ordering::Relaxed)
    }

    pub fn implosions_completed(&self) -> u64 {
        self.implosions_completed.load(Ordering::Relaxed)
    }

    /// Aborts every timer and forgets every structure
    pub fn shutdown(&self) {
        let drained = self.store.drain();
        for (_, shared) in &drained {
            shared.lock().cancel_all_timers();
        }
        for timer in self.follow_ups.lock().drain(..) {
            timer.cancel();
        }
        info!(structures = drained.len(), "Collapse scheduler shut down");
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Cancels the previous start/countdown timers and schedules new ones.
    /// Returns the immediate announcement, to be sent after the entry lock
    /// is released.
    fn schedule_start_locked(
        self: &Arc<Self>,
        key: &StructureKey,
        shared: &SharedState,
        state: &mut StructureState,
        deadline: StartDeadline,
    ) -> String {
        let delay_secs = deadline.delay_secs;
        state.cancel_pending_timers();
        state.generation += 1;
        let generation = state.generation;

        state.scheduled_start = Some(deadline.at);
        state.scheduled_start_epoch_ms = deadline.epoch_ms;

        for (after, left) in countdown_checkpoints(delay_secs) {
            let this = Arc::clone(self);
            let key = key.clone();
            let shared = Arc::clone(shared);
            let task = self.runtime.spawn(async move {
                tokio::time::sleep(Duration::from_secs(after)).await;
                if shared.lock().generation != generation {
                    return;
                }
                this.announce(&key, checkpoint_message(left));
            });
            state.pending_timers.push(CancelHandle::from(&task));
        }

        let this = Arc::clone(self);
        let start_key = key.clone();
        let start = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline.at).await;
            this.begin_implosion(&start_key, generation);
        });
        state.pending_timers.push(CancelHandle::from(&start));

        shudder_message(delay_secs)
    }

    /// Scheduled → Imploding, unless the start timer is stale
    fn begin_implosion(self: &Arc<Self>, key: &StructureKey, generation: u64) {
        let Some(shared) = self.store.get(key) else {
            return;
        };
        let mut state = shared.lock();
        if state.generation != generation || state.phase != CollapsePhase::Scheduled {
            return;
        }
        state.phase = CollapsePhase::Imploding;
        // every countdown fired before the start timer
        state.pending_timers.clear();

        let (tick_ms, layers) = {
            let config = self.config.read();
            (config.tick_ms, config.layers_per_tick)
        };
        let run = ImplosionRun::new(key.clone(), state.base_y, layers);
        let this = Arc::clone(self);
        let tick_key = key.clone();
        let tick_state = Arc::clone(&shared);
        let task = self.runtime.spawn(async move {
            this.run_implosion(tick_key, tick_state, run, tick_ms).await;
        });
        state.tick_timer = Some(CancelHandle::from(&task));
        self.implosions_started.fetch_add(1, Ordering::Relaxed);
        info!(structure = %key, base_y = state.base_y, tick_ms, layers, "Implosion started");
    }

    async fn run_implosion(
        self: Arc<Self>,
        key: StructureKey,
        shared: SharedState,
        mut run: ImplosionRun,
        tick_ms: u64,
    ) {
        let Some(world) = self.worlds.get(&key.world_id) else {
            warn!(structure = %key, "World gone before implosion; dropping structure");
            self.effects.forget_world(&key.world_id);
            self.store.remove_if_same(&key, &shared);
            return;
        };

        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let job_state = Arc::clone(&shared);
            let this = Arc::clone(&self);
            let result = run_in_world(world.as_ref(), move |w: &mut dyn HostWorld| {
                let step = run.step(w, &job_state, &this.effects);
                (run, step)
            })
            .await;

            match result {
                Ok((next, TickStep::Finished(plan))) => {
                    drop(next);
                    self.complete(&key, &shared, &world, plan);
                    return;
                }
                Ok((next, step)) => {
                    if let TickStep::Removed { from, to, removed } = step {
                        debug!(structure = %key, from, to, removed, "Implosion tick");
                    }
                    run = next;
                }
                Err(e) => {
                    warn!(structure = %key, error = %e, "Implosion aborted; world unavailable");
                    self.effects.forget_world(&key.world_id);
                    self.store.remove_if_same(&key, &shared);
                    return;
                }
            }
        }
    }

    /// Imploding → Complete
    fn complete(
        self: &Arc<Self>,
        key: &StructureKey,
        shared: &SharedState,
        world: &Arc<dyn WorldContext>,
        plan: CompletionPlan,
    ) {
        // the tick task is the caller; dropping the handle does not abort it
        shared.lock().tick_timer = None;
        self.store.remove_if_same(key, shared);
        self.implosions_completed.fetch_add(1, Ordering::Relaxed);

        let mut follow_ups = self.follow_ups.lock();
        follow_ups.retain(|t| !t.is_finished());
        for secs in FOLLOW_UP_SWEEP_SECS {
            let world = Arc::clone(world);
            let sweep_key = key.clone();
            let task = self.runtime.spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                let submitted = world.submit(Box::new(move |w: &mut dyn HostWorld| {
                    let (blocks, drops) = plan.sweep(w);
                    if blocks + drops > 0 {
                        debug!(structure = %sweep_key, blocks, drops, "Follow-up sweep");
                    }
                }));
                if let Err(e) = submitted {
                    debug!(error = %e, "Follow-up sweep skipped");
                }
            });
            follow_ups.push(CancelHandle::from(&task));
        }
        info!(structure = %key, center_x = plan.center_x, center_z = plan.center_z, "Implosion complete");
    }

    /// Sends `message` to every actor within the announce radius
    fn announce(&self, key: &StructureKey, message: String) {
        let Some(world) = self.worlds.get(&key.world_id) else {
            debug!(structure = %key, "Announcement dropped; world not registered");
            return;
        };
        let radius = self.config.read().announce_radius_blocks as f64;
        let (cx, cz) = (key.x as f64, key.z as f64);
        let submitted = world.submit(Box::new(move |w: &mut dyn HostWorld| {
            for actor in w.actors() {
                let dx = actor.position[0] - cx;
                let dz = actor.position[2] - cz;
                if dx * dx + dz * dz > radius * radius {
                    continue;
                }
                if let Err(e) = w.send_message(actor.id, &message) {
                    debug!(actor = actor.id, error = %e, "Announcement not delivered");
                }
            }
        }));
        if let Err(e) = submitted {
            debug!(structure = %key, error = %e, "Announcement dropped");
        }
    }
}

/// Remaining seconds of a Scheduled entry, if strictly positive
fn pending_remaining(state: &StructureState, now: Instant) -> Option<u64> {
    if state.phase != CollapsePhase::Scheduled {
        return None;
    }
    state.remaining_seconds(now).filter(|&r| r > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BlockSnapshot;
    use crate::host::BlockStateKind;
    use crate::testing::{InlineWorld, MockWorld};

    const ACTOR: u64 = 7;

    fn setup(world: MockWorld) -> (Arc<CollapseScheduler>, Arc<InlineWorld>) {
        let ctx = InlineWorld::new(world);
        let worlds = WorldRegistry::new();
        worlds.register(ctx.clone());
        let scheduler = CollapseScheduler::new(
            TowerStateStore::new(),
            worlds,
            Handle::current(),
            CollapseConfig::default(),
        );
        (scheduler, ctx)
    }

    fn world_with_actor() -> MockWorld {
        let mut world = MockWorld::new("overworld");
        world.add_actor(ACTOR, [3.0, 70.0, 3.0]);
        world.add_actor(99, [500.0, 70.0, 0.0]);
        world
    }

    fn key() -> StructureKey {
        StructureKey::new("overworld", 0, 85, 0)
    }

    async fn sleep_secs(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[test]
    fn test_countdown_checkpoints_for_30s() {
        let after: Vec<u64> = countdown_checkpoints(30).iter().map(|(a, _)| *a).collect();
        assert_eq!(after, vec![20, 25, 26, 27, 28, 29]);
    }

    #[test]
    fn test_countdown_checkpoints_short_delay() {
        assert_eq!(countdown_checkpoints(3), vec![(1, 2), (2, 1)]);
        assert!(countdown_checkpoints(1).is_empty());
    }

    #[test]
    fn test_delayed_remaining() {
        assert_eq!(delayed_remaining(5, 10), Some(15));
        assert_eq!(delayed_remaining(0, 10), Some(10));
        assert_eq!(delayed_remaining(175, 10), Some(180));
        assert_eq!(delayed_remaining(180, 50), Some(180));
        assert_eq!(delayed_remaining(300, 10), None);
        assert_eq!(delayed_remaining(5, u64::MAX), Some(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_announces_and_counts_down() {
        let (scheduler, ctx) = setup(world_with_actor());
        assert!(scheduler.trigger(&key(), 64, 30));

        let first = ctx.world.lock().messages_for(ACTOR);
        assert_eq!(first, vec![shudder_message(30)]);
        assert!(ctx.world.lock().messages_for(99).is_empty());

        sleep_secs(20.5).await;
        assert_eq!(ctx.world.lock().messages_for(ACTOR).len(), 2);
        sleep_secs(9.0).await;
        let msgs = ctx.world.lock().messages_for(ACTOR);
        assert_eq!(msgs.len(), 7);
        assert_eq!(msgs.last().map(String::as_str), Some("Tower implodes in 1 seconds!"));
        assert!(!scheduler.store().get(&key()).unwrap().lock().imploding());

        sleep_secs(1.0).await;
        assert!(scheduler.store().get(&key()).unwrap().lock().imploding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_twice_is_idempotent() {
        let (scheduler, ctx) = setup(world_with_actor());
        assert!(scheduler.trigger(&key(), 64, 30));
        assert!(!scheduler.trigger(&key(), 64, 30));
        assert_eq!(scheduler.store().len(), 1);
        assert_eq!(ctx.world.lock().messages_for(ACTOR).len(), 1);
        let generation = scheduler.store().get(&key()).unwrap().lock().generation;
        assert_eq!(generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_does_not_stop_announcement() {
        let mut world = world_with_actor();
        world.add_actor(8, [-3.0, 70.0, -3.0]);
        world.fail_messages.insert(ACTOR);
        let (scheduler, ctx) = setup(world);

        assert!(scheduler.trigger(&key(), 64, 30));
        let w = ctx.world.lock();
        assert!(w.messages_for(ACTOR).is_empty());
        assert_eq!(w.messages_for(8), vec![shudder_message(30)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_twice_runs_one_implosion() {
        let (scheduler, ctx) = setup(world_with_actor());
        assert!(scheduler.trigger(&key(), 64, 5));
        assert!(!scheduler.trigger(&key(), 64, 5));

        sleep_secs(5.5).await;
        assert!(!scheduler.trigger(&key(), 64, 5));
        assert_eq!(scheduler.implosions_started(), 1);

        sleep_secs(20.0).await;
        assert!(scheduler.store().is_empty());
        assert_eq!(scheduler.implosions_started(), 1);
        assert_eq!(scheduler.implosions_completed(), 1);
        // one shudder plus the 4, 3, 2, 1 checkpoints
        let msgs = ctx.world.lock().messages_for(ACTOR);
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs.iter().filter(|m| m.starts_with("The tower shudders")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_delay_changes_nothing() {
        let (scheduler, ctx) = setup(world_with_actor());
        assert!(!scheduler.trigger(&key(), 80, u64::MAX / 2));
        assert!(scheduler.store().get(&key()).is_none());
        assert!(ctx.world.lock().messages_for(ACTOR).is_empty());

        assert!(scheduler.trigger(&key(), 80, 5));
        sleep_secs(5.5).await;
        assert!(scheduler.store().get(&key()).unwrap().lock().imploding());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_delays_serialize_on_entry() {
        let (scheduler, ctx) = setup(world_with_actor());
        assert!(scheduler.trigger(&key(), 64, 30));
        let before_ms = chrono::Utc::now().timestamp_millis();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                tokio::task::spawn_blocking(move || scheduler.delay(&key(), 10))
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }
        results.sort_unstable();
        assert_eq!(results, vec![40, 50, 60, 70]);

        let shared = scheduler.store().get(&key()).unwrap();
        let state = shared.lock();
        assert_eq!(state.generation, 5);
        // seven checkpoints fit into 70s, plus the start timer
        assert_eq!(state.pending_timers.len(), countdown_checkpoints(70).len() + 1);
        assert_eq!(state.pending_timers.len(), 8);
        assert_eq!(state.remaining_seconds(Instant::now()), Some(70));
        let ahead_ms = state.scheduled_start_epoch_ms - before_ms;
        assert!((70_000..71_000).contains(&ahead_ms), "start {ahead_ms}ms ahead");
        drop(state);

        let mut shudders = ctx.world.lock().messages_for(ACTOR);
        shudders.sort();
        let mut expected: Vec<String> = [30, 40, 50, 60, 70].into_iter().map(shudder_message).collect();
        expected.sort();
        assert_eq!(shudders, expected);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_with_five_seconds_left() {
        let (scheduler, _ctx) = setup(world_with_actor());
        scheduler.trigger(&key(), 64, 30);
        sleep_secs(25.0).await;

        assert_eq!(scheduler.delay(&key(), 10), Ok(15));
        let remaining = scheduler.nearest_pending_remaining_seconds("overworld", 0, 0, 16);
        assert_eq!(remaining, Some(15));

        // the first start timer must not fire at t=30
        sleep_secs(6.0).await;
        assert!(!scheduler.store().get(&key()).unwrap().lock().imploding());
        sleep_secs(9.5).await;
        assert!(scheduler.store().get(&key()).unwrap().lock().imploding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_at_180() {
        let (scheduler, _ctx) = setup(world_with_actor());
        scheduler.trigger(&key(), 64, 100);
        assert_eq!(scheduler.delay(&key(), 150), Ok(180));
        assert_eq!(scheduler.delay(&key(), 10), Ok(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_over_cap_rejected() {
        let (scheduler, _ctx) = setup(world_with_actor());
        scheduler.trigger(&key(), 64, 400);
        assert_eq!(scheduler.delay(&key(), 10), Err(CollapseError::DelayCapReached));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_rejections() {
        let (scheduler, _ctx) = setup(world_with_actor());
        assert_eq!(scheduler.delay(&key(), 10), Err(CollapseError::NoPendingCollapse));
        scheduler.trigger(&key(), 64, 5);
        assert_eq!(scheduler.delay(&key(), 0), Err(CollapseError::InvalidDelay));

        sleep_secs(5.5).await;
        assert_eq!(scheduler.delay(&key(), 10), Err(CollapseError::AlreadyImploding));
        assert_eq!(
            scheduler.delay_nearest_pending("overworld", 0, 0, 128, 10),
            Err(CollapseError::NoPendingCollapse)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_nearest_pending_queries() {
        let (scheduler, _ctx) = setup(world_with_actor());
        let near = StructureKey::new("overworld", 10, 80, 0);
        let far = StructureKey::new("overworld", 60, 80, 0);
        let other = StructureKey::new("nether", 0, 80, 0);
        scheduler.trigger(&near, 80, 40);
        scheduler.trigger(&far, 80, 20);
        scheduler.trigger(&other, 80, 5);

        // minimum remaining within radius
        assert_eq!(scheduler.nearest_pending_remaining_seconds("overworld", 0, 0, 128), Some(20));
        assert_eq!(scheduler.nearest_pending_remaining_seconds("overworld", 0, 0, 16), Some(40));
        assert_eq!(scheduler.nearest_pending_remaining_seconds("overworld", 300, 0, 16), None);

        // delay targets the closest structure
        assert_eq!(scheduler.delay_nearest_pending("overworld", 0, 0, 128, 10), Ok(50));
        let far_state = scheduler.store().get(&far).unwrap();
        assert_eq!(far_state.lock().remaining_seconds(Instant::now()), Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_collapse_removes_entry() {
        let mut world = world_with_actor();
        world.build_flat_ground(-40, 40, 63, "Soil_Grass");
        world.build_ring(0, 0, 64, 90, 6, "Rock_Stone_Brick");
        world.set(
            0,
            90,
            0,
            BlockSnapshot::new("Furniture_Village_Chest").with_state(BlockStateKind::Container),
        );
        world.known_particles.insert("Explosion_Small".into());
        world.known_particles.insert("Impact_Explosion".into());
        let (scheduler, ctx) = setup(world);

        scheduler.trigger(&key(), 85, 5);
        // 5s countdown + 15 ticks at 300ms
        sleep_secs(12.0).await;

        assert!(scheduler.store().get(&key()).is_none());
        let world = ctx.world.lock();
        assert!(world.get(0, 90, 0).is_none());
        assert!(world.get(6, 66, 0).is_none());
        assert!(world.get(6, 65, 0).is_some());
        assert!(world.particles.iter().any(|(id, _)| id == "Impact_Explosion"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_up_sweeps_catch_late_drops() {
        let mut world = world_with_actor();
        world.build_flat_ground(-40, 40, 63, "Soil_Grass");
        world.build_ring(0, 0, 64, 80, 6, "Rock_Stone_Brick");
        let (scheduler, ctx) = setup(world);
        scheduler.trigger(&key(), 75, 5);
        sleep_secs(12.0).await;
        assert!(scheduler.store().is_empty());

        // an item and a block appear right after completion
        {
            let mut w = ctx.world.lock();
            let drop = crate::host::EntityCaps { dropped_item: true, ..Default::default() };
            w.spawn_entity(50, [2.0, 70.0, 2.0], drop);
            w.set(6, 70, 0, BlockSnapshot::new("Rock_Stone_Brick"));
        }
        sleep_secs(8.0).await;
        let w = ctx.world.lock();
        assert!(!w.has_entity(50));
        assert!(w.get(6, 70, 0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_after_completion_creates_new_cycle() {
        let (scheduler, _ctx) = setup(world_with_actor());
        scheduler.trigger(&key(), 85, 5);
        sleep_secs(30.0).await;
        assert!(scheduler.store().is_empty());
        assert!(scheduler.trigger(&key(), 85, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let (scheduler, ctx) = setup(world_with_actor());
        scheduler.trigger(&key(), 64, 30);
        scheduler.shutdown();
        assert!(scheduler.store().is_empty());
        sleep_secs(40.0).await;
        // only the immediate announcement was ever sent
        assert_eq!(ctx.world.lock().messages_for(ACTOR).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_config_clamps() {
        let (scheduler, _ctx) = setup(world_with_actor());
        scheduler.apply_config(CollapseConfig {
            delay_seconds: 1,
            announce_radius_blocks: 64,
            tick_ms: 300,
            layers_per_tick: 50,
        });
        let c = scheduler.config();
        assert_eq!(c.delay_seconds, 5);
        assert_eq!(c.layers_per_tick, 10);

        assert!(scheduler.trigger_default(&key(), 64));
        let remaining = scheduler.nearest_pending_remaining_seconds("overworld", 0, 0, 16);
        assert_eq!(remaining, Some(5));
    }
}
