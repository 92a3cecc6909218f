//! Collapse Integration Tests
//!
//! Runs the collapse service against a simulated world on its own runner
//! thread, with timers on a real scheduler thread:
//! 1. Full implosion of a built tower down to its ruin stub
//! 2. Multi-path defeat detection schedules exactly once
//! 3. Vault chest gating by key while the tower stands

use std::sync::Arc;
use std::time::Duration;

use collapse_core::config::{CollapseConfig, EconomyConfig, VaultConfig};
use collapse_core::scheduler::SchedulerThread;
use collapse_core::service::{DefeatOutcome, DefeatSource, TowerCollapseService};
use collapse_core::state::CollapsePhase;
use collapse_core::vault::{InteractionKind, VaultDecision, SEALED_MESSAGE, UNLOCK_MESSAGE};
use collapse_server::sim_world::{SimWorld, BRICK, VAULT_CHEST};
use collapse_server::{WorldDirectory, WorldRunner};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

const KEY_ITEM: &str = "BattleTowers_Tower_Key";

struct Harness {
    scheduler: SchedulerThread,
    worlds: Arc<WorldDirectory>,
    runner: Arc<WorldRunner>,
    service: Arc<TowerCollapseService>,
}

impl Harness {
    fn new(world: SimWorld) -> Self {
        let scheduler = SchedulerThread::spawn().unwrap();
        let worlds = WorldDirectory::new();
        let runner = WorldRunner::spawn(world).unwrap();
        worlds.insert(runner.clone());
        let service = Arc::new(TowerCollapseService::new(
            Arc::clone(worlds.registry()),
            scheduler.handle(),
            CollapseConfig {
                delay_seconds: 5,
                announce_radius_blocks: 64,
                tick_ms: 50,
                layers_per_tick: 10,
            },
            VaultConfig::default(),
            EconomyConfig::default(),
        ));
        Self {
            scheduler,
            worlds,
            runner,
            service,
        }
    }

    fn teardown(mut self) {
        self.service.shutdown();
        self.worlds.shutdown_all();
        self.scheduler.stop();
    }
}

/// Terrain at y=63, 30-high tower at the origin, chest at (0, 92, 0)
fn tower_world() -> SimWorld {
    let mut world = SimWorld::new("overworld");
    world.build_terrain(-40, 40, 63, 4, "Soil_Grass");
    world.build_tower(0, 0, 64, 30, 6);
    world
}

async fn wait_until_empty(service: &TowerCollapseService, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if service.status().is_empty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ============================================================================
// Full implosion
// ============================================================================

#[tokio::test]
async fn test_full_implosion_leaves_ruin_stub() {
    let mut world = tower_world();
    world.spawn_player(1, "alice", [10.0, 64.0, 10.0]);
    let drop = world.spawn_drop("Rock_Stone_Brick", 4, [2.0, 70.0, 2.0]);
    let h = Harness::new(world);

    let key = collapse_core::state::StructureKey::new("overworld", 0, 94, 0);
    assert!(h.service.scheduler().trigger(&key, 94, 1));
    assert!(!h.service.scheduler().trigger(&key, 94, 1));

    assert!(
        wait_until_empty(&h.service, Duration::from_secs(10)).await,
        "collapse did not complete"
    );
    assert_eq!(h.service.scheduler().implosions_started(), 1);
    assert_eq!(h.service.scheduler().implosions_completed(), 1);

    let (above_ruin, stub, chest, torn_down, drop_alive, inbox) = h
        .runner
        .with_world(move |w| {
            let mut above = 0;
            for y in 66..=93 {
                for x in -6..=6 {
                    for z in -6..=6 {
                        if w.block(x, y, z).is_some() {
                            above += 1;
                        }
                    }
                }
            }
            (
                above,
                w.block(6, 64, 0).map(|b| b.material_id.clone()),
                w.block(0, 92, 0).is_some(),
                w.torn_down(),
                w.contains_entity(drop),
                w.inbox(1),
            )
        })
        .await
        .unwrap();

    assert_eq!(above_ruin, 0, "structure blocks left above the ruin floor");
    assert_eq!(stub.as_deref(), Some(BRICK), "ruin stub must survive");
    assert!(!chest);
    assert_eq!(torn_down, 1, "vault chest state torn down before clearing");
    assert!(!drop_alive, "dropped items inside the footprint are purged");
    assert_eq!(
        inbox.first().map(String::as_str),
        Some("The tower shudders... it will implode in 1 seconds!")
    );

    h.teardown();
}

#[tokio::test]
async fn test_terrain_survives_implosion() {
    let h = Harness::new(tower_world());
    let before = h.runner.with_world(|w| w.count_blocks("Soil_")).await.unwrap();

    let key = collapse_core::state::StructureKey::new("overworld", 0, 94, 0);
    h.service.scheduler().trigger(&key, 94, 1);
    assert!(wait_until_empty(&h.service, Duration::from_secs(10)).await);

    let after = h.runner.with_world(|w| w.count_blocks("Soil_")).await.unwrap();
    assert_eq!(before, after);
    h.teardown();
}

// ============================================================================
// Defeat detection
// ============================================================================

#[tokio::test]
async fn test_defeat_paths_schedule_once() {
    let mut world = tower_world();
    let guardian = world.spawn_guardian(
        "Golem_Firesteel",
        [0.5, 94.0, 0.5],
        Some(Uuid::from_u128(11)),
        Some(Uuid::from_u128(12)),
    );
    let h = Harness::new(world);

    let identity = h
        .runner
        .with_world(move |w| w.guardian_identity(guardian))
        .await
        .unwrap()
        .unwrap();
    let key = h
        .service
        .register_anchor(&identity, "Golem_Firesteel", [0.5, 94.0, 0.5])
        .unwrap();

    // the removal event fires first; the death system reports afterwards
    let seen = h.runner.with_world(move |w| w.observe(guardian)).await.unwrap().unwrap();
    let first = h
        .service
        .on_guardian_defeated(&seen.identity, seen.position, &seen.type_id, DefeatSource::Removal);
    assert_eq!(first, DefeatOutcome::Scheduled(key.clone()));

    let dead = h.runner.with_world(move |w| w.defeat(guardian)).await.unwrap().unwrap();
    let second = h
        .service
        .on_guardian_defeated(&dead.identity, dead.position, &dead.type_id, DefeatSource::Death);
    assert_eq!(second, DefeatOutcome::AlreadyHandled);

    let status = h.service.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].phase, CollapsePhase::Scheduled);
    assert!(status[0].remaining_seconds.is_some_and(|r| r <= 5));

    h.teardown();
}

#[tokio::test]
async fn test_marker_anchor_resolves_spawned_guardian() {
    let marker = Uuid::from_u128(40);
    let mut world = tower_world();
    let spot = world.spawn_marker("Outlander_Priest", marker, [0.0, 94.0, 0.0]);
    let guardian = world
        .spawn_from_marker(spot, &mut StdRng::seed_from_u64(7))
        .unwrap();
    let h = Harness::new(world);

    let key = h.service.register_marker_anchor("overworld", marker, [0.0, 94.0, 0.0]);
    let dead = h.runner.with_world(move |w| w.defeat(guardian)).await.unwrap().unwrap();
    let outcome = h
        .service
        .on_guardian_defeated(&dead.identity, dead.position, &dead.type_id, DefeatSource::Death);
    assert_eq!(outcome, DefeatOutcome::Scheduled(key));

    h.teardown();
}

// ============================================================================
// Vault gating
// ============================================================================

#[tokio::test]
async fn test_vault_chest_needs_key_while_tower_stands() {
    let mut world = tower_world();
    world.spawn_player(1, "alice", [0.0, 88.0, 0.0]);
    let guardian = world.spawn_guardian("Golem_Firesteel", [0.0, 94.0, 0.0], None, None);
    let h = Harness::new(world);

    let identity = h
        .runner
        .with_world(move |w| w.guardian_identity(guardian))
        .await
        .unwrap()
        .unwrap();
    h.service
        .register_anchor(&identity, "Golem_Firesteel", [0.0, 94.0, 0.0])
        .unwrap();

    let service = Arc::clone(&h.service);
    let decisions = h
        .runner
        .with_world(move |w| {
            let mut out = Vec::new();
            let use_chest = |w: &mut SimWorld, kind: InteractionKind| {
                let mut inv = w.inventory_mut(1).unwrap();
                service.on_vault_interaction(kind, VAULT_CHEST, "overworld", 0, 92, 0, 1, &mut *inv)
            };
            out.push(use_chest(w, InteractionKind::Use));
            out.push(use_chest(w, InteractionKind::Primary));
            w.inventory_mut(1).unwrap().items.insert(KEY_ITEM.to_string(), 1);
            out.push(use_chest(w, InteractionKind::Use));
            out.push(use_chest(w, InteractionKind::Secondary));
            (out, w.inventory(1).unwrap().count(KEY_ITEM))
        })
        .await
        .unwrap();

    let (decisions, keys_left) = decisions;
    assert_eq!(
        decisions[0],
        VaultDecision::Denied {
            warning: Some(SEALED_MESSAGE.to_string())
        }
    );
    assert_eq!(decisions[1], VaultDecision::Allowed { message: None });
    assert_eq!(
        decisions[2],
        VaultDecision::Allowed {
            message: Some(UNLOCK_MESSAGE.to_string())
        }
    );
    assert_eq!(decisions[3], VaultDecision::Allowed { message: None });
    assert_eq!(keys_left, 0);

    h.teardown();
}
