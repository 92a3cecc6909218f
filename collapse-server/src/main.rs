use anyhow::Context;
use collapse_core::config::{CollapseConfig, EconomyConfig, VaultConfig};
use collapse_core::logging::{init_tracing, LogLevel, TracingConfig};
use collapse_core::scheduler::SchedulerThread;
use collapse_core::service::TowerCollapseService;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use collapse_server::{api, ApiState, SimWorld, WorldDirectory, WorldRunner};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Overworld with one tower, its guardian spawned from the roof marker,
/// and a player standing next to it
fn demo_world() -> anyhow::Result<(SimWorld, [f64; 3], Uuid, u64)> {
    let mut world = SimWorld::new("overworld");
    world.build_terrain(-40, 40, 63, 4, "Soil_Grass");
    let (cx, top, cz) = world.build_tower(0, 0, 64, 30, 6);
    let anchor = [f64::from(cx), f64::from(top + 1), f64::from(cz)];
    let marker_uuid = Uuid::new_v4();
    let marker = world.spawn_marker("Outlander_Priest", marker_uuid, anchor);
    let guardian = world
        .spawn_from_marker(marker, &mut rand::thread_rng())
        .context("demo marker did not spawn a guardian")?;
    world.spawn_player(1, "builder", [10.0, 64.0, 10.0]);
    Ok((world, anchor, marker_uuid, guardian))
}

fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("COLLAPSE_LOG_LEVEL")
        .ok()
        .and_then(|s| LogLevel::parse(&s))
        .unwrap_or(LogLevel::Info);
    init_tracing(&TracingConfig::default().with_default_level(log_level));

    info!("Starting Tower Collapse Server...");

    // ========================================================================
    // 1. Configuration (env vars, clamped into range)
    // ========================================================================
    let defaults = CollapseConfig::default();
    let collapse = CollapseConfig {
        delay_seconds: env_or("COLLAPSE_DELAY_SECONDS", defaults.delay_seconds),
        announce_radius_blocks: env_or("COLLAPSE_ANNOUNCE_RADIUS", defaults.announce_radius_blocks),
        tick_ms: env_or("COLLAPSE_TICK_MS", defaults.tick_ms),
        layers_per_tick: env_or("COLLAPSE_LAYERS_PER_TICK", defaults.layers_per_tick),
    }
    .clamped();
    let port: u16 = env_or("API_PORT", 50051);
    info!(?collapse, port, "Configuration loaded");

    // ========================================================================
    // 2. Scheduler thread + worlds
    // ========================================================================
    let mut scheduler_thread = SchedulerThread::spawn().context("failed to start scheduler thread")?;

    let worlds = WorldDirectory::new();
    let (world, anchor, marker_uuid, guardian) = demo_world()?;
    let runner = WorldRunner::spawn(world).context("failed to start world runner")?;
    worlds.insert(runner.clone());

    let service = Arc::new(TowerCollapseService::new(
        Arc::clone(worlds.registry()),
        scheduler_thread.handle(),
        collapse,
        VaultConfig::default(),
        EconomyConfig::default(),
    ));

    // ========================================================================
    // 3. HTTP API on a multi-thread runtime
    // ========================================================================
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        service.register_marker_anchor("overworld", marker_uuid, anchor);
        let spawned = runner
            .with_world(move |w| Some((w.guardian_identity(guardian)?, w.creature(guardian)?.0)))
            .await?;
        if let Some((identity, type_id)) = spawned {
            if let Some(key) = service.register_anchor(&identity, &type_id, anchor) {
                info!(anchor = %key, guardian, type_id = %type_id, "Demo tower guarded");
            }
        }

        let state = ApiState::new(Arc::clone(&service), Arc::clone(&worlds));
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutdown signal received");
        };
        api::start_api_server(state, port, shutdown).await
    })?;

    // ========================================================================
    // 4. Teardown: timers first, then worlds, then the scheduler runtime
    // ========================================================================
    service.shutdown();
    worlds.shutdown_all();
    scheduler_thread.stop();
    info!("Tower Collapse Server stopped");
    Ok(())
}
