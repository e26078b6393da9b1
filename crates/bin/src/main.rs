//! Cytos - headless tick driver.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use engine::{Config, Engine};
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Share of the tick interval a tick may take before it is reported.
const TICK_BUDGET: f64 = 0.9;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Cytos v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let mode = config.mode_config()?;
    info!("  Mode: {}", mode.name);
    info!("  Map: {}x{}", mode.world.map_hw * 2.0, mode.world.map_hh * 2.0);
    info!("  Tick rate: {}/s, {} workers", config.server.tick_rate, config.server.workers);

    let mut engine = Engine::new(mode, config.server.workers, config.server.seed)?;
    if let Some(path) = &config.server.save_path {
        if path.exists() {
            restore(&mut engine, path)?;
        }
    }
    engine.start();

    let tick_ms = 1000.0 / f64::from(config.server.tick_rate.max(1));
    let period = Duration::from_secs_f64(tick_ms / 1e3);
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64() * 1e3;
                last = now;

                engine.tick(elapsed);
                let spent = engine.timings().total();
                if spent > tick_ms * TICK_BUDGET {
                    warn!(
                        "Slow tick #{}: {:.3}ms (budget: {:.1}ms) - {} cells, {} bots",
                        engine.tick_count(),
                        spent,
                        tick_ms * TICK_BUDGET,
                        engine.pool().count(),
                        engine.bots().len()
                    );
                }

                // Nobody consumes frames or events here
                engine.take_frames();
                engine.take_perks();
                for ev in engine.take_events() {
                    info!("Handle {} won on control {}", ev.handle, ev.control);
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    engine.stop();
    if let Some(path) = &config.server.save_path {
        if let Err(e) = save(&mut engine, path) {
            error!("Failed to save {}: {:#}", path.display(), e);
        }
    }
    Ok(())
}

fn restore(engine: &mut Engine, path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    match engine.restore_bytes(data) {
        Ok(()) => info!("Restored snapshot from {}", path.display()),
        Err(e) => warn!("Ignoring snapshot {}: {}", path.display(), e),
    }
    Ok(())
}

fn save(engine: &mut Engine, path: &Path) -> anyhow::Result<()> {
    let data = engine.save().encode();
    std::fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
    info!("Saved {} bytes to {}", data.len(), path.display());
    debug!("Last tick: {}", engine.timings());
    Ok(())
}
