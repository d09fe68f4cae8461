use anyhow::Result;
use firefly_core::{FireflyConfig, WorldDriver};
use tracing::{info, warn};

const FIREFLIES: usize = 1_000;
const TICKS: usize = 2_400;
/// Ticks between progress lines, one virtual second at the default tick length.
const REPORT_EVERY: usize = 40;

fn main() -> Result<()> {
    init_tracing();
    let config = FireflyConfig::default();
    let tick_length = config.tick_length;
    info!(
        cells_wide = config.cells_wide,
        cells_high = config.cells_high,
        fireflies = FIREFLIES,
        "Starting firefly simulation"
    );

    let driver = WorldDriver::new(config)?;
    driver.hatch(FIREFLIES)?;
    let mut blinks = 0;
    for tick in 1..=TICKS {
        blinks += driver.step()?.blinks;
        if tick % REPORT_EVERY == 0 {
            let snapshot = driver.snapshot()?;
            info!(
                tick = snapshot.tick.0,
                clock = snapshot.clock,
                blinks,
                lit = snapshot.recently_blinked(tick_length),
                coherence = snapshot.phase_coherence(),
                "progress"
            );
            blinks = 0;
        }
    }

    let world = driver.finish()?;
    let coherence = world.snapshot().phase_coherence();
    if coherence < 0.5 {
        warn!(coherence, "population did not synchronise");
    } else {
        info!(coherence, "population synchronised");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
