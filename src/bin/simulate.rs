use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};

use powsim::prelude::*;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let start = Instant::now();

    let mut args = std::env::args().skip(1);
    let config_path =
        PathBuf::from(args.next().unwrap_or_else(|| "config".into()));
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "results".into()));

    let config = SimConfig::load(&config_path).with_context(|| {
        format!("loading configuration from {}", config_path.display())
    })?;
    let group = SimulationGroup::new(config).context("building the run")?;

    let writer = OutputWriter::new(&out_dir).context("creating output dir")?;
    let logs = Arc::new(
        RunLogs::create(writer.dir(), &group.config().settings.log_mode)
            .context("opening log files")?,
    );

    let results = group
        .run_all(Arc::clone(&logs))
        .context("running simulation rounds")?;
    logs.flush();

    let mut completed = Vec::new();
    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(round) => completed.push(round),
            Err(e) => {
                failures += 1;
                error!("worker failed: {e}");
            }
        }
    }

    writer
        .write_all(group.config(), group.bootstrap(), &completed)
        .context("writing results")?;

    info!(
        "{} round(s) completed, {} failed, {:.2}s elapsed",
        completed.len(),
        failures,
        start.elapsed().as_secs_f64()
    );

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
