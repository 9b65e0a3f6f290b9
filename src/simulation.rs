//! Building and running groups of simulation rounds.
//!
//! Rounds are independent: each permutation of the sweeps file times the
//! configured repeat count becomes one [`RoundSpec`], and the group fans
//! them out over a rayon worker pool. Workers share nothing but the
//! read-only bootstrap history and a cancellation flag.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::{
    self, BootstrapRow, ConfigError, Rounds, SimConfig,
};
use crate::output::RunLogs;
use crate::round::{run_round, RoundError, RoundResult, RoundSpec};
use crate::strategy::Strategy;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not build the worker pool: {0}")]
    ThreadPool(String),
}

/// A validated run: resolved strategies, loaded bootstrap, and the
/// per-round specs derived from sweeps and the round count.
pub struct SimulationGroup {
    config: SimConfig,
    strategies: BTreeMap<String, Strategy>,
    bootstrap: Arc<Vec<BootstrapRow>>,
    cancel: Arc<AtomicBool>,
}

impl SimulationGroup {
    /// Validates the configuration and loads the bootstrap history. Every
    /// config error surfaces here, before any round starts.
    pub fn new(config: SimConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let strategies = config.resolved_strategies()?;
        let need = config.dynamic.difficulty.span();
        let bootstrap =
            config::load_bootstrap(&config.bootstrap_path, need)?;
        Ok(SimulationGroup {
            config,
            strategies,
            bootstrap: Arc::new(bootstrap),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn bootstrap(&self) -> &[BootstrapRow] {
        &self.bootstrap
    }

    /// Flag observed by every running round; setting it requests a
    /// best-effort final emission and exit.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Expands sweeps and the round count into concrete per-round specs.
    /// Round `i` is seeded with `SEED + i`, keeping rounds decoupled but
    /// the whole run reproducible.
    pub fn round_specs(&self) -> Result<Vec<RoundSpec>, SimulationError> {
        let settings = &self.config.settings;
        let permutations = match &self.config.sweeps {
            Some(sweeps) => config::expand_sweeps(sweeps),
            None => vec![Vec::new()],
        };
        let repeats = match settings.sim_rounds {
            Rounds::Sweep => 1,
            Rounds::Count(n) => n,
        };

        let pools: Vec<_> = self
            .config
            .pools
            .iter()
            .map(|(id, entry)| {
                let strategy = self.strategies[&entry.strategy].clone();
                (id.clone(), entry.hpp, strategy)
            })
            .collect();

        let mut specs = Vec::with_capacity(permutations.len() * repeats);
        for permutation in &permutations {
            let dynamic =
                config::apply_permutation(&self.config.dynamic, permutation)?;
            for _ in 0..repeats {
                let index = specs.len();
                specs.push(RoundSpec {
                    index,
                    seed: u64::from(settings.seed) + index as u64,
                    sim_depth_secs: settings.sim_depth_secs(),
                    worker_ram_mb: settings.worker_ram_mb,
                    data_mode: settings.data_mode,
                    pools: pools.clone(),
                    dynamic: dynamic.clone(),
                    bootstrap: Arc::clone(&self.bootstrap),
                    sweep: permutation.clone(),
                });
            }
        }
        Ok(specs)
    }

    /// Runs every round on the worker pool. A failed round does not stop
    /// the others; its error is returned in place.
    pub fn run_all(
        &self,
        logs: Arc<RunLogs>,
    ) -> Result<Vec<Result<RoundResult, RoundError>>, SimulationError> {
        let specs = self.round_specs()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.settings.workers)
            .build()
            .map_err(|e| SimulationError::ThreadPool(e.to_string()))?;

        let cancel = Arc::clone(&self.cancel);
        let results = pool.install(|| {
            specs
                .par_iter()
                .map(|spec| {
                    run_round(spec, Some(&cancel), Arc::clone(&logs))
                })
                .collect()
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DataMode, DynamicConfig, ManifestEntry, PoolEntry, RunSettings,
    };
    use crate::difficulty::DifficultyParams;
    use crate::noise::InternetParams;
    use std::collections::BTreeSet;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_bootstrap(dir: &std::path::Path, rows: usize) -> PathBuf {
        let path = dir.join("difficulty_bootstrap.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "height,timestamp,difficulty,cumulative_difficulty")
            .unwrap();
        for i in 0..rows {
            writeln!(
                file,
                "{},{},1000,{}",
                1000 + i,
                120 * i,
                1000 * (i + 1)
            )
            .unwrap();
        }
        path
    }

    fn small_config(bootstrap_path: PathBuf) -> SimConfig {
        let mut pools = BTreeMap::new();
        pools.insert(
            "P0".to_owned(),
            PoolEntry {
                strategy: "baseline".into(),
                hpp: 0.6,
            },
        );
        pools.insert(
            "P1".to_owned(),
            PoolEntry {
                strategy: "baseline".into(),
                hpp: 0.4,
            },
        );
        SimConfig {
            settings: RunSettings {
                sim_depth_hours: 1.0,
                sim_rounds: Rounds::Count(2),
                workers: 1,
                worker_ram_mb: 0,
                data_mode: DataMode::Simple,
                log_mode: BTreeSet::new(),
                seed: 42,
            },
            dynamic: DynamicConfig {
                difficulty: DifficultyParams {
                    target_secs: 120,
                    window: 30,
                    lag: 5,
                    cut: 5,
                },
                internet: InternetParams {
                    ping_ms: 70.0,
                    cv: 1.0,
                    mbps: 100.0,
                    ntp_stdev: 1.0,
                    block_size_kb: 150.0,
                },
                network_hashrate: 1000.0 / 120.0,
            },
            pools,
            strategies: vec![ManifestEntry {
                id: "baseline".into(),
                entry_point: "honest".into(),
                config: serde_json::Value::Null,
            }],
            sweeps: None,
            bootstrap_path,
        }
    }

    #[test]
    fn specs_cover_rounds_times_permutations() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = write_bootstrap(dir.path(), 40);
        let mut config = small_config(bootstrap);
        config.sweeps = Some(serde_json::json!({
            "internet": { "ping_ms": [10.0, 150.0] }
        }));

        let group = SimulationGroup::new(config).unwrap();
        let specs = group.round_specs().unwrap();
        // 2 permutations x 2 repeats, contiguous indices and derived seeds.
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[3].index, 3);
        assert_eq!(specs[3].seed, 45);
        assert_eq!(specs[0].dynamic.internet.ping_ms, 10.0);
        assert_eq!(specs[2].dynamic.internet.ping_ms, 150.0);
    }

    #[test]
    fn sweep_mode_runs_one_round_per_permutation() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = write_bootstrap(dir.path(), 40);
        let mut config = small_config(bootstrap);
        config.settings.sim_rounds = Rounds::Sweep;
        config.sweeps = Some(serde_json::json!({
            "network_hashrate": [1e3, 2e3, 3e3]
        }));

        let group = SimulationGroup::new(config).unwrap();
        let specs = group.round_specs().unwrap();
        assert_eq!(specs.len(), 3);
    }

    #[test]
    fn short_bootstrap_fails_before_any_round() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = write_bootstrap(dir.path(), 10);
        let config = small_config(bootstrap);
        assert!(matches!(
            SimulationGroup::new(config),
            Err(SimulationError::Config(
                ConfigError::BootstrapTooShort { .. }
            ))
        ));
    }
}
