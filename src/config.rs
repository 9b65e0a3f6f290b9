//! Configuration loading, validation, and sweep expansion.
//!
//! A run is described by a directory of parts — `simulator.env` (key/value
//! environment table), `pools.json`, `strategy_manifest.json`,
//! `dynamic.json`, `difficulty_bootstrap.csv`, optional `sweeps.json` — or
//! by a previously emitted `config_snapshot.json`, which reproduces the run
//! exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::PoolId;
use crate::difficulty::DifficultyParams;
use crate::noise::InternetParams;
use crate::strategy::Strategy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("environment table is missing required key {0}")]
    MissingKey(String),
    #[error("environment key {key} has invalid value {value:?}")]
    BadValue { key: String, value: String },
    #[error("pool HPP values sum to {0}, expected 1 within 1e-3")]
    HppSum(f64),
    #[error("pool {pool} has HPP {hpp} outside (0, 1]")]
    BadHpp { pool: PoolId, hpp: f64 },
    #[error("pool {pool} references unknown strategy id {id}")]
    UnknownStrategy { pool: PoolId, id: String },
    #[error("strategy {id} has unknown entry point {entry_point:?}: {message}")]
    BadStrategy {
        id: String,
        entry_point: String,
        message: String,
    },
    #[error("no pools configured")]
    NoPools,
    #[error(
        "bootstrap {path} is too short: {got} rows, need at least {need}"
    )]
    BootstrapTooShort {
        path: PathBuf,
        need: usize,
        got: usize,
    },
    #[error("bootstrap {path} row {row}: {message}")]
    BootstrapRow {
        path: PathBuf,
        row: usize,
        message: String,
    },
    #[error("sweep key {0} does not exist in the dynamic config")]
    UnknownSweepKey(String),
}

/// `DATA_MODE`: how much per-round data is written out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    Simple,
    Metrics,
    Full,
}

/// One optional log channel from `LOG_MODE`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Info,
    Probe,
    Stats,
}

/// `SIM_ROUNDS`: a repeat count, or the literal `sweep` for one round per
/// permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounds {
    Count(usize),
    Sweep,
}

impl Serialize for Rounds {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match self {
            Rounds::Count(n) => serializer.serialize_u64(*n as u64),
            Rounds::Sweep => serializer.serialize_str("sweep"),
        }
    }
}

impl<'de> Deserialize<'de> for Rounds {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Number(n) if n.as_u64().is_some() => {
                Ok(Rounds::Count(n.as_u64().expect("checked") as usize))
            }
            Value::String(s) if s == "sweep" => Ok(Rounds::Sweep),
            other => Err(serde::de::Error::custom(format!(
                "expected a round count or \"sweep\", got {other}"
            ))),
        }
    }
}

impl FromStr for Rounds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sweep") {
            return Ok(Rounds::Sweep);
        }
        s.parse::<usize>()
            .map(Rounds::Count)
            .map_err(|e| e.to_string())
    }
}

impl fmt::Display for Rounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rounds::Count(n) => write!(f, "{n}"),
            Rounds::Sweep => write!(f, "sweep"),
        }
    }
}

/// The environment-table settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunSettings {
    pub sim_depth_hours: f64,
    pub sim_rounds: Rounds,
    pub workers: usize,
    pub worker_ram_mb: u64,
    pub data_mode: DataMode,
    pub log_mode: BTreeSet<LogChannel>,
    pub seed: u32,
}

impl RunSettings {
    pub fn sim_depth_secs(&self) -> f64 {
        self.sim_depth_hours * 3600.0
    }

    /// Parses the key/value environment table at `path`.
    pub fn from_env_table(path: &Path) -> Result<Self, ConfigError> {
        let mut table: HashMap<String, String> = HashMap::new();
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                ),
            }
        })?;
        for item in iter {
            let (key, value) = item.map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            table.insert(key, value);
        }

        let require = |key: &str| -> Result<String, ConfigError> {
            table
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingKey(key.to_owned()))
        };
        fn parsed<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value.parse::<T>().map_err(|_| ConfigError::BadValue {
                key: key.to_owned(),
                value: value.to_owned(),
            })
        }

        let sim_depth_hours: f64 =
            parsed("SIM_DEPTH", &require("SIM_DEPTH")?)?;
        let sim_rounds: Rounds =
            parsed("SIM_ROUNDS", &require("SIM_ROUNDS")?)?;
        let seed: u32 = parsed("SEED", &require("SEED")?)?;

        let workers = match table.get("WORKERS") {
            Some(v) => parsed("WORKERS", v)?,
            None => 0,
        };
        let worker_ram_mb = match table.get("WORKER_RAM") {
            Some(v) => parsed("WORKER_RAM", v)?,
            None => 0,
        };
        let data_mode = match table.get("DATA_MODE").map(String::as_str) {
            None => DataMode::Simple,
            Some("simple") => DataMode::Simple,
            Some("metrics") => DataMode::Metrics,
            Some("full") => DataMode::Full,
            Some(other) => {
                return Err(ConfigError::BadValue {
                    key: "DATA_MODE".into(),
                    value: other.into(),
                })
            }
        };
        let mut log_mode = BTreeSet::new();
        if let Some(spec) = table.get("LOG_MODE") {
            for part in spec.split([',', ' ']).filter(|p| !p.is_empty()) {
                let channel = match part {
                    "info" => LogChannel::Info,
                    "probe" => LogChannel::Probe,
                    "stats" => LogChannel::Stats,
                    other => {
                        return Err(ConfigError::BadValue {
                            key: "LOG_MODE".into(),
                            value: other.into(),
                        })
                    }
                };
                log_mode.insert(channel);
            }
        }

        if sim_depth_hours <= 0.0 {
            return Err(ConfigError::BadValue {
                key: "SIM_DEPTH".into(),
                value: sim_depth_hours.to_string(),
            });
        }

        Ok(RunSettings {
            sim_depth_hours,
            sim_rounds,
            workers,
            worker_ram_mb,
            data_mode,
            log_mode,
            seed,
        })
    }
}

/// One row of the pools table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub strategy: String,
    #[serde(rename = "HPP")]
    pub hpp: f64,
}

pub type PoolsTable = BTreeMap<PoolId, PoolEntry>;

/// One strategy-manifest entry, kept verbatim for the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "entryPoint")]
    pub entry_point: String,
    #[serde(default)]
    pub config: Value,
}

/// Resolves manifest entries into concrete [`Strategy`] values.
pub fn resolve_strategies(
    manifest: &[ManifestEntry],
) -> Result<BTreeMap<String, Strategy>, ConfigError> {
    let mut resolved = BTreeMap::new();
    for entry in manifest {
        let mut object = match &entry.config {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ConfigError::BadStrategy {
                    id: entry.id.clone(),
                    entry_point: entry.entry_point.clone(),
                    message: format!("config must be an object, got {other}"),
                })
            }
        };
        object.insert(
            "entryPoint".to_owned(),
            Value::String(entry.entry_point.clone()),
        );
        let strategy: Strategy = serde_json::from_value(Value::Object(object))
            .map_err(|e| ConfigError::BadStrategy {
                id: entry.id.clone(),
                entry_point: entry.entry_point.clone(),
                message: e.to_string(),
            })?;
        resolved.insert(entry.id.clone(), strategy);
    }
    Ok(resolved)
}

/// Difficulty, internet, and hashrate settings; the sweeps file overrides
/// paths into this structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DynamicConfig {
    pub difficulty: DifficultyParams,
    pub internet: InternetParams,
    pub network_hashrate: f64,
}

/// One row of the difficulty bootstrap CSV, in original (un-rebased) form.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapRow {
    pub height: u64,
    pub timestamp: i64,
    pub difficulty: BigUint,
    pub cum_difficulty: BigUint,
}

/// Loads and validates the bootstrap history: at least `need` rows with
/// consecutive heights.
pub fn load_bootstrap(
    path: &Path,
    need: usize,
) -> Result<Vec<BootstrapRow>, ConfigError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        ConfigError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            ),
        }
    })?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let row_no = i + 2; // header is row 1
        let record = record.map_err(|e| ConfigError::BootstrapRow {
            path: path.to_path_buf(),
            row: row_no,
            message: e.to_string(),
        })?;
        let field = |idx: usize, name: &str| -> Result<String, ConfigError> {
            record
                .get(idx)
                .map(str::trim)
                .map(str::to_owned)
                .ok_or_else(|| ConfigError::BootstrapRow {
                    path: path.to_path_buf(),
                    row: row_no,
                    message: format!("missing column {name}"),
                })
        };
        let parse_err = |name: &str, value: &str| ConfigError::BootstrapRow {
            path: path.to_path_buf(),
            row: row_no,
            message: format!("invalid {name} value {value:?}"),
        };

        let height_s = field(0, "height")?;
        let timestamp_s = field(1, "timestamp")?;
        let difficulty_s = field(2, "difficulty")?;
        let cum_s = field(3, "cumulative_difficulty")?;

        let row = BootstrapRow {
            height: height_s
                .parse()
                .map_err(|_| parse_err("height", &height_s))?,
            timestamp: timestamp_s
                .parse()
                .map_err(|_| parse_err("timestamp", &timestamp_s))?,
            difficulty: BigUint::from_str(&difficulty_s)
                .map_err(|_| parse_err("difficulty", &difficulty_s))?,
            cum_difficulty: BigUint::from_str(&cum_s)
                .map_err(|_| parse_err("cumulative_difficulty", &cum_s))?,
        };

        if let Some(last) = rows.last() {
            let last: &BootstrapRow = last;
            if row.height != last.height + 1 {
                return Err(ConfigError::BootstrapRow {
                    path: path.to_path_buf(),
                    row: row_no,
                    message: format!(
                        "height {} does not follow {}",
                        row.height, last.height
                    ),
                });
            }
        }
        rows.push(row);
    }

    if rows.len() < need {
        return Err(ConfigError::BootstrapTooShort {
            path: path.to_path_buf(),
            need,
            got: rows.len(),
        });
    }
    Ok(rows)
}

/// One sweep permutation: dotted-path overrides into the dynamic config.
pub type Permutation = Vec<(String, Value)>;

/// Expands a sweeps object into the Cartesian product of its array-valued
/// leaves. A scalar leaf is a constant override present in every
/// permutation. An empty or null sweeps value yields the single identity
/// permutation.
pub fn expand_sweeps(sweeps: &Value) -> Vec<Permutation> {
    let mut axes: Vec<(String, Vec<Value>)> = Vec::new();
    collect_axes(sweeps, String::new(), &mut axes);

    if axes.is_empty() {
        return vec![Vec::new()];
    }

    let mut permutations = vec![Vec::new()];
    for (path, values) in axes {
        let mut next =
            Vec::with_capacity(permutations.len() * values.len().max(1));
        for permutation in &permutations {
            for value in &values {
                let mut extended = permutation.clone();
                extended.push((path.clone(), value.clone()));
                next.push(extended);
            }
        }
        permutations = next;
    }
    permutations
}

fn collect_axes(
    value: &Value,
    path: String,
    axes: &mut Vec<(String, Vec<Value>)>,
) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect_axes(child, child_path, axes);
            }
        }
        Value::Array(items) => axes.push((path, items.clone())),
        Value::Null => {}
        scalar => axes.push((path, vec![scalar.clone()])),
    }
}

/// Applies a permutation's overrides onto the dynamic config.
pub fn apply_permutation(
    base: &DynamicConfig,
    permutation: &Permutation,
) -> Result<DynamicConfig, ConfigError> {
    let mut value =
        serde_json::to_value(base).expect("dynamic config serializes");
    for (path, override_value) in permutation {
        let mut cursor = &mut value;
        for segment in path.split('.') {
            cursor = cursor
                .as_object_mut()
                .and_then(|map| map.get_mut(segment))
                .ok_or_else(|| ConfigError::UnknownSweepKey(path.clone()))?;
        }
        *cursor = override_value.clone();
    }
    serde_json::from_value(value).map_err(|e| ConfigError::Parse {
        path: PathBuf::from("<sweeps>"),
        message: e.to_string(),
    })
}

/// The fully resolved run configuration; serialized verbatim as
/// `config_snapshot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub settings: RunSettings,
    pub dynamic: DynamicConfig,
    pub pools: PoolsTable,
    pub strategies: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweeps: Option<Value>,
    pub bootstrap_path: PathBuf,
}

impl SimConfig {
    /// Loads either a config directory or an emitted snapshot file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.is_dir() {
            Self::load_dir(path)
        } else {
            Self::load_snapshot(path)
        }
    }

    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let settings = RunSettings::from_env_table(&dir.join("simulator.env"))?;
        let pools: PoolsTable = read_json(&dir.join("pools.json"))?;
        let strategies: Vec<ManifestEntry> =
            read_json(&dir.join("strategy_manifest.json"))?;
        let dynamic: DynamicConfig = read_json(&dir.join("dynamic.json"))?;
        let sweeps_path = dir.join("sweeps.json");
        let sweeps = if sweeps_path.exists() {
            Some(read_json(&sweeps_path)?)
        } else {
            None
        };

        let config = SimConfig {
            settings,
            dynamic,
            pools,
            strategies,
            sweeps,
            bootstrap_path: dir.join("difficulty_bootstrap.csv"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, ConfigError> {
        let config: SimConfig = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation of everything checkable before any round runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.is_empty() {
            return Err(ConfigError::NoPools);
        }

        let strategies = resolve_strategies(&self.strategies)?;
        let mut sum = 0.0;
        for (pool, entry) in &self.pools {
            if !(entry.hpp > 0.0 && entry.hpp <= 1.0) {
                return Err(ConfigError::BadHpp {
                    pool: pool.clone(),
                    hpp: entry.hpp,
                });
            }
            sum += entry.hpp;
            if !strategies.contains_key(&entry.strategy) {
                return Err(ConfigError::UnknownStrategy {
                    pool: pool.clone(),
                    id: entry.strategy.clone(),
                });
            }
        }
        if (sum - 1.0).abs() > 1e-3 {
            return Err(ConfigError::HppSum(sum));
        }

        // Sweep keys must resolve against the dynamic config.
        if let Some(sweeps) = &self.sweeps {
            for permutation in expand_sweeps(sweeps) {
                apply_permutation(&self.dynamic, &permutation)?;
            }
        }
        Ok(())
    }

    pub fn resolved_strategies(
        &self,
    ) -> Result<BTreeMap<String, Strategy>, ConfigError> {
        resolve_strategies(&self.strategies)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
