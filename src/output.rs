//! Result writers and optional run logs.
//!
//! Always: `results_summary.csv`, `historical_blocks.csv`,
//! `config_snapshot.json`. `DATA_MODE >= metrics` adds per-pool
//! `results_metrics.csv`; `DATA_MODE = full` adds gzipped block and score
//! dumps. `LOG_MODE` selects the `info.log` / `probe.log` / `stats.log`
//! files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::{BootstrapRow, DataMode, LogChannel, SimConfig};
use crate::metrics::PoolMetrics;
use crate::round::RoundResult;

/// Float precision of results data.
const FLOAT_DIGITS: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {message}")]
    Csv { path: PathBuf, message: String },
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> OutputError + '_ {
    move |source| OutputError::Csv {
        path: path.to_path_buf(),
        message: source.to_string(),
    }
}

/// Optional per-run log files, shared across round workers. Lines carry the
/// round index so interleaved workers stay attributable.
#[derive(Debug, Default)]
pub struct RunLogs {
    info: Option<Mutex<BufWriter<File>>>,
    probe: Option<Mutex<BufWriter<File>>>,
    stats: Option<Mutex<BufWriter<File>>>,
}

impl RunLogs {
    /// No-op logs (every channel disabled).
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn create(
        dir: &Path,
        channels: &BTreeSet<LogChannel>,
    ) -> Result<Self, OutputError> {
        let open = |name: &str| -> Result<Mutex<BufWriter<File>>, OutputError> {
            let path = dir.join(name);
            let file = File::create(&path).map_err(io_err(&path))?;
            Ok(Mutex::new(BufWriter::new(file)))
        };
        Ok(RunLogs {
            info: channels
                .contains(&LogChannel::Info)
                .then(|| open("info.log"))
                .transpose()?,
            probe: channels
                .contains(&LogChannel::Probe)
                .then(|| open("probe.log"))
                .transpose()?,
            stats: channels
                .contains(&LogChannel::Stats)
                .then(|| open("stats.log"))
                .transpose()?,
        })
    }

    /// Event narration. The message is only rendered when the channel is
    /// enabled.
    pub fn info<F: FnOnce() -> String>(&self, round: usize, message: F) {
        Self::write_line(&self.info, round, message);
    }

    /// User-inlined probes.
    pub fn probe<F: FnOnce() -> String>(&self, round: usize, message: F) {
        Self::write_line(&self.probe, round, message);
    }

    /// Raw noise samples.
    pub fn stats(&self, round: usize, sampler: &str, value: f64) {
        if self.stats.is_some() {
            Self::write_line(&self.stats, round, || {
                format!("{sampler} {value:.9}")
            });
        }
    }

    fn write_line<F: FnOnce() -> String>(
        sink: &Option<Mutex<BufWriter<File>>>,
        round: usize,
        message: F,
    ) {
        if let Some(sink) = sink {
            if let Ok(mut writer) = sink.lock() {
                let _ = writeln!(writer, "r{round} {}", message());
            }
        }
    }

    /// Flushes every open channel; called before exit so shutdown never
    /// drops buffered lines.
    pub fn flush(&self) {
        for sink in [&self.info, &self.probe, &self.stats] {
            if let Some(sink) = sink {
                if let Ok(mut writer) = sink.lock() {
                    let _ = writer.flush();
                }
            }
        }
    }
}

/// Writes all result files for a run into one directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: &Path) -> Result<Self, OutputError> {
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        Ok(OutputWriter {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes every output the data mode calls for.
    pub fn write_all(
        &self,
        config: &SimConfig,
        bootstrap: &[BootstrapRow],
        results: &[RoundResult],
    ) -> Result<(), OutputError> {
        self.write_snapshot(config)?;
        self.write_historical(bootstrap)?;
        self.write_summary(results)?;
        if config.settings.data_mode >= DataMode::Metrics {
            self.write_metrics(results)?;
        }
        if config.settings.data_mode >= DataMode::Full {
            self.write_blocks(results)?;
            self.write_scores(results)?;
        }
        Ok(())
    }

    /// `results_summary.csv`: one row per round with mean and stdev of each
    /// metric across honest pools, then any sweep-parameter columns.
    pub fn write_summary(
        &self,
        results: &[RoundResult],
    ) -> Result<PathBuf, OutputError> {
        let path = self.dir.join("results_summary.csv");
        let mut writer =
            csv::Writer::from_path(&path).map_err(csv_err(&path))?;

        let sweep_keys: Vec<String> = results
            .first()
            .map(|r| r.sweep.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default();

        let mut header = vec!["round".to_owned()];
        for name in PoolMetrics::NAMES {
            header.push(name.to_owned());
            header.push(format!("{name}_Std"));
        }
        header.extend(sweep_keys.iter().cloned());
        writer.write_record(&header).map_err(csv_err(&path))?;

        for result in results {
            let mut row = vec![result.index.to_string()];
            for i in 0..PoolMetrics::NAMES.len() {
                row.push(fmt_float(result.summary.mean[i]));
                row.push(fmt_float(result.summary.std[i]));
            }
            for key in &sweep_keys {
                let value = result
                    .sweep
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| json_scalar(v))
                    .unwrap_or_default();
                row.push(value);
            }
            writer.write_record(&row).map_err(csv_err(&path))?;
        }
        writer.flush().map_err(io_err(&path))?;
        Ok(path)
    }

    /// `results_metrics.csv`: per-pool metric rows.
    pub fn write_metrics(
        &self,
        results: &[RoundResult],
    ) -> Result<PathBuf, OutputError> {
        let path = self.dir.join("results_metrics.csv");
        let mut writer =
            csv::Writer::from_path(&path).map_err(csv_err(&path))?;

        let mut header = vec!["round".to_owned(), "pool".to_owned()];
        header.extend(PoolMetrics::NAMES.iter().map(|n| n.to_string()));
        writer.write_record(&header).map_err(csv_err(&path))?;

        for result in results {
            for metrics in &result.per_pool {
                let mut row =
                    vec![result.index.to_string(), metrics.pool.clone()];
                row.extend(metrics.values().into_iter().map(fmt_float));
                writer.write_record(&row).map_err(csv_err(&path))?;
            }
        }
        writer.flush().map_err(io_err(&path))?;
        Ok(path)
    }

    /// `results_blocks.csv.gz`: every simulated block, history excluded.
    pub fn write_blocks(
        &self,
        results: &[RoundResult],
    ) -> Result<PathBuf, OutputError> {
        let path = self.dir.join("results_blocks.csv.gz");
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut writer = csv::Writer::from_writer(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        ));

        writer
            .write_record([
                "round",
                "blockId",
                "height",
                "poolId",
                "prevId",
                "simClock",
                "timestamp",
                "difficulty",
                "cumDifficulty",
                "nxtDifficulty",
                "broadcast",
            ])
            .map_err(csv_err(&path))?;

        for result in results {
            for block in &result.blocks {
                writer
                    .write_record([
                        result.index.to_string(),
                        block.id.to_string(),
                        block.height.to_string(),
                        block.pool.clone(),
                        block
                            .prev
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        fmt_float(block.sim_clock),
                        block
                            .timestamp
                            .map(|t| t.to_string())
                            .unwrap_or_default(),
                        block.difficulty.clone(),
                        block.cum_difficulty.clone(),
                        block.nxt_difficulty.clone().unwrap_or_default(),
                        tri_state(block.broadcast),
                    ])
                    .map_err(csv_err(&path))?;
            }
        }
        writer
            .into_inner()
            .map_err(|e| OutputError::Csv {
                path: path.clone(),
                message: e.to_string(),
            })?
            .finish()
            .map_err(io_err(&path))?;
        Ok(path)
    }

    /// `results_scores.csv.gz`: every per-pool score.
    pub fn write_scores(
        &self,
        results: &[RoundResult],
    ) -> Result<PathBuf, OutputError> {
        let path = self.dir.join("results_scores.csv.gz");
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut writer = csv::Writer::from_writer(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        ));

        writer
            .write_record([
                "round",
                "poolId",
                "blockId",
                "simClock",
                "localTime",
                "diffScore",
                "cumDiffScore",
                "isHeadPath",
                "chaintip",
            ])
            .map_err(csv_err(&path))?;

        for result in results {
            for score in &result.scores {
                writer
                    .write_record([
                        result.index.to_string(),
                        score.pool.clone(),
                        score.block.to_string(),
                        fmt_float(score.sim_clock),
                        score.local_time.to_string(),
                        score.diff_score.clone().unwrap_or_default(),
                        score.cum_diff_score.clone().unwrap_or_default(),
                        score.is_head_path.to_string(),
                        score
                            .chaintip
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                    ])
                    .map_err(csv_err(&path))?;
            }
        }
        writer
            .into_inner()
            .map_err(|e| OutputError::Csv {
                path: path.clone(),
                message: e.to_string(),
            })?
            .finish()
            .map_err(io_err(&path))?;
        Ok(path)
    }

    /// `historical_blocks.csv`: the bootstrap history echoed once per run,
    /// in its original (un-rebased) values.
    pub fn write_historical(
        &self,
        bootstrap: &[BootstrapRow],
    ) -> Result<PathBuf, OutputError> {
        let path = self.dir.join("historical_blocks.csv");
        let mut writer =
            csv::Writer::from_path(&path).map_err(csv_err(&path))?;
        writer
            .write_record([
                "height",
                "timestamp",
                "difficulty",
                "cumulative_difficulty",
            ])
            .map_err(csv_err(&path))?;
        for row in bootstrap {
            writer
                .write_record([
                    row.height.to_string(),
                    row.timestamp.to_string(),
                    row.difficulty.to_string(),
                    row.cum_difficulty.to_string(),
                ])
                .map_err(csv_err(&path))?;
        }
        writer.flush().map_err(io_err(&path))?;
        Ok(path)
    }

    /// `config_snapshot.json`: the fully resolved effective configuration.
    /// Feeding it back in reproduces the run.
    pub fn write_snapshot(
        &self,
        config: &SimConfig,
    ) -> Result<PathBuf, OutputError> {
        let path = self.dir.join("config_snapshot.json");
        let file = File::create(&path).map_err(io_err(&path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), config).map_err(
            |e| OutputError::Csv {
                path: path.clone(),
                message: e.to_string(),
            },
        )?;
        Ok(path)
    }
}

fn fmt_float(value: f64) -> String {
    format!("{value:.precision$}", precision = FLOAT_DIGITS)
}

/// Renders a sweep value for a CSV cell: strings bare, everything else in
/// JSON form.
fn json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tri_state(flag: Option<bool>) -> String {
    match flag {
        None => String::new(),
        Some(b) => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Summary;

    fn result(index: usize, mean: f64) -> RoundResult {
        RoundResult {
            index,
            per_pool: vec![],
            summary: Summary {
                mean: [mean; 7],
                std: [0.0; 7],
            },
            partial: false,
            events: 10,
            final_clock: 100.0,
            sweep: vec![(
                "internet.ping_ms".into(),
                serde_json::json!(70.0),
            )],
            blocks: vec![],
            scores: vec![],
        }
    }

    #[test]
    fn summary_csv_shape() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path()).unwrap();
        let path = writer
            .write_summary(&[result(0, 0.25), result(1, 0.5)])
            .unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("round,orphanRate,orphanRate_Std,"));
        assert!(header.ends_with("internet.ping_ms"));
        assert_eq!(lines.clone().count(), 2);
        let first = lines.next().unwrap();
        assert!(first.starts_with("0,0.250000,0.000000,"));
        assert!(first.ends_with(",70.0"));
    }

    #[test]
    fn identical_results_write_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let a = OutputWriter::new(&dir.path().join("a")).unwrap();
        let b = OutputWriter::new(&dir.path().join("b")).unwrap();
        let results = [result(0, 0.125)];
        let pa = a.write_summary(&results).unwrap();
        let pb = b.write_summary(&results).unwrap();
        assert_eq!(
            std::fs::read(pa).unwrap(),
            std::fs::read(pb).unwrap()
        );
    }
}
