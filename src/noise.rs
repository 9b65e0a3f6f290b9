//! Seeded noise streams: one-way delays, transmission times, block find
//! times, and NTP drift.
//!
//! Every sampler draws from its own linear-congruential stream derived from
//! the round seed, so that permutation sweeps which change one scalar leave
//! the other samplers' draws untouched.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Exp, LogNormal, Normal};
use serde::{Deserialize, Serialize};

// Knuth's MMIX multiplier/increment.
const LCG_MUL: u64 = 6364136223846793005;
const LCG_INC: u64 = 1442695040888963407;

// Fixed per-stream offsets XORed into the round seed.
const STREAM_OWD_P2P: u64 = 0x9e37_79b9_7f4a_7c15;
const STREAM_OWD_P2H: u64 = 0x2545_f491_4f6c_dd1d;
const STREAM_TX_TIME: u64 = 0x6a09_e667_f3bc_c909;
const STREAM_BLOCK_TIME: u64 = 0xbb67_ae85_84ca_a73b;
const STREAM_NTP: u64 = 0x3c6e_f372_fe94_f82b;
const STREAM_SPIKE: u64 = 0xa54f_f53a_5f1d_36f1;

/// A 64-bit linear congruential generator usable wherever `rand` expects an
/// RNG.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    pub fn new(seed: u64) -> Self {
        // Burn one step so nearby seeds diverge immediately.
        let mut rng = Lcg64 { state: seed };
        rng.next_u64();
        rng
    }

    fn stream(seed: u64, offset: u64) -> Self {
        Self::new(seed ^ offset)
    }
}

impl RngCore for Lcg64 {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(LCG_MUL).wrapping_add(LCG_INC);
        // The low bits of a raw LCG cycle with tiny period; the ziggurat
        // samplers index tables with them, so mix before handing out.
        let mut output = self.state;
        output ^= output >> 33;
        output
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Network-model parameters, as configured (ping in milliseconds, block size
/// in kB).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InternetParams {
    pub ping_ms: f64,
    /// Coefficient of variation shared by the log-normal delay samplers.
    pub cv: f64,
    pub mbps: f64,
    /// Standard deviation of per-pool NTP drift, in seconds.
    pub ntp_stdev: f64,
    pub block_size_kb: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum NoiseError {
    #[error("log-normal mean must be positive, got {0}")]
    NonPositiveMean(f64),
    #[error("invalid distribution parameters: {0}")]
    BadParameters(String),
}

/// Log-normal sampler parameterized so that its mean equals `mean`.
#[derive(Debug, Clone)]
struct MeanLogNormal {
    dist: LogNormal<f64>,
}

impl MeanLogNormal {
    fn new(mean: f64, cv: f64) -> Result<Self, NoiseError> {
        if mean <= 0.0 {
            return Err(NoiseError::NonPositiveMean(mean));
        }
        let sigma = (1.0 + cv * cv).ln().sqrt();
        let mu = mean.ln() - sigma * sigma / 2.0;
        let dist = LogNormal::new(mu, sigma)
            .map_err(|e| NoiseError::BadParameters(e.to_string()))?;
        Ok(MeanLogNormal { dist })
    }

    fn sample(&self, rng: &mut Lcg64) -> f64 {
        self.dist.sample(rng)
    }
}

/// The per-round noise model. Owns six independent LCG streams: one per
/// sampler plus one for the tail-spike coin.
#[derive(Debug, Clone)]
pub struct NoiseModel {
    ping_secs: f64,
    owd_p2p: MeanLogNormal,
    owd_p2p_rng: Lcg64,
    owd_p2h: MeanLogNormal,
    owd_p2h_rng: Lcg64,
    tx_time: MeanLogNormal,
    tx_time_rng: Lcg64,
    block_time_rng: Lcg64,
    ntp: Normal<f64>,
    ntp_rng: Lcg64,
    spike_rng: Lcg64,
}

/// Base spike probability for pool-to-pool delays.
const SPIKE_BASE_P2P: f64 = 0.01;
/// Base spike probability for pool-to-hasher delays.
const SPIKE_BASE_P2H: f64 = 0.04;

impl NoiseModel {
    pub fn new(seed: u64, params: &InternetParams) -> Result<Self, NoiseError> {
        let ping_secs = params.ping_ms / 1000.0;
        let tx_mean = params.block_size_kb / (params.mbps * 1024.0 / 8.0);
        let ntp = Normal::new(0.0, params.ntp_stdev)
            .map_err(|e| NoiseError::BadParameters(e.to_string()))?;

        Ok(NoiseModel {
            ping_secs,
            owd_p2p: MeanLogNormal::new(ping_secs, params.cv)?,
            owd_p2p_rng: Lcg64::stream(seed, STREAM_OWD_P2P),
            owd_p2h: MeanLogNormal::new(2.0 * ping_secs, params.cv)?,
            owd_p2h_rng: Lcg64::stream(seed, STREAM_OWD_P2H),
            tx_time: MeanLogNormal::new(tx_mean, params.cv)?,
            tx_time_rng: Lcg64::stream(seed, STREAM_TX_TIME),
            block_time_rng: Lcg64::stream(seed, STREAM_BLOCK_TIME),
            ntp,
            ntp_rng: Lcg64::stream(seed, STREAM_NTP),
            spike_rng: Lcg64::stream(seed, STREAM_SPIKE),
        })
    }

    /// One-way pool-to-pool delay, seconds.
    pub fn owd_p2p(&mut self) -> f64 {
        let base = self.owd_p2p.sample(&mut self.owd_p2p_rng);
        self.maybe_spike(SPIKE_BASE_P2P, base)
    }

    /// One-way pool-to-hasher delay (template send), seconds.
    pub fn owd_p2h(&mut self) -> f64 {
        let base = self.owd_p2h.sample(&mut self.owd_p2h_rng);
        self.maybe_spike(SPIKE_BASE_P2H, base)
    }

    /// Full-block transmission time, seconds.
    pub fn tx_time(&mut self) -> f64 {
        self.tx_time.sample(&mut self.tx_time_rng)
    }

    /// Exponential block-find time for the given Poisson rate. A
    /// non-positive rate yields an infinite find time, which the event loop
    /// never reaches.
    pub fn block_time(&mut self, lambda: f64) -> f64 {
        if !(lambda > 0.0) || !lambda.is_finite() {
            return f64::INFINITY;
        }
        match Exp::new(lambda) {
            Ok(dist) => dist.sample(&mut self.block_time_rng),
            Err(_) => f64::INFINITY,
        }
    }

    /// Constant per-pool NTP drift, sampled once per pool at round start.
    pub fn ntp_drift(&mut self) -> f64 {
        self.ntp.sample(&mut self.ntp_rng)
    }

    /// Tail spikes model global network degradation growing with baseline
    /// ping: with probability `spikeProb(base)` the sample is multiplied by
    /// `1 + (1 + ping)^0.7`.
    fn maybe_spike(&mut self, base_prob: f64, sample: f64) -> f64 {
        let ping = self.ping_secs;
        let p = (base_prob - 0.01) + (1.0 - base_prob) * ping / (ping + 5.0);
        if self.spike_rng.gen::<f64>() < p {
            sample * (1.0 + (1.0 + ping).powf(0.7))
        } else {
            sample
        }
    }
}
