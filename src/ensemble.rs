//! Independent replicate simulations fanned out over rayon.
//!
//! Each replicate owns its own voxels, simulator and ChaCha stream; nothing
//! mutable is shared between them.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SimError, SimResult};
use crate::selection::Selection;
use crate::simulator::Simulator;
use crate::voxel::Voxel;

const TIME_EPSILON: f64 = 1e-12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Timeseries,
    #[default]
    FinalOnly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub n_replicates: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub n_threads: Option<usize>,
    pub t_end: f64,
    #[serde(default)]
    pub sample_times: Vec<f64>,
    #[serde(default)]
    pub mode: OutputMode,
    #[serde(default)]
    pub selection: Selection,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_replicates: 1,
            seed: None,
            n_threads: None,
            t_end: 1.0,
            sample_times: Vec::new(),
            mode: OutputMode::FinalOnly,
            selection: Selection::Linear,
        }
    }
}

impl EnsembleConfig {
    fn validate(&self) -> SimResult<()> {
        if self.n_replicates == 0 {
            return Err(SimError::InvalidArgument(
                "number of replicates must be greater than zero".into(),
            ));
        }
        if self.t_end.is_nan() || self.t_end <= 0.0 {
            return Err(SimError::InvalidArgument("t_end must be positive".into()));
        }
        if self.mode == OutputMode::Timeseries {
            if self.sample_times.is_empty() {
                return Err(SimError::InvalidArgument(
                    "timeseries mode requires sample times".into(),
                ));
            }
            if self
                .sample_times
                .windows(2)
                .any(|w| w[0] > w[1] + TIME_EPSILON)
            {
                return Err(SimError::InvalidArgument(
                    "sample times must be sorted in ascending order".into(),
                ));
            }
            if self
                .sample_times
                .iter()
                .any(|&t| t.is_nan() || t < 0.0 || t > self.t_end + TIME_EPSILON)
            {
                return Err(SimError::InvalidArgument(
                    "sample times must lie between 0 and t_end".into(),
                ));
            }
        }
        Ok(())
    }

    fn n_times(&self) -> usize {
        match self.mode {
            OutputMode::Timeseries => self.sample_times.len(),
            OutputMode::FinalOnly => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleOutput {
    /// `[replicate][time][column]`, flattened.
    pub data: Vec<u32>,
    /// Simulation time reached at each recorded point, `[replicate][time]`.
    pub times: Vec<f64>,
    pub n_replicates: usize,
    pub n_times: usize,
    pub n_columns: usize,
    pub mode: OutputMode,
}

impl EnsembleOutput {
    pub fn replicate(&self, replicate: usize) -> &[u32] {
        let stride = self.n_times * self.n_columns;
        &self.data[replicate * stride..(replicate + 1) * stride]
    }

    pub fn state(&self, replicate: usize, time_idx: usize) -> &[u32] {
        let start = time_idx * self.n_columns;
        &self.replicate(replicate)[start..start + self.n_columns]
    }

    /// Per-column mean over replicates at one recorded time.
    pub fn mean(&self, time_idx: usize) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_columns];
        for replicate in 0..self.n_replicates {
            for (sum, &count) in sums.iter_mut().zip(self.state(replicate, time_idx)) {
                *sum += count as f64;
            }
        }
        sums.iter()
            .map(|sum| sum / self.n_replicates as f64)
            .collect()
    }
}

/// Runs `config.n_replicates` independent simulations of `voxels`.
///
/// Replicate `i` is seeded with `derive_seed(config.seed, i)`, so results do
/// not depend on the thread count.
pub fn run_ensemble(voxels: &[Voxel], config: &EnsembleConfig) -> SimResult<EnsembleOutput> {
    config.validate()?;
    // Surface topology errors once instead of once per replicate.
    let n_columns = Simulator::with_seed(voxels.to_vec(), 0)?.molecules().len();
    if n_columns == 0 {
        return Err(SimError::InvalidArgument(
            "ensemble needs at least one voxel with at least one species".into(),
        ));
    }

    let n_times = config.n_times();
    let stride = n_times * n_columns;
    let mut data = vec![0u32; config.n_replicates * stride];
    let mut times = vec![0.0f64; config.n_replicates * n_times];

    let mut simulate = || -> SimResult<()> {
        data.par_chunks_mut(stride)
            .zip(times.par_chunks_mut(n_times))
            .enumerate()
            .try_for_each(|(replicate, (chunk, time_chunk))| {
                simulate_replicate(voxels, config, replicate as u64, chunk, time_chunk)
            })
    };

    match config.n_threads {
        Some(n) => ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| SimError::ThreadPool(e.to_string()))?
            .install(|| simulate())?,
        None => simulate()?,
    };

    info!(
        replicates = config.n_replicates,
        n_times,
        n_columns,
        "ensemble finished"
    );
    Ok(EnsembleOutput {
        data,
        times,
        n_replicates: config.n_replicates,
        n_times,
        n_columns,
        mode: config.mode,
    })
}

fn simulate_replicate(
    voxels: &[Voxel],
    config: &EnsembleConfig,
    replicate: u64,
    output: &mut [u32],
    times: &mut [f64],
) -> SimResult<()> {
    let seed = derive_seed(config.seed, replicate);
    let mut sim = Simulator::with_seed(voxels.to_vec(), seed)?.with_selection(config.selection);
    let targets: &[f64] = match config.mode {
        OutputMode::Timeseries => &config.sample_times,
        OutputMode::FinalOnly => std::slice::from_ref(&config.t_end),
    };
    let n_columns = sim.molecules().len();
    for (idx, &target) in targets.iter().enumerate() {
        sim.advance(target)?;
        let start = idx * n_columns;
        output[start..start + n_columns].copy_from_slice(&sim.molecules());
        times[idx] = sim.time();
    }
    Ok(())
}

pub(crate) fn derive_seed(seed: Option<u64>, replicate: u64) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;
    let base = seed.unwrap_or(0xDEADBEEFCAFEBABE);
    let mut z = base ^ (replicate.wrapping_mul(GOLDEN_GAMMA));
    // SplitMix64
    z = z.wrapping_add(GOLDEN_GAMMA);
    let mut result = z;
    result = (result ^ (result >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    result = (result ^ (result >> 27)).wrapping_mul(0x94D049BB133111EB);
    result ^ (result >> 31)
}
