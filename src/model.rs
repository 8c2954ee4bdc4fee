//! JSON model descriptions with expression-based propensities.
//!
//! Propensity expressions see `s0`, `s1`, ... (or `S0`, ...) for species
//! counts and `size` for the voxel size at the current time. Growth laws see
//! `t`. The usual `meval` builtins (`sqrt`, `exp`, `pi`, ...) are available.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use meval::{Context, ContextProvider, Expr};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::network::{add_transfers, connect_chain};
use crate::reaction::{PropensityFn, Reaction};
use crate::selection::Selection;
use crate::simulator::{RunSummary, Simulator};
use crate::voxel::{GrowthFn, Voxel};

thread_local! {
    static BUILTINS: Context<'static> = Context::new();
}

fn default_size() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub species: Vec<String>,
    pub voxels: VoxelLayout,
    #[serde(default)]
    pub reactions: Vec<ReactionSpec>,
    #[serde(default)]
    pub transfers: Vec<TransferSpec>,
    #[serde(default)]
    pub run: Option<RunSpec>,
}

/// Either an explicit list of voxels or `count` copies of one voxel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoxelLayout {
    Explicit(Vec<VoxelSpec>),
    Uniform(UniformSpec),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoxelSpec {
    pub molecules: Vec<u32>,
    #[serde(default = "default_size")]
    pub size: f64,
    #[serde(default)]
    pub growth: Option<String>,
    #[serde(default)]
    pub rescale_transfers: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniformSpec {
    pub count: usize,
    pub molecules: Vec<u32>,
    #[serde(default = "default_size")]
    pub size: f64,
    #[serde(default)]
    pub growth: Option<String>,
    #[serde(default)]
    pub rescale_transfers: bool,
    /// Initial counts for individual voxels that differ from `molecules`.
    #[serde(default)]
    pub overrides: Vec<OverrideSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideSpec {
    pub voxel: usize,
    pub molecules: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionSpec {
    pub rate: f64,
    pub propensity: String,
    pub stoichiometry: Vec<i32>,
    /// Voxels carrying this reaction; all of them when absent.
    #[serde(default)]
    pub voxels: Option<Vec<usize>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferSpec {
    pub rate: f64,
    pub propensity: String,
    pub stoichiometry: Vec<i32>,
    pub topology: Topology,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// Both directions between consecutive voxels.
    Chain,
    /// `jump_rates[i][j]` scales the transfer `i -> j`; the diagonal is ignored.
    Matrix { jump_rates: Vec<Vec<f64>> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
    #[serde(default)]
    pub seed: Option<u64>,
    pub dt: f64,
    pub n_steps: usize,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub selection: Selection,
}

impl ModelSpec {
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "loading model");
        Self::from_json_str(&text)
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn build_voxels(&self) -> SimResult<Vec<Voxel>> {
        let n_species = self.n_species();
        let mut voxels = match &self.voxels {
            VoxelLayout::Explicit(specs) => specs
                .iter()
                .map(|spec| {
                    build_voxel(
                        &spec.molecules,
                        spec.size,
                        spec.growth.as_deref(),
                        spec.rescale_transfers,
                        n_species,
                    )
                })
                .collect::<SimResult<Vec<_>>>()?,
            VoxelLayout::Uniform(spec) => {
                let mut voxels = (0..spec.count)
                    .map(|_| {
                        build_voxel(
                            &spec.molecules,
                            spec.size,
                            spec.growth.as_deref(),
                            spec.rescale_transfers,
                            n_species,
                        )
                    })
                    .collect::<SimResult<Vec<_>>>()?;
                for o in &spec.overrides {
                    let slot = voxels.get_mut(o.voxel).ok_or_else(|| {
                        SimError::InvalidArgument(format!(
                            "override refers to voxel {} but only {} exist",
                            o.voxel, spec.count
                        ))
                    })?;
                    *slot = build_voxel(
                        &o.molecules,
                        spec.size,
                        spec.growth.as_deref(),
                        spec.rescale_transfers,
                        n_species,
                    )?;
                }
                voxels
            }
        };

        for (idx, spec) in self.reactions.iter().enumerate() {
            let propensity = compile_propensity(&spec.propensity, n_species)?;
            let reaction =
                Reaction::from_parts(spec.rate, propensity, spec.stoichiometry.clone(), None)?;
            match &spec.voxels {
                Some(indices) => {
                    for &v in indices {
                        let n_voxels = voxels.len();
                        voxels
                            .get_mut(v)
                            .ok_or_else(|| {
                                SimError::InvalidArgument(format!(
                                    "reaction {} refers to voxel {} but only {} exist",
                                    idx, v, n_voxels
                                ))
                            })?
                            .add_reaction(reaction.clone())?;
                    }
                }
                None => {
                    for voxel in voxels.iter_mut() {
                        voxel.add_reaction(reaction.clone())?;
                    }
                }
            }
        }

        for spec in &self.transfers {
            let propensity = compile_propensity(&spec.propensity, n_species)?;
            match &spec.topology {
                Topology::Chain => {
                    connect_chain(&mut voxels, spec.rate, propensity, &spec.stoichiometry)?
                }
                Topology::Matrix { jump_rates } => {
                    let scaled: Vec<Vec<f64>> = jump_rates
                        .iter()
                        .map(|row| row.iter().map(|r| r * spec.rate).collect())
                        .collect();
                    add_transfers(&mut voxels, &scaled, propensity, &spec.stoichiometry)?
                }
            }
        }

        debug!(
            voxels = voxels.len(),
            species = n_species,
            "model compiled"
        );
        Ok(voxels)
    }

    /// Builds a simulator, seeded and configured from `run` when present.
    pub fn build_simulator(&self) -> SimResult<Simulator> {
        let voxels = self.build_voxels()?;
        match &self.run {
            Some(run) => {
                let sim = match run.seed {
                    Some(seed) => Simulator::with_seed(voxels, seed)?,
                    None => Simulator::new(voxels)?,
                };
                Ok(sim.with_selection(run.selection))
            }
            None => Simulator::new(voxels),
        }
    }

    /// Runs the model as described by its `run` block.
    pub fn run(&self) -> SimResult<RunSummary> {
        let run = self.run.as_ref().ok_or_else(|| {
            SimError::InvalidArgument("model has no run configuration".into())
        })?;
        let output = run.output.as_ref().ok_or_else(|| {
            SimError::InvalidArgument("run configuration has no output path".into())
        })?;
        self.build_simulator()?.run(output, run.dt, run.n_steps)
    }
}

fn build_voxel(
    molecules: &[u32],
    size: f64,
    growth: Option<&str>,
    rescale_transfers: bool,
    n_species: usize,
) -> SimResult<Voxel> {
    if molecules.len() != n_species {
        return Err(SimError::Shape(format!(
            "voxel has {} initial counts for {} species",
            molecules.len(),
            n_species
        )));
    }
    let mut voxel = match growth {
        Some(expr) => Voxel::with_growth_fn(molecules.to_vec(), size, compile_growth(expr)?)?,
        None => Voxel::new(molecules.to_vec(), size)?,
    };
    voxel.set_transfer_rescaling(rescale_transfers);
    Ok(voxel)
}

struct PropensityVars<'a> {
    counts: &'a [u32],
    size: f64,
}

impl<'a> ContextProvider for PropensityVars<'a> {
    fn get_var(&self, name: &str) -> Option<f64> {
        if name == "size" {
            return Some(self.size);
        }
        parse_species_variable(name)
            .and_then(|idx| self.counts.get(idx))
            .map(|&count| count as f64)
    }
}

struct GrowthVars {
    t: f64,
}

impl ContextProvider for GrowthVars {
    fn get_var(&self, name: &str) -> Option<f64> {
        (name == "t").then_some(self.t)
    }
}

/// Compiles a propensity expression over species counts and `size`.
///
/// Evaluation failures yield NaN, which the engine reports as a domain error.
pub fn compile_propensity(expression: &str, n_species: usize) -> SimResult<PropensityFn> {
    let expr = parse_expression(expression)?;
    collect_species_refs(expression, n_species)?;
    let zeros = vec![0u32; n_species];
    BUILTINS
        .with(|builtins| {
            expr.eval_with_context((
                PropensityVars {
                    counts: &zeros,
                    size: 1.0,
                },
                builtins,
            ))
        })
        .map_err(|e| SimError::Expression(format!("'{}': {}", expression, e)))?;
    Ok(Arc::new(move |counts: &[u32], size: f64| {
        BUILTINS.with(|builtins| {
            expr.eval_with_context((PropensityVars { counts, size }, builtins))
                .unwrap_or(f64::NAN)
        })
    }))
}

/// Compiles a growth law in `t`.
pub fn compile_growth(expression: &str) -> SimResult<GrowthFn> {
    let expr = parse_expression(expression)?;
    BUILTINS
        .with(|builtins| expr.eval_with_context((GrowthVars { t: 0.0 }, builtins)))
        .map_err(|e| SimError::Expression(format!("'{}': {}", expression, e)))?;
    Ok(Arc::new(move |t: f64| {
        BUILTINS.with(|builtins| {
            expr.eval_with_context((GrowthVars { t }, builtins))
                .unwrap_or(f64::NAN)
        })
    }))
}

fn parse_expression(expression: &str) -> SimResult<Expr> {
    Expr::from_str(expression)
        .map_err(|e| SimError::Expression(format!("'{}': {}", expression, e)))
}

pub(crate) fn collect_species_refs(expr_str: &str, n_species: usize) -> SimResult<Vec<usize>> {
    let mut refs = Vec::new();
    let bytes = expr_str.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        let ch = bytes[idx];
        let starts_word = idx == 0 || !(bytes[idx - 1].is_ascii_alphanumeric() || bytes[idx - 1] == b'_');
        if (ch == b's' || ch == b'S') && starts_word {
            let mut end = idx + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > idx + 1 {
                let digits = &expr_str[idx + 1..end];
                let species_idx = digits.parse::<usize>().map_err(|_| {
                    SimError::Expression(format!(
                        "'{}' contains invalid species index '{}'",
                        expr_str, digits
                    ))
                })?;
                if species_idx >= n_species {
                    return Err(SimError::Expression(format!(
                        "'{}' refers to species {} which exceeds number of species {}",
                        expr_str, species_idx, n_species
                    )));
                }
                if !refs.contains(&species_idx) {
                    refs.push(species_idx);
                }
                idx = end;
                continue;
            }
        }
        idx += 1;
    }
    Ok(refs)
}

fn parse_species_variable(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('s').or_else(|| name.strip_prefix('S'))?;
    if digits.is_empty() {
        return None;
    }
    digits.parse::<usize>().ok()
}
