//! Direct-method SSA over a network of voxels.
//!
//! Every event recomputes all propensities at the current time: growing
//! voxels make them time-dependent, so nothing is carried between events.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};
use tracing::{debug, trace, warn};

use crate::error::{SimError, SimResult};
use crate::selection::{select_linear, PropensityTree, Selection};
use crate::trajectory::TrajectoryWriter;
use crate::voxel::Voxel;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub voxel: usize,
    pub reaction: usize,
    pub time: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    Fired(Event),
    /// Total propensity is zero: nothing can fire and time did not move.
    Absorbing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Reached,
    /// Stopped short of the target time because no event can fire.
    /// This is a terminal condition, not an error.
    Absorbing,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    pub rows: usize,
    pub events: u64,
    pub final_time: f64,
    pub absorbed: bool,
}

pub struct Simulator {
    voxels: Vec<Voxel>,
    n_species: usize,
    time: f64,
    seed: u64,
    rng: ChaCha8Rng,
    selection: Selection,
    events: u64,
    /// `(voxel, reaction)` for every entry of the global propensity list.
    owners: Vec<(usize, usize)>,
    propensities: Vec<f64>,
    tree: PropensityTree,
}

impl Simulator {
    // Seed drawn from OS entropy, readable through `seed()`.
    pub fn new(voxels: Vec<Voxel>) -> SimResult<Self> {
        Self::with_seed(voxels, rand::random())
    }

    pub fn with_seed(voxels: Vec<Voxel>, seed: u64) -> SimResult<Self> {
        let n_species = voxels.first().map(Voxel::n_species).unwrap_or(0);
        let mut owners = Vec::new();
        for (v, voxel) in voxels.iter().enumerate() {
            if voxel.n_species() != n_species {
                return Err(SimError::Shape(format!(
                    "voxel {} has {} species, expected {}",
                    v,
                    voxel.n_species(),
                    n_species
                )));
            }
            for (r, reaction) in voxel.reactions().iter().enumerate() {
                if let Some(target) = reaction.target() {
                    if target >= voxels.len() {
                        return Err(SimError::InvalidArgument(format!(
                            "reaction {} of voxel {} targets voxel {} but only {} voxels exist",
                            r,
                            v,
                            target,
                            voxels.len()
                        )));
                    }
                    if target == v {
                        return Err(SimError::InvalidArgument(format!(
                            "reaction {} of voxel {} transfers into its own voxel",
                            r, v
                        )));
                    }
                }
                owners.push((v, r));
            }
        }
        debug!(
            voxels = voxels.len(),
            species = n_species,
            reactions = owners.len(),
            seed,
            "simulator constructed"
        );
        Ok(Self {
            voxels,
            n_species,
            time: 0.0,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            selection: Selection::default(),
            events: 0,
            tree: PropensityTree::new(owners.len()),
            propensities: Vec::with_capacity(owners.len()),
            owners,
        })
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn set_seed(&mut self, seed: u64) {
        debug!(seed, "reseeding simulator");
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn into_voxels(self) -> Vec<Voxel> {
        self.voxels
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn events_fired(&self) -> u64 {
        self.events
    }

    // voxel-major, species-minor
    pub fn molecules(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.voxels.len() * self.n_species);
        for voxel in &self.voxels {
            out.extend_from_slice(voxel.molecules());
        }
        out
    }

    pub fn total_propensity(&self) -> SimResult<f64> {
        self.voxels
            .iter()
            .map(|voxel| voxel.total_propensity(self.time))
            .sum()
    }

    pub fn set_rate(&mut self, voxel: usize, reaction: usize, rate: f64) -> SimResult<()> {
        let n_voxels = self.voxels.len();
        let target = self
            .voxels
            .get_mut(voxel)
            .ok_or_else(|| {
                SimError::InvalidArgument(format!(
                    "voxel index {} exceeds number of voxels {}",
                    voxel, n_voxels
                ))
            })?
            .reaction_mut(reaction)
            .ok_or_else(|| {
                SimError::InvalidArgument(format!(
                    "voxel {} has no reaction {}",
                    voxel, reaction
                ))
            })?;
        target.set_rate(rate)
    }

    fn refresh_propensities(&mut self) -> SimResult<f64> {
        self.propensities.clear();
        let mut total = 0.0;
        for voxel in &self.voxels {
            total += voxel.propensities_into(self.time, &mut self.propensities)?;
        }
        if !total.is_finite() {
            return Err(SimError::Domain(format!(
                "total propensity is {} at t = {}",
                total, self.time
            )));
        }
        if self.selection == Selection::Indexed {
            self.tree.rebuild(&self.propensities);
            total = self.tree.total();
        }
        Ok(total)
    }

    /// Fires exactly one event, or reports that none can fire.
    ///
    /// Propensity errors are raised before anything is mutated.
    pub fn step(&mut self) -> SimResult<StepOutcome> {
        let total = self.refresh_propensities()?;
        if total <= 0.0 {
            return Ok(StepOutcome::Absorbing);
        }

        let waiting = Exp::new(total).map_err(|e| {
            SimError::Domain(format!("cannot sample waiting time for rate {}: {}", total, e))
        })?;
        let dt = waiting.sample(&mut self.rng);
        let u: f64 = self.rng.r#gen::<f64>() * total;
        let chosen = match self.selection {
            Selection::Linear => select_linear(&self.propensities, u),
            Selection::Indexed => {
                debug_assert_eq!(self.tree.len(), self.propensities.len());
                self.tree.select(u)
            }
        };
        let (voxel, reaction) = self.owners[chosen];

        let transfer_target = self.voxels[voxel].reactions()[reaction].target();
        self.time += dt;
        match transfer_target {
            None => self.voxels[voxel].apply_reaction(reaction),
            Some(target) => {
                let (source, sink) = pair_mut(&mut self.voxels, voxel, target);
                source.apply_reaction(reaction);
                sink.receive(source.reactions()[reaction].stoichiometry());
            }
        }
        self.events += 1;

        let event = Event {
            voxel,
            reaction,
            time: self.time,
        };
        trace!(voxel, reaction, time = self.time, dt, "reaction fired");
        Ok(StepOutcome::Fired(event))
    }

    /// Steps until `time >= target_time`.
    ///
    /// The final time is that of the last fired event and may overshoot the
    /// target; it is never clamped. If the system becomes absorbing first,
    /// returns [`AdvanceOutcome::Absorbing`] with time left short of the target.
    pub fn advance(&mut self, target_time: f64) -> SimResult<AdvanceOutcome> {
        if target_time.is_nan() {
            return Err(SimError::InvalidArgument(
                "target time must be a number".into(),
            ));
        }
        while self.time < target_time {
            if self.step()? == StepOutcome::Absorbing {
                warn!(
                    time = self.time,
                    target_time, "absorbing state reached before target time"
                );
                return Ok(AdvanceOutcome::Absorbing);
            }
        }
        Ok(AdvanceOutcome::Reached)
    }

    /// Samples the state every `dt` for `n_steps` points (the first at
    /// `t = 0`) and writes the trajectory to `path`.
    pub fn run<P: AsRef<Path>>(&mut self, path: P, dt: f64, n_steps: usize) -> SimResult<RunSummary> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), dt, n_steps, "starting run");
        self.run_to_writer(file, dt, n_steps)
    }

    pub fn run_to_writer<W: Write>(
        &mut self,
        writer: W,
        dt: f64,
        n_steps: usize,
    ) -> SimResult<RunSummary> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "sampling interval must be positive, got {}",
                dt
            )));
        }
        let events_before = self.events;
        let mut output = TrajectoryWriter::new(writer);
        output.write_header(self.seed, self.voxels.len(), self.n_species)?;

        let mut absorbed = false;
        for i in 0..n_steps {
            if !absorbed {
                absorbed = self.advance(dt * i as f64)? == AdvanceOutcome::Absorbing;
            }
            output.write_row(self.time, &self.voxels)?;
            output.flush()?;
        }

        let summary = RunSummary {
            rows: n_steps,
            events: self.events - events_before,
            final_time: self.time,
            absorbed,
        };
        debug!(
            rows = summary.rows,
            events = summary.events,
            final_time = summary.final_time,
            absorbed,
            "run finished"
        );
        Ok(summary)
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("time", &self.time)
            .field("seed", &self.seed)
            .field("selection", &self.selection)
            .field("events", &self.events)
            .field("voxels", &self.voxels)
            .finish_non_exhaustive()
    }
}

/// Disjoint mutable borrows of two voxels. `a != b` is checked at construction.
fn pair_mut(voxels: &mut [Voxel], a: usize, b: usize) -> (&mut Voxel, &mut Voxel) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = voxels.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = voxels.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
