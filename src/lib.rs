//! Spatial stochastic simulation on networks of well-mixed voxels.
//!
//! Reactions live in voxels; transfers between voxels model diffusion. A
//! [`Simulator`] runs Gillespie's direct method over the whole network,
//! re-evaluating voxel sizes and propensities at every event so growing or
//! shrinking domains are handled exactly.
//!
//! ```no_run
//! use stospa::{Reaction, Simulator, Voxel};
//!
//! # fn main() -> stospa::SimResult<()> {
//! let mut voxel = Voxel::new(vec![10], 1.0)?;
//! voxel.add_reaction(Reaction::new(1.5, |counts, _| counts[0] as f64, vec![-1])?)?;
//! let mut sim = Simulator::new(vec![voxel])?;
//! sim.set_seed(153);
//! sim.run("decay.dat", 0.01, 500)?;
//! # Ok(())
//! # }
//! ```

mod ensemble;
mod error;
mod model;
mod network;
mod reaction;
mod selection;
mod simulator;
mod trajectory;
mod voxel;

pub use ensemble::{run_ensemble, EnsembleConfig, EnsembleOutput, OutputMode};
pub use error::{SimError, SimResult};
pub use model::{
    compile_growth, compile_propensity, ModelSpec, OverrideSpec, ReactionSpec, RunSpec,
    Topology, TransferSpec, UniformSpec, VoxelLayout, VoxelSpec,
};
pub use network::{add_reaction_to_voxels, add_transfers, connect_chain};
pub use reaction::{PropensityFn, Reaction};
pub use selection::Selection;
pub use simulator::{AdvanceOutcome, Event, RunSummary, Simulator, StepOutcome};
pub use trajectory::{Trajectory, TrajectoryWriter};
pub use voxel::{GrowthFn, Voxel};
