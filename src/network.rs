//! Helpers for wiring reactions across many voxels.

use crate::error::{SimError, SimResult};
use crate::reaction::{PropensityFn, Reaction};
use crate::voxel::Voxel;

/// Attaches a copy of `reaction` to every voxel.
pub fn add_reaction_to_voxels(reaction: &Reaction, voxels: &mut [Voxel]) -> SimResult<()> {
    for voxel in voxels.iter_mut() {
        voxel.add_reaction(reaction.clone())?;
    }
    Ok(())
}

/// Adds one transfer `i -> j` for every positive off-diagonal `jump_rates[i][j]`.
pub fn add_transfers(
    voxels: &mut [Voxel],
    jump_rates: &[Vec<f64>],
    propensity: PropensityFn,
    stoichiometry: &[i32],
) -> SimResult<()> {
    if jump_rates.len() != voxels.len() {
        return Err(SimError::Shape(format!(
            "jump rate matrix has {} rows for {} voxels",
            jump_rates.len(),
            voxels.len()
        )));
    }
    let n_voxels = voxels.len();
    for (i, row) in jump_rates.iter().enumerate() {
        if row.len() != n_voxels {
            return Err(SimError::Shape(format!(
                "jump rate row {} has {} entries for {} voxels",
                i,
                row.len(),
                n_voxels
            )));
        }
        for (j, &rate) in row.iter().enumerate() {
            if i == j || rate == 0.0 {
                continue;
            }
            let reaction =
                Reaction::from_parts(rate, propensity.clone(), stoichiometry.to_vec(), Some(j))?;
            voxels[i].add_reaction(reaction)?;
        }
    }
    Ok(())
}

/// Symmetric nearest-neighbour transfers along a line of voxels.
pub fn connect_chain(
    voxels: &mut [Voxel],
    rate: f64,
    propensity: PropensityFn,
    stoichiometry: &[i32],
) -> SimResult<()> {
    for i in 1..voxels.len() {
        let right =
            Reaction::from_parts(rate, propensity.clone(), stoichiometry.to_vec(), Some(i))?;
        voxels[i - 1].add_reaction(right)?;
        let left =
            Reaction::from_parts(rate, propensity.clone(), stoichiometry.to_vec(), Some(i - 1))?;
        voxels[i].add_reaction(left)?;
    }
    Ok(())
}
