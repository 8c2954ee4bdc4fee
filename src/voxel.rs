use std::fmt;
use std::sync::Arc;

use crate::error::{SimError, SimResult};
use crate::reaction::{add_delta, Reaction};

// Simulated time -> multiplicative factor on the reference size.
pub type GrowthFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// A well-mixed sub-volume.
#[derive(Clone)]
pub struct Voxel {
    molecules: Vec<u32>,
    size: f64,
    growth: Option<GrowthFn>,
    rescale_transfers: bool,
    reactions: Vec<Reaction>,
}

impl Voxel {
    pub fn new(molecules: Vec<u32>, size: f64) -> SimResult<Self> {
        if !size.is_finite() || size < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "voxel size must be finite and non-negative, got {}",
                size
            )));
        }
        Ok(Self {
            molecules,
            size,
            growth: None,
            rescale_transfers: false,
            reactions: Vec::new(),
        })
    }

    /// A voxel whose size at time `t` is `size * growth(t)`.
    pub fn with_growth<G>(molecules: Vec<u32>, size: f64, growth: G) -> SimResult<Self>
    where
        G: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self::with_growth_fn(molecules, size, Arc::new(growth))
    }

    pub fn with_growth_fn(molecules: Vec<u32>, size: f64, growth: GrowthFn) -> SimResult<Self> {
        let mut voxel = Self::new(molecules, size)?;
        voxel.growth = Some(growth);
        Ok(voxel)
    }

    pub fn molecules(&self) -> &[u32] {
        &self.molecules
    }

    pub fn n_species(&self) -> usize {
        self.molecules.len()
    }

    pub fn voxel_size(&self) -> f64 {
        self.size
    }

    pub fn is_growing(&self) -> bool {
        self.growth.is_some()
    }

    /// Scale transfer propensities by `1 / growth(t)^2`, so diffusion slows as
    /// the voxel grows. Has no effect on a voxel without a growth law.
    pub fn set_transfer_rescaling(&mut self, enabled: bool) {
        self.rescale_transfers = enabled;
    }

    pub fn rescales_transfers(&self) -> bool {
        self.rescale_transfers
    }

    /// Size at simulated time `t`. Evaluated on every call.
    pub fn size_at(&self, t: f64) -> SimResult<f64> {
        let size = match &self.growth {
            Some(growth) => self.size * growth(t),
            None => self.size,
        };
        if !size.is_finite() || size < 0.0 {
            return Err(SimError::Domain(format!(
                "voxel size evaluated to {} at t = {}",
                size, t
            )));
        }
        Ok(size)
    }

    pub fn add_reaction(&mut self, reaction: Reaction) -> SimResult<()> {
        if reaction.stoichiometry().len() != self.molecules.len() {
            return Err(SimError::Shape(format!(
                "stoichiometry length {} does not match number of species {}",
                reaction.stoichiometry().len(),
                self.molecules.len()
            )));
        }
        self.reactions.push(reaction);
        Ok(())
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn reaction_mut(&mut self, index: usize) -> Option<&mut Reaction> {
        self.reactions.get_mut(index)
    }

    pub fn clear_reactions(&mut self) {
        self.reactions.clear();
    }

    pub fn propensities(&self, t: f64) -> SimResult<Vec<f64>> {
        let mut out = Vec::with_capacity(self.reactions.len());
        self.propensities_into(t, &mut out)?;
        Ok(out)
    }

    fn transfer_scale(&self, t: f64) -> SimResult<f64> {
        match &self.growth {
            Some(growth) if self.rescale_transfers => {
                let factor = growth(t);
                let scale = 1.0 / (factor * factor);
                if !scale.is_finite() {
                    return Err(SimError::Domain(format!(
                        "transfer scale evaluated to {} at t = {}",
                        scale, t
                    )));
                }
                Ok(scale)
            }
            _ => Ok(1.0),
        }
    }

    // Appends the propensities at `t` to `out` and returns their sum.
    pub(crate) fn propensities_into(&self, t: f64, out: &mut Vec<f64>) -> SimResult<f64> {
        if self.reactions.is_empty() {
            return Ok(0.0);
        }
        let size = self.size_at(t)?;
        let scale = self.transfer_scale(t)?;
        let mut total = 0.0;
        for reaction in &self.reactions {
            let mut value = reaction.evaluate(&self.molecules, size)?;
            if reaction.is_transfer() {
                value *= scale;
                if !value.is_finite() {
                    return Err(SimError::Domain(format!(
                        "rescaled transfer propensity overflowed at t = {}",
                        t
                    )));
                }
            }
            total += value;
            out.push(value);
        }
        Ok(total)
    }

    pub fn total_propensity(&self, t: f64) -> SimResult<f64> {
        let mut scratch = Vec::with_capacity(self.reactions.len());
        self.propensities_into(t, &mut scratch)
    }

    /// Fires reaction `index` locally; the simulator handles the target side
    /// of a transfer. Panics if a count would become negative.
    pub fn apply_reaction(&mut self, index: usize) {
        let reaction = &self.reactions[index];
        add_delta(&mut self.molecules, reaction.stoichiometry(), 1);
    }

    pub(crate) fn receive(&mut self, stoichiometry: &[i32]) {
        add_delta(&mut self.molecules, stoichiometry, -1);
    }
}

impl fmt::Debug for Voxel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voxel")
            .field("molecules", &self.molecules)
            .field("size", &self.size)
            .field("growing", &self.is_growing())
            .field("rescale_transfers", &self.rescale_transfers)
            .field("reactions", &self.reactions)
            .finish()
    }
}

impl fmt::Display for Voxel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Voxel: molecules =")?;
        for m in &self.molecules {
            write!(f, " {}", m)?;
        }
        write!(
            f,
            "; voxel_size = {}; growing = {}",
            self.size,
            self.is_growing()
        )?;
        for reaction in &self.reactions {
            write!(f, "\n\t{}", reaction)?;
        }
        Ok(())
    }
}
