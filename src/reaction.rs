use std::fmt;
use std::sync::Arc;

use crate::error::{SimError, SimResult};

/// Propensity evaluator: `(molecule counts, voxel size) -> propensity / rate`.
pub type PropensityFn = Arc<dyn Fn(&[u32], f64) -> f64 + Send + Sync>;

/// A reaction channel owned by a voxel.
///
/// A reaction without a target changes only its owning voxel. With a target it
/// is a transfer: the owner receives the stoichiometry and the target voxel
/// receives its negation, so the pair always conserves molecules.
#[derive(Clone)]
pub struct Reaction {
    rate: f64,
    propensity: PropensityFn,
    stoichiometry: Vec<i32>,
    target: Option<usize>,
}

fn check_rate(rate: f64) -> SimResult<()> {
    if rate.is_nan() || rate < 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "reaction rate must be non-negative, got {}",
            rate
        )));
    }
    Ok(())
}

impl Reaction {
    pub fn new<F>(rate: f64, propensity: F, stoichiometry: Vec<i32>) -> SimResult<Self>
    where
        F: Fn(&[u32], f64) -> f64 + Send + Sync + 'static,
    {
        Self::from_parts(rate, Arc::new(propensity), stoichiometry, None)
    }

    pub fn transfer<F>(
        rate: f64,
        propensity: F,
        stoichiometry: Vec<i32>,
        target: usize,
    ) -> SimResult<Self>
    where
        F: Fn(&[u32], f64) -> f64 + Send + Sync + 'static,
    {
        Self::from_parts(rate, Arc::new(propensity), stoichiometry, Some(target))
    }

    pub fn from_parts(
        rate: f64,
        propensity: PropensityFn,
        stoichiometry: Vec<i32>,
        target: Option<usize>,
    ) -> SimResult<Self> {
        check_rate(rate)?;
        Ok(Self {
            rate,
            propensity,
            stoichiometry,
            target,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) -> SimResult<()> {
        check_rate(rate)?;
        self.rate = rate;
        Ok(())
    }

    pub fn stoichiometry(&self) -> &[i32] {
        &self.stoichiometry
    }

    pub fn target(&self) -> Option<usize> {
        self.target
    }

    pub fn is_transfer(&self) -> bool {
        self.target.is_some()
    }

    /// `rate * evaluator(counts, size)`.
    ///
    /// Negative or non-finite values are rejected instead of clamped.
    #[inline]
    pub fn evaluate(&self, counts: &[u32], size: f64) -> SimResult<f64> {
        let value = self.rate * (self.propensity)(counts, size);
        if !value.is_finite() || value < 0.0 {
            return Err(SimError::Domain(format!(
                "propensity evaluated to {} (rate {}, size {})",
                value, self.rate, size
            )));
        }
        Ok(value)
    }

    /// Returns `counts` with the stoichiometry added. Panics if a count would
    /// drop below zero.
    pub fn apply(&self, counts: &[u32]) -> Vec<u32> {
        let mut next = counts.to_vec();
        add_delta(&mut next, &self.stoichiometry, 1);
        next
    }
}

// counts += sign * delta; panics on underflow with counts untouched.
pub(crate) fn add_delta(counts: &mut [u32], delta: &[i32], sign: i32) {
    assert_eq!(
        counts.len(),
        delta.len(),
        "stoichiometry length does not match species count"
    );
    let next: Vec<u32> = counts
        .iter()
        .zip(delta)
        .enumerate()
        .map(|(species, (&count, &d))| {
            count.checked_add_signed(sign * d).unwrap_or_else(|| {
                panic!(
                    "molecule count of species {} left its valid range ({} {:+})",
                    species,
                    count,
                    sign * d
                )
            })
        })
        .collect();
    counts.copy_from_slice(&next);
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("rate", &self.rate)
            .field("stoichiometry", &self.stoichiometry)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reaction: rate = {}", self.rate)?;
        match self.target {
            Some(target) => write!(f, "; target voxel = {}", target)?,
            None => write!(f, "; local")?,
        }
        write!(f, "; stoichiometry =")?;
        for s in &self.stoichiometry {
            write!(f, " {}", s)?;
        }
        Ok(())
    }
}

// Evaluators are opaque, so equality only covers the observable fields.
impl PartialEq for Reaction {
    fn eq(&self, other: &Self) -> bool {
        self.rate == other.rate
            && self.target == other.target
            && self.stoichiometry == other.stoichiometry
    }
}
