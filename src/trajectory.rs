//! Plain-text trajectory format.
//!
//! One whitespace-separated row per sampled time: the simulation time, then
//! every molecule count ordered voxel-major, species-minor. Lines starting
//! with `#` are comments.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::voxel::Voxel;

pub struct TrajectoryWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> TrajectoryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self, seed: u64, n_voxels: usize, n_species: usize) -> SimResult<()> {
        writeln!(self.inner, "# seed = {}", seed)?;
        writeln!(
            self.inner,
            "# time voxels ({}) species ({})",
            n_voxels, n_species
        )?;
        Ok(())
    }

    pub fn write_row(&mut self, time: f64, voxels: &[Voxel]) -> SimResult<()> {
        write!(self.inner, "{}", time)?;
        for voxel in voxels {
            for count in voxel.molecules() {
                write!(self.inner, " {}", count)?;
            }
        }
        writeln!(self.inner)?;
        Ok(())
    }

    pub fn flush(&mut self) -> SimResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// A trajectory read back from disk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    /// Row-major counts, `n_columns` per row.
    pub counts: Vec<u32>,
    pub n_columns: usize,
}

impl Trajectory {
    pub fn from_path<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> SimResult<Self> {
        let mut trajectory = Trajectory::default();
        let mut width: Option<usize> = None;
        for (line_no, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let time = fields
                .next()
                .and_then(|f| f.parse::<f64>().ok())
                .ok_or_else(|| {
                    SimError::InvalidArgument(format!("line {}: invalid time column", line_no + 1))
                })?;
            let before = trajectory.counts.len();
            for field in fields {
                let count = field.parse::<u32>().map_err(|_| {
                    SimError::InvalidArgument(format!(
                        "line {}: invalid molecule count '{}'",
                        line_no + 1,
                        field
                    ))
                })?;
                trajectory.counts.push(count);
            }
            let columns = trajectory.counts.len() - before;
            match width {
                None => width = Some(columns),
                Some(expected) if expected != columns => {
                    return Err(SimError::Shape(format!(
                        "line {}: {} count columns, expected {}",
                        line_no + 1,
                        columns,
                        expected
                    )));
                }
                Some(_) => {}
            }
            trajectory.times.push(time);
        }
        trajectory.n_columns = width.unwrap_or(0);
        Ok(trajectory)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn row(&self, index: usize) -> &[u32] {
        &self.counts[index * self.n_columns..(index + 1) * self.n_columns]
    }

    /// Time series of one species in one voxel.
    pub fn column(&self, voxel: usize, species: usize, n_species: usize) -> Vec<u32> {
        let col = voxel * n_species + species;
        (0..self.len()).map(|row| self.row(row)[col]).collect()
    }
}
