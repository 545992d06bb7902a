//! Solver error taxonomy.
//!
//! Configuration and particle-grid mismatches are fatal at start-up; a
//! non-finite value in any field aborts the current step. Reaching the
//! Poisson iteration cap without converging is NOT an error: it is logged as
//! a warning and reported through the step statistics.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NsError {
    /// Invalid configuration (grid size, boundary tag, theta/beta range, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The sorted particle arrays do not match the fluid grid.
    #[error("particle grid inconsistent with fluid grid: {0}")]
    ParticleGridMismatch(String),

    /// A non-finite value appeared in a field; the step is aborted.
    #[error("non-finite value encountered in {stage}")]
    NonFinite { stage: &'static str },

    /// The pressure-correction solve produced a non-finite iterate.
    #[error("pressure solve diverged after {iterations} sweeps (norm {norm:e})")]
    Diverged { iterations: usize, norm: f64 },
}
