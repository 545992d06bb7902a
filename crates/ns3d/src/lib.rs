//! Porous-flow incompressible Navier-Stokes core with two-way DEM coupling.
//!
//! A predictor-corrector projection solver on a 3D Cartesian grid with a
//! one-cell ghost halo, coupled to a spherical-particle field: particles are
//! projected onto the cells as porosity / mean velocity / mean diameter, the
//! momentum predictor and pressure-correction Poisson solve advance the
//! fluid, and an Ergun / Wen-Yu closure returns drag to the particles.
//!
//! The x and y axes are periodic; the z boundaries are configurable
//! (Dirichlet / Neumann / Periodic). All cell kernels are data-parallel over
//! the grid, reading one buffer and writing another.
//!
//! # Example
//!
//! ```
//! use ns3d::{NsConfig, NsCore};
//!
//! let mut core = NsCore::new(NsConfig::default()).unwrap();
//!
//! // A box at rest stays at rest; the pressure solve converges immediately.
//! let report = core.step().unwrap();
//! assert!(report.poisson.converged);
//! assert_eq!(report.max_velocity, 0.0);
//! ```

pub mod config;
pub mod corrector;
pub mod drag;
pub mod error;
pub mod grid;
pub mod particle;
pub mod poisson;
pub mod porosity;
pub mod predictor;
pub mod solver;

pub use config::{NsConfig, PressureSchedule};
pub use error::NsError;
pub use glam::{DVec3, DVec4};
pub use grid::{BoundaryCondition, GhostRules, GridSpec};
pub use particle::{ForceAccumulator, ParticleArrays, EMPTY_CELL};
pub use poisson::PoissonStats;
pub use predictor::SymTensor;
pub use solver::{FieldSnapshot, NsCore, StepReport};
