//! Solver configuration and validation.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::NsError;
use crate::grid::{BoundaryCondition, GridSpec};

/// Externally scheduled upper-boundary pressure.
///
/// Evaluates `base + amplitude * sin(2 pi * frequency * t + phase)` at
/// simulation time `t`. A plain constant uses [`PressureSchedule::constant`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PressureSchedule {
    /// Baseline pressure (Pa)
    pub base: f64,
    /// Modulation amplitude (Pa)
    pub amplitude: f64,
    /// Modulation frequency (Hz)
    pub frequency: f64,
    /// Modulation phase (rad)
    pub phase: f64,
}

impl PressureSchedule {
    /// A constant (unmodulated) top pressure.
    pub fn constant(base: f64) -> Self {
        Self {
            base,
            amplitude: 0.0,
            frequency: 0.0,
            phase: 0.0,
        }
    }

    /// Pressure at simulation time `t`.
    #[inline]
    pub fn value_at(&self, t: f64) -> f64 {
        if self.amplitude == 0.0 {
            self.base
        } else {
            self.base
                + self.amplitude
                    * (2.0 * std::f64::consts::PI * self.frequency * t + self.phase).sin()
        }
    }
}

/// Fluid solver parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NsConfig {
    /// Grid geometry.
    pub grid: GridSpec,
    /// Fluid density (kg/m^3).
    pub rho: f64,
    /// Kinematic viscosity (m^2/s). Zero disables the viscous and
    /// interaction-force terms.
    pub nu: f64,
    /// Gravity vector (m/s^2). Only applied when `gravity_enabled` is set.
    pub gravity: DVec3,
    /// Enable the gravity term in the predictor.
    pub gravity_enabled: bool,
    /// Projection variant: 0 = Chorin, (0, 1] = incremental.
    pub beta: f64,
    /// Jacobi over-relaxation factor, in (0, 1].
    pub theta: f64,
    /// Poisson convergence tolerance on the normalized residual.
    pub tol: f64,
    /// Poisson sweep cap.
    pub max_iter: usize,
    /// Bottom z-boundary regime.
    pub bc_bot: BoundaryCondition,
    /// Top z-boundary regime.
    pub bc_top: BoundaryCondition,
    /// Scheduled upper-boundary pressure; when set, the top interior plane of
    /// `p`, `epsilon` and `epsilon_new` is overwritten each step.
    pub p_top: Option<PressureSchedule>,
    /// Time-step length (s).
    pub dt: f64,
}

impl Default for NsConfig {
    fn default() -> Self {
        Self {
            grid: GridSpec::new(16, 16, 16, 1.0, 1.0, 1.0),
            rho: 1000.0,
            nu: 1.0e-6,
            gravity: DVec3::new(0.0, 0.0, -9.81),
            gravity_enabled: false,
            beta: 0.0,
            theta: 1.0,
            tol: 1.0e-9,
            max_iter: 10_000,
            bc_bot: BoundaryCondition::Dirichlet,
            bc_top: BoundaryCondition::Dirichlet,
            p_top: None,
            dt: 1.0e-3,
        }
    }
}

impl NsConfig {
    /// Validate all start-up invariants. Called by `NsCore::new`; every
    /// violation here is fatal.
    pub fn validate(&self) -> Result<(), NsError> {
        let g = &self.grid;
        if g.nx == 0 || g.ny == 0 || g.nz == 0 {
            return Err(NsError::Config(format!(
                "grid size must be positive, got {}x{}x{}",
                g.nx, g.ny, g.nz
            )));
        }
        if !(g.lx > 0.0 && g.ly > 0.0 && g.lz > 0.0) {
            return Err(NsError::Config(format!(
                "box extents must be positive, got {} x {} x {}",
                g.lx, g.ly, g.lz
            )));
        }
        if !(self.rho > 0.0) {
            return Err(NsError::Config(format!("rho must be positive, got {}", self.rho)));
        }
        if !(self.nu >= 0.0) {
            return Err(NsError::Config(format!(
                "nu must be non-negative, got {}",
                self.nu
            )));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(NsError::Config(format!(
                "beta must lie in [0, 1], got {}",
                self.beta
            )));
        }
        if !(self.theta > 0.0 && self.theta <= 1.0) {
            return Err(NsError::Config(format!(
                "theta must lie in (0, 1], got {}",
                self.theta
            )));
        }
        if !(self.tol > 0.0) {
            return Err(NsError::Config(format!("tol must be positive, got {}", self.tol)));
        }
        if self.max_iter == 0 {
            return Err(NsError::Config("max_iter must be positive".into()));
        }
        if !(self.dt > 0.0) {
            return Err(NsError::Config(format!("dt must be positive, got {}", self.dt)));
        }
        // Mixed periodic/non-periodic z is ill-posed: a periodic ghost on one
        // face reads the opposite side, which must then also wrap.
        let zp = (self.bc_bot == BoundaryCondition::Periodic)
            as u8
            + (self.bc_top == BoundaryCondition::Periodic) as u8;
        if zp == 1 {
            return Err(NsError::Config(
                "z boundaries must be both periodic or both non-periodic".into(),
            ));
        }
        Ok(())
    }
}
