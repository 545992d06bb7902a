//! Host driver: owns every field buffer plus the validated configuration and
//! issues the per-step kernel sequence.
//!
//! One fluid step:
//! 1. Project particles onto the cells (porosity, mean velocity, diameter)
//! 2. Interaction force density per cell
//! 3. Predictor: stress tensor -> divergences -> `v*`
//! 4. Scheduled top pressure, then the pressure-correction Poisson solve
//! 5. Corrector: fold `epsilon` into `p` and `v`, unstagger to faces
//! 6. Scatter the reciprocal drag onto the particles
//!
//! Ghost layers are refreshed between every stage whose successor reads a
//! stencil. All buffers are allocated once at construction; no stage keeps
//! state of its own.

use glam::DVec3;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::NsConfig;
use crate::corrector;
use crate::drag;
use crate::error::NsError;
use crate::grid::{refresh_ghosts, set_z_plane, GhostRules, GridSpec};
use crate::particle::{ForceAccumulator, ParticleArrays};
use crate::poisson::{self, PoissonBuffers, PoissonParams, PoissonStats};
use crate::porosity;
use crate::predictor::{self, PredictorParams, SymTensor};

/// Per-step summary returned to the caller.
#[derive(Clone, Copy, Debug)]
pub struct StepReport {
    /// Index of the step just completed (0-based).
    pub step: u64,
    /// Simulation time after the step.
    pub time: f64,
    /// Poisson solve outcome.
    pub poisson: PoissonStats,
    /// Maximum velocity magnitude after the corrector.
    pub max_velocity: f64,
}

/// Serializable copy of the host-inspectable fields, interior cells only,
/// in x-fastest order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub step: u64,
    pub time: f64,
    pub p: Vec<f64>,
    pub v: Vec<[f64; 3]>,
    pub v_p: Vec<[f64; 3]>,
    pub phi: Vec<f64>,
    pub dphi: Vec<f64>,
    pub norm: Vec<f64>,
    pub epsilon: Vec<f64>,
}

/// The porous-flow solver core. Value-owns all field storage.
pub struct NsCore {
    config: NsConfig,
    grid: GridSpec,
    rules: GhostRules,

    // Cell-centered fields, ghost-padded.
    pub p: Vec<f64>,
    pub v: Vec<DVec3>,
    pub v_p: Vec<DVec3>,
    pub phi: Vec<f64>,
    phi_prev: Vec<f64>,
    pub dphi: Vec<f64>,
    pub vp_avg: Vec<DVec3>,
    pub d_avg: Vec<f64>,
    pub fi: Vec<DVec3>,
    pub tau: Vec<SymTensor>,
    div_phi_vi_v: Vec<DVec3>,
    div_phi_tau: Vec<DVec3>,
    pub epsilon: Vec<f64>,
    epsilon_new: Vec<f64>,
    f1: Vec<f64>,
    f2: Vec<DVec3>,
    f: Vec<f64>,
    pub norm: Vec<f64>,

    // Staggered face fluxes.
    pub v_x: Vec<f64>,
    pub v_y: Vec<f64>,
    pub v_z: Vec<f64>,

    step_count: u64,
    time: f64,
}

impl NsCore {
    /// Validate the configuration and allocate all field storage.
    pub fn new(config: NsConfig) -> Result<Self, NsError> {
        config.validate()?;
        let grid = config.grid;
        let rules = GhostRules::from_z_conditions(config.bc_bot, config.bc_top);
        let n = grid.padded_count();
        let n_faces = grid.face_count();

        Ok(Self {
            config,
            grid,
            rules,
            p: vec![0.0; n],
            v: vec![DVec3::ZERO; n],
            v_p: vec![DVec3::ZERO; n],
            phi: vec![1.0; n],
            phi_prev: vec![1.0; n],
            dphi: vec![0.0; n],
            vp_avg: vec![DVec3::ZERO; n],
            d_avg: vec![0.0; n],
            fi: vec![DVec3::ZERO; n],
            tau: vec![SymTensor::default(); n],
            div_phi_vi_v: vec![DVec3::ZERO; n],
            div_phi_tau: vec![DVec3::ZERO; n],
            epsilon: vec![0.0; n],
            epsilon_new: vec![0.0; n],
            f1: vec![0.0; n],
            f2: vec![DVec3::ZERO; n],
            f: vec![0.0; n],
            norm: vec![0.0; n],
            v_x: vec![0.0; n_faces],
            v_y: vec![0.0; n_faces],
            v_z: vec![0.0; n_faces],
            step_count: 0,
            time: 0.0,
        })
    }

    /// Grid geometry.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Active configuration.
    pub fn config(&self) -> &NsConfig {
        &self.config
    }

    /// Ghost rule table in force.
    pub fn rules(&self) -> &GhostRules {
        &self.rules
    }

    /// Simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Completed steps.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Advance one step without a particle phase: porosity is unity
    /// everywhere and the interaction model is inactive.
    pub fn step(&mut self) -> Result<StepReport, NsError> {
        self.advance(None)
    }

    /// Advance one step coupled to the particle field. Drag contributions
    /// are added atomically into `forces`, indexed by original particle
    /// slot.
    pub fn step_coupled(
        &mut self,
        particles: &ParticleArrays<'_>,
        forces: &ForceAccumulator,
    ) -> Result<StepReport, NsError> {
        self.advance(Some((particles, forces)))
    }

    fn advance(
        &mut self,
        coupling: Option<(&ParticleArrays<'_>, &ForceAccumulator)>,
    ) -> Result<StepReport, NsError> {
        let grid = self.grid;
        let rules = self.rules;
        let cfg = &self.config;

        // Porosity / particle-average projection.
        if let Some((particles, _)) = coupling {
            particles.validate(&grid)?;
            std::mem::swap(&mut self.phi, &mut self.phi_prev);
            porosity::project_particles(
                &grid,
                &rules,
                particles,
                &self.v,
                &self.phi_prev,
                self.step_count == 0,
                &mut self.phi,
                &mut self.dphi,
                &mut self.vp_avg,
                &mut self.d_avg,
            );
        } else {
            porosity::fill_fluid_only(
                &grid,
                &self.v,
                &mut self.phi,
                &mut self.dphi,
                &mut self.vp_avg,
                &mut self.d_avg,
            );
        }
        refresh_ghosts(&grid, &rules, &mut self.phi);
        refresh_ghosts(&grid, &rules, &mut self.dphi);

        // Interaction force density on the fluid.
        drag::compute_interaction_force(
            &grid,
            cfg.rho,
            cfg.nu,
            &self.phi,
            &self.d_avg,
            &self.v,
            &mut self.vp_avg,
            &mut self.fi,
        );

        // Predictor chain.
        predictor::compute_stress_tensor(&grid, cfg.nu, &self.v, &mut self.tau);
        refresh_ghosts(&grid, &rules, &mut self.tau);
        predictor::compute_divergences(
            &grid,
            &self.phi,
            &self.v,
            &self.tau,
            &mut self.div_phi_vi_v,
            &mut self.div_phi_tau,
        );
        let params = PredictorParams {
            dt: cfg.dt,
            rho: cfg.rho,
            beta: cfg.beta,
            gravity: cfg.gravity_enabled.then_some(cfg.gravity),
        };
        predictor::predict_velocity(
            &grid,
            &rules,
            &params,
            &self.p,
            &self.v,
            &self.phi,
            &self.dphi,
            &self.fi,
            &self.div_phi_vi_v,
            &self.div_phi_tau,
            &mut self.v_p,
        );
        refresh_ghosts(&grid, &rules, &mut self.v_p);

        // Scheduled top-boundary pressure.
        if let Some(schedule) = cfg.p_top {
            let value = schedule.value_at(self.time);
            let top = grid.nz as i32 - 1;
            set_z_plane(&grid, &mut self.p, top, value);
            set_z_plane(&grid, &mut self.epsilon, top, value);
            set_z_plane(&grid, &mut self.epsilon_new, top, value);
        }

        // Pressure-correction Poisson solve.
        let poisson_params = PoissonParams {
            theta: cfg.theta,
            tol: cfg.tol,
            max_iter: cfg.max_iter,
            rho: cfg.rho,
            dt: cfg.dt,
        };
        let stats = poisson::solve(
            &grid,
            &rules,
            &poisson_params,
            &self.phi,
            &self.dphi,
            &self.v_p,
            PoissonBuffers {
                f1: &mut self.f1,
                f2: &mut self.f2,
                f: &mut self.f,
                epsilon: &mut self.epsilon,
                epsilon_new: &mut self.epsilon_new,
                norm: &mut self.norm,
            },
        )?;

        // Corrector and face fluxes.
        corrector::apply_correction(
            &grid,
            &rules,
            cfg.dt,
            cfg.rho,
            cfg.beta,
            &self.epsilon,
            &self.v_p,
            &mut self.p,
            &mut self.v,
        );
        refresh_ghosts(&grid, &rules, &mut self.p);
        refresh_ghosts(&grid, &rules, &mut self.v);
        corrector::unstagger_to_faces(&grid, &self.v, &mut self.v_x, &mut self.v_y, &mut self.v_z);

        // Reciprocal drag onto the particles.
        if let Some((particles, forces)) = coupling {
            if cfg.nu > 0.0 {
                drag::scatter_to_particles(&grid, particles, &self.phi, &self.fi, forces);
            }
        }

        self.check_finite()?;

        let max_velocity = self
            .v
            .par_iter()
            .map(|u| u.length())
            .reduce(|| 0.0, f64::max);

        let report = StepReport {
            step: self.step_count,
            time: self.time + cfg.dt,
            poisson: stats,
            max_velocity,
        };
        self.step_count += 1;
        self.time += cfg.dt;
        debug!(
            "step {}: poisson {} sweeps (norm {:e}, converged {}), max |v| {:e}",
            report.step,
            stats.iterations,
            stats.final_norm,
            stats.converged,
            max_velocity
        );
        Ok(report)
    }

    fn check_finite(&self) -> Result<(), NsError> {
        let velocities_ok = self.v.par_iter().all(|u| u.is_finite());
        if !velocities_ok {
            return Err(NsError::NonFinite { stage: "velocity" });
        }
        let pressure_ok = self.p.par_iter().all(|x| x.is_finite());
        if !pressure_ok {
            return Err(NsError::NonFinite { stage: "pressure" });
        }
        Ok(())
    }

    /// Cell-transit time-step limit for the current velocity field.
    pub fn max_dt(&self) -> f64 {
        let max_velocity = self
            .v
            .par_iter()
            .map(|u| u.length())
            .reduce(|| 0.0, f64::max);
        if max_velocity > 0.0 {
            self.grid.min_spacing() / max_velocity
        } else {
            f64::INFINITY
        }
    }

    /// Copy of the host-inspectable fields for checkpointing.
    pub fn snapshot(&self) -> FieldSnapshot {
        let scalar = |field: &[f64]| self.collect_interior(field, |x| *x);
        let vector = |field: &[DVec3]| self.collect_interior(field, |u| [u.x, u.y, u.z]);
        FieldSnapshot {
            step: self.step_count,
            time: self.time,
            p: scalar(&self.p),
            v: vector(&self.v),
            v_p: vector(&self.v_p),
            phi: scalar(&self.phi),
            dphi: scalar(&self.dphi),
            norm: scalar(&self.norm),
            epsilon: scalar(&self.epsilon),
        }
    }

    fn collect_interior<T, U>(&self, field: &[T], map: impl Fn(&T) -> U) -> Vec<U> {
        let grid = &self.grid;
        let mut out = Vec::with_capacity(grid.cell_count());
        for k in 0..grid.nz as i32 {
            for j in 0..grid.ny as i32 {
                for i in 0..grid.nx as i32 {
                    out.push(map(&field[grid.cell_index(i, j, k)]));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BoundaryCondition;

    #[test]
    fn test_core_creation() {
        let core = NsCore::new(NsConfig::default()).unwrap();
        assert_eq!(core.p.len(), core.grid().padded_count());
        assert_eq!(core.v_x.len(), core.grid().face_count());
        assert_eq!(core.step_count(), 0);
        assert_eq!(core.time(), 0.0);
        // Initial porosity is fluid-only.
        assert!(core.phi.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut cfg = NsConfig::default();
        cfg.theta = 2.0;
        assert!(matches!(NsCore::new(cfg), Err(NsError::Config(_))));
    }

    #[test]
    fn test_fluid_only_step_at_rest() {
        let mut cfg = NsConfig::default();
        cfg.grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let mut core = NsCore::new(cfg).unwrap();
        let report = core.step().unwrap();

        assert!(report.poisson.converged);
        assert_eq!(report.poisson.iterations, 1);
        assert_eq!(report.max_velocity, 0.0);
        assert_eq!(core.step_count(), 1);
        assert!((core.time() - 1.0e-3).abs() < 1e-15);
    }

    #[test]
    fn test_mismatched_particle_grid_is_fatal() {
        let mut cfg = NsConfig::default();
        cfg.grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let mut core = NsCore::new(cfg).unwrap();
        let forces = ForceAccumulator::new(0);
        let arrays = ParticleArrays {
            x_sorted: &[],
            vel_sorted: &[],
            cell_start: &[],
            cell_end: &[],
            grid_particle_index: &[],
        };
        assert!(matches!(
            core.step_coupled(&arrays, &forces),
            Err(NsError::ParticleGridMismatch(_))
        ));
    }

    #[test]
    fn test_snapshot_covers_interior() {
        let mut cfg = NsConfig::default();
        cfg.grid = GridSpec::new(3, 4, 5, 1.0, 1.0, 1.0);
        let core = NsCore::new(cfg).unwrap();
        let snap = core.snapshot();
        assert_eq!(snap.p.len(), 60);
        assert_eq!(snap.v.len(), 60);
        assert_eq!(snap.phi.len(), 60);
    }

    #[test]
    fn test_max_dt_at_rest_is_unbounded() {
        let core = NsCore::new(NsConfig::default()).unwrap();
        assert_eq!(core.max_dt(), f64::INFINITY);
    }

    #[test]
    fn test_scheduled_top_pressure_is_applied() {
        let mut cfg = NsConfig::default();
        cfg.grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        cfg.p_top = Some(crate::config::PressureSchedule::constant(2.5));
        cfg.bc_top = BoundaryCondition::Dirichlet;
        cfg.bc_bot = BoundaryCondition::Dirichlet;
        cfg.max_iter = 20_000;
        let mut core = NsCore::new(cfg).unwrap();
        core.step().unwrap();

        // The top interior plane carries the scheduled pressure.
        let grid = *core.grid();
        for j in 0..4 {
            for i in 0..4 {
                assert!((core.p[grid.cell_index(i, j, 3)] - 2.5).abs() < 1e-12);
            }
        }
    }
}
