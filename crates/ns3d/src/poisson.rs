//! Pressure-correction Poisson solve.
//!
//! The correction field `epsilon` satisfies the variable-coefficient
//! equation `lap(epsilon) = f1 - (grad(phi)/phi) . grad(epsilon)`. The
//! constant-per-step parts `f1`, `f2` are assembled once; every Jacobi sweep
//! recomputes only `grad(epsilon)` and forms `f = f1 - f2 . grad(epsilon)`.
//!
//! One solve runs `INIT -> (SWEEP -> REFRESH -> REDUCE -> CONVERGED?)* ->
//! DONE | DIVERGED`. Divergence (a non-finite iterate) is fatal; exhausting
//! the sweep cap is reported as a warning and the step proceeds.

use glam::DVec3;
use log::{trace, warn};
use rayon::prelude::*;

use crate::error::NsError;
use crate::grid::{
    central_divergence, central_gradient, refresh_ghosts, BoundaryCondition, GhostRules, GridSpec,
};

/// Guard added to the denominator of the normalized residual.
const NORM_FLOOR: f64 = 1.0e-16;

/// Outcome of one Poisson solve.
#[derive(Clone, Copy, Debug)]
pub struct PoissonStats {
    /// Sweeps performed.
    pub iterations: usize,
    /// Residual norm after the last sweep.
    pub final_norm: f64,
    /// Whether `final_norm < tol` was reached.
    pub converged: bool,
}

/// Convergence controls for the Jacobi iteration.
#[derive(Clone, Copy, Debug)]
pub struct PoissonParams {
    pub theta: f64,
    pub tol: f64,
    pub max_iter: usize,
    pub rho: f64,
    pub dt: f64,
}

/// Cells updated by the Jacobi sweep. Dirichlet boundary planes carry fixed
/// `epsilon` values and are excluded; the swap copies them through unchanged
/// and their residual contribution is zero.
#[derive(Clone, Copy, Debug)]
pub struct ActiveRegion {
    skip_x: (bool, bool),
    skip_y: (bool, bool),
    skip_z: (bool, bool),
}

impl ActiveRegion {
    pub fn from_rules(rules: &GhostRules) -> Self {
        let d = |bc: BoundaryCondition| bc == BoundaryCondition::Dirichlet;
        Self {
            skip_x: (d(rules.x_min), d(rules.x_max)),
            skip_y: (d(rules.y_min), d(rules.y_max)),
            skip_z: (d(rules.z_min), d(rules.z_max)),
        }
    }

    #[inline]
    pub fn contains(&self, grid: &GridSpec, i: i32, j: i32, k: i32) -> bool {
        !((self.skip_x.0 && i == 0)
            || (self.skip_x.1 && i == grid.nx as i32 - 1)
            || (self.skip_y.0 && j == 0)
            || (self.skip_y.1 && j == grid.ny as i32 - 1)
            || (self.skip_z.0 && k == 0)
            || (self.skip_z.1 && k == grid.nz as i32 - 1))
    }
}

/// Assemble the constant-per-step forcing parts:
///
/// `f1 = rho div(v*)/dt + rho (grad(phi) . v*)/(dt phi) + rho dphi/(dt^2 phi)`
/// `f2 = grad(phi)/phi`
pub fn assemble_constant_forcing(
    grid: &GridSpec,
    rho: f64,
    dt: f64,
    phi: &[f64],
    dphi: &[f64],
    v_p: &[DVec3],
    f1: &mut [f64],
    f2: &mut [DVec3],
) {
    f1.par_iter_mut()
        .zip(f2.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (f1_c, f2_c))| {
            let Some((i, j, k)) = grid.interior_coords(idx) else {
                return;
            };
            let phi_c = phi[idx];
            let grad_phi = central_gradient(grid, phi, i, j, k);
            let div_v = central_divergence(grid, v_p, i, j, k);

            *f1_c = rho * div_v / dt
                + rho * grad_phi.dot(v_p[idx]) / (dt * phi_c)
                + rho * dphi[idx] / (dt * dt * phi_c);
            *f2_c = grad_phi / phi_c;
        });
}

/// Form the full forcing `f = f1 - f2 . grad(epsilon)` for one sweep.
pub fn assemble_forcing(grid: &GridSpec, f1: &[f64], f2: &[DVec3], epsilon: &[f64], f: &mut [f64]) {
    f.par_iter_mut().enumerate().for_each(|(idx, f_c)| {
        let Some((i, j, k)) = grid.interior_coords(idx) else {
            return;
        };
        *f_c = f1[idx] - f2[idx].dot(central_gradient(grid, epsilon, i, j, k));
    });
}

/// One over-relaxed Jacobi sweep over the active cells.
///
/// Writes the new iterate into `epsilon_new` and the per-cell normalized
/// squared residual into `norm`. Excluded cells copy their value through and
/// contribute zero residual; a non-finite iterate records an infinite
/// residual so the reduction surfaces it.
pub fn jacobi_sweep(
    grid: &GridSpec,
    active: &ActiveRegion,
    theta: f64,
    f: &[f64],
    epsilon: &[f64],
    epsilon_new: &mut [f64],
    norm: &mut [f64],
) {
    let dx2 = grid.dx() * grid.dx();
    let dy2 = grid.dy() * grid.dy();
    let dz2 = grid.dz() * grid.dz();
    let denom = 2.0 * (dx2 * dy2 + dx2 * dz2 + dy2 * dz2);

    epsilon_new
        .par_iter_mut()
        .zip(norm.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (e_new, r))| {
            let Some((i, j, k)) = grid.interior_coords(idx) else {
                return;
            };
            let e_c = epsilon[idx];
            if !active.contains(grid, i, j, k) {
                *e_new = e_c;
                *r = 0.0;
                return;
            }

            let sum_x =
                epsilon[grid.cell_index(i - 1, j, k)] + epsilon[grid.cell_index(i + 1, j, k)];
            let sum_y =
                epsilon[grid.cell_index(i, j - 1, k)] + epsilon[grid.cell_index(i, j + 1, k)];
            let sum_z =
                epsilon[grid.cell_index(i, j, k - 1)] + epsilon[grid.cell_index(i, j, k + 1)];

            let jacobi =
                (dy2 * dz2 * sum_x + dx2 * dz2 * sum_y + dx2 * dy2 * sum_z
                    - dx2 * dy2 * dz2 * f[idx])
                    / denom;
            let relaxed = (1.0 - theta) * e_c + theta * jacobi;

            *e_new = relaxed;
            *r = if relaxed.is_finite() {
                let delta = relaxed - e_c;
                delta * delta / (relaxed * relaxed + NORM_FLOOR)
            } else {
                f64::INFINITY
            };
        });
}

/// Reduce the per-cell residuals to the global norm: the maximum over active
/// cells (excluded cells hold zero and drop out).
pub fn reduce_norm(norm: &[f64]) -> f64 {
    norm.par_iter().cloned().reduce(|| 0.0, f64::max)
}

/// Buffers mutated by one Poisson solve.
pub struct PoissonBuffers<'a> {
    pub f1: &'a mut [f64],
    pub f2: &'a mut [DVec3],
    pub f: &'a mut [f64],
    pub epsilon: &'a mut Vec<f64>,
    pub epsilon_new: &'a mut Vec<f64>,
    pub norm: &'a mut [f64],
}

/// Run a full Poisson solve for the pressure correction.
///
/// The caller has already refreshed the `phi` and `v*` ghosts and applied any
/// scheduled boundary pressure to the `epsilon` buffers.
pub fn solve(
    grid: &GridSpec,
    rules: &GhostRules,
    params: &PoissonParams,
    phi: &[f64],
    dphi: &[f64],
    v_p: &[DVec3],
    buffers: PoissonBuffers<'_>,
) -> Result<PoissonStats, NsError> {
    let active = ActiveRegion::from_rules(rules);
    assemble_constant_forcing(
        grid, params.rho, params.dt, phi, dphi, v_p, buffers.f1, buffers.f2,
    );
    refresh_ghosts(grid, rules, buffers.epsilon);

    let mut last_norm = f64::INFINITY;
    for iteration in 1..=params.max_iter {
        assemble_forcing(grid, buffers.f1, buffers.f2, buffers.epsilon, buffers.f);
        jacobi_sweep(
            grid,
            &active,
            params.theta,
            buffers.f,
            buffers.epsilon,
            buffers.epsilon_new,
            buffers.norm,
        );
        std::mem::swap(buffers.epsilon, buffers.epsilon_new);
        refresh_ghosts(grid, rules, buffers.epsilon);

        last_norm = reduce_norm(buffers.norm);
        trace!("poisson sweep {iteration}: norm {last_norm:e}");
        if !last_norm.is_finite() {
            return Err(NsError::Diverged {
                iterations: iteration,
                norm: last_norm,
            });
        }
        if last_norm < params.tol {
            return Ok(PoissonStats {
                iterations: iteration,
                final_norm: last_norm,
                converged: true,
            });
        }
    }

    warn!(
        "pressure solve hit the sweep cap ({}) with norm {:e} (tol {:e})",
        params.max_iter, last_norm, params.tol
    );
    Ok(PoissonStats {
        iterations: params.max_iter,
        final_norm: last_norm,
        converged: false,
    })
}
