//! Predictor stage: momentum advance without the new pressure.
//!
//! Three stencil kernels, each followed by a ghost refresh in the driver:
//! 1. viscous stress tensor from central differences of `v`
//! 2. advective divergence `div(phi v_i v)` and stress divergence
//!    `div(phi tau)` from face-neighbour products
//! 3. the predictor update producing `v*`

use glam::DVec3;
use rayon::prelude::*;

use crate::grid::{central_gradient, BoundaryCondition, GhostRules, GridSpec};

/// Symmetric viscous stress tensor, six independent entries per cell.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SymTensor {
    pub xx: f64,
    pub xy: f64,
    pub xz: f64,
    pub yy: f64,
    pub yz: f64,
    pub zz: f64,
}

impl SymTensor {
    /// Symmetric element retrieval: `get(a, b) == get(b, a)`.
    #[inline]
    pub fn get(&self, a: usize, b: usize) -> f64 {
        match (a.min(b), a.max(b)) {
            (0, 0) => self.xx,
            (0, 1) => self.xy,
            (0, 2) => self.xz,
            (1, 1) => self.yy,
            (1, 2) => self.yz,
            (2, 2) => self.zz,
            _ => panic!("tensor index out of range: ({a}, {b})"),
        }
    }

    /// Row of the tensor as a vector.
    #[inline]
    pub fn row(&self, a: usize) -> DVec3 {
        DVec3::new(self.get(a, 0), self.get(a, 1), self.get(a, 2))
    }
}

/// Compute the viscous stress tensor `tau` from the cell-centered velocity.
///
/// `tau_ii = 2 nu dv_i/dx_i`, `tau_ij = nu (dv_i/dx_j + dv_j/dx_i)`.
pub fn compute_stress_tensor(grid: &GridSpec, nu: f64, v: &[DVec3], tau: &mut [SymTensor]) {
    tau.par_iter_mut().enumerate().for_each(|(idx, t)| {
        let Some((i, j, k)) = grid.interior_coords(idx) else {
            return;
        };
        let two_dx = 2.0 * grid.dx();
        let two_dy = 2.0 * grid.dy();
        let two_dz = 2.0 * grid.dz();

        let xp = v[grid.cell_index(i + 1, j, k)];
        let xm = v[grid.cell_index(i - 1, j, k)];
        let yp = v[grid.cell_index(i, j + 1, k)];
        let ym = v[grid.cell_index(i, j - 1, k)];
        let zp = v[grid.cell_index(i, j, k + 1)];
        let zm = v[grid.cell_index(i, j, k - 1)];

        let dvx = DVec3::new(
            (xp.x - xm.x) / two_dx,
            (yp.x - ym.x) / two_dy,
            (zp.x - zm.x) / two_dz,
        );
        let dvy = DVec3::new(
            (xp.y - xm.y) / two_dx,
            (yp.y - ym.y) / two_dy,
            (zp.y - zm.y) / two_dz,
        );
        let dvz = DVec3::new(
            (xp.z - xm.z) / two_dx,
            (yp.z - ym.z) / two_dy,
            (zp.z - zm.z) / two_dz,
        );

        *t = SymTensor {
            xx: 2.0 * nu * dvx.x,
            xy: nu * (dvx.y + dvy.x),
            xz: nu * (dvx.z + dvz.x),
            yy: 2.0 * nu * dvy.y,
            yz: nu * (dvy.z + dvz.y),
            zz: 2.0 * nu * dvz.z,
        };
    });
}

/// Assemble the advective divergence `div(phi v_i v)` and the stress
/// divergence `div(phi tau)` with second-order central differences of the
/// six face-neighbour products.
pub fn compute_divergences(
    grid: &GridSpec,
    phi: &[f64],
    v: &[DVec3],
    tau: &[SymTensor],
    div_phi_vi_v: &mut [DVec3],
    div_phi_tau: &mut [DVec3],
) {
    div_phi_vi_v
        .par_iter_mut()
        .zip(div_phi_tau.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (adv, visc))| {
            let Some((i, j, k)) = grid.interior_coords(idx) else {
                return;
            };
            let two_d = DVec3::new(2.0 * grid.dx(), 2.0 * grid.dy(), 2.0 * grid.dz());

            let neighbors = [
                (grid.cell_index(i - 1, j, k), grid.cell_index(i + 1, j, k)),
                (grid.cell_index(i, j - 1, k), grid.cell_index(i, j + 1, k)),
                (grid.cell_index(i, j, k - 1), grid.cell_index(i, j, k + 1)),
            ];

            let mut adv_sum = DVec3::ZERO;
            let mut visc_sum = DVec3::ZERO;
            for (axis, &(m, p)) in neighbors.iter().enumerate() {
                let axis_component = |vec: DVec3| match axis {
                    0 => vec.x,
                    1 => vec.y,
                    _ => vec.z,
                };
                // (phi v_i v_j) at the minus and plus neighbours along axis j.
                let adv_m = phi[m] * v[m] * axis_component(v[m]);
                let adv_p = phi[p] * v[p] * axis_component(v[p]);
                adv_sum += (adv_p - adv_m) / axis_component(two_d);

                // (phi tau_ij) along the same axis.
                let visc_m = phi[m]
                    * DVec3::new(tau[m].get(0, axis), tau[m].get(1, axis), tau[m].get(2, axis));
                let visc_p = phi[p]
                    * DVec3::new(tau[p].get(0, axis), tau[p].get(1, axis), tau[p].get(2, axis));
                visc_sum += (visc_p - visc_m) / axis_component(two_d);
            }
            *adv = adv_sum;
            *visc = visc_sum;
        });
}

/// Parameters consumed by the predictor update.
pub struct PredictorParams {
    pub dt: f64,
    pub rho: f64,
    pub beta: f64,
    pub gravity: Option<DVec3>,
}

/// Predictor update producing `v*`:
///
/// `v* = v - (beta/rho) grad(p) dt/phi + div(phi tau) dt/(rho phi)
///       - dt f_i - v dphi/phi - div(phi v v) dt/phi [+ g dt]`
///
/// On a Neumann z boundary the predicted z velocity is pinned to the prior
/// value (no flux through the boundary).
#[allow(clippy::too_many_arguments)]
pub fn predict_velocity(
    grid: &GridSpec,
    rules: &GhostRules,
    params: &PredictorParams,
    p: &[f64],
    v: &[DVec3],
    phi: &[f64],
    dphi: &[f64],
    fi: &[DVec3],
    div_phi_vi_v: &[DVec3],
    div_phi_tau: &[DVec3],
    v_p: &mut [DVec3],
) {
    let pin_bot = rules.z_min == BoundaryCondition::Neumann;
    let pin_top = rules.z_max == BoundaryCondition::Neumann;
    let nz = grid.nz as i32;

    v_p.par_iter_mut().enumerate().for_each(|(idx, v_star)| {
        let Some((i, j, k)) = grid.interior_coords(idx) else {
            return;
        };
        let phi_c = phi[idx];
        let v_c = v[idx];
        let grad_p = central_gradient(grid, p, i, j, k);

        let mut out = v_c
            - grad_p * (params.beta / params.rho) * params.dt / phi_c
            + div_phi_tau[idx] * params.dt / (params.rho * phi_c)
            - fi[idx] * params.dt
            - v_c * (dphi[idx] / phi_c)
            - div_phi_vi_v[idx] * params.dt / phi_c;
        if let Some(g) = params.gravity {
            out += g * params.dt;
        }

        if (pin_bot && k == 0) || (pin_top && k == nz - 1) {
            out.z = v_c.z;
        }
        *v_star = out;
    });
}
