//! Corrector stage: fold the pressure correction into `p` and `v`, then
//! unstagger the cell-centered velocity onto the face arrays.

use glam::DVec3;
use rayon::prelude::*;

use crate::grid::{central_gradient, BoundaryCondition, GhostRules, GridSpec};

/// Apply the converged correction:
///
/// `p <- beta p + epsilon` and `v <- v* - (dt/rho) grad(epsilon)`.
///
/// On a Neumann z boundary the z component keeps the predicted value, which
/// the predictor pinned to the pre-step velocity (no flux).
#[allow(clippy::too_many_arguments)]
pub fn apply_correction(
    grid: &GridSpec,
    rules: &GhostRules,
    dt: f64,
    rho: f64,
    beta: f64,
    epsilon: &[f64],
    v_p: &[DVec3],
    p: &mut [f64],
    v: &mut [DVec3],
) {
    let pin_bot = rules.z_min == BoundaryCondition::Neumann;
    let pin_top = rules.z_max == BoundaryCondition::Neumann;
    let nz = grid.nz as i32;

    p.par_iter_mut()
        .zip(v.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (p_c, v_c))| {
            let Some((i, j, k)) = grid.interior_coords(idx) else {
                return;
            };
            *p_c = beta * *p_c + epsilon[idx];

            let grad_eps = central_gradient(grid, epsilon, i, j, k);
            let mut corrected = v_p[idx] - grad_eps * (dt / rho);
            if (pin_bot && k == 0) || (pin_top && k == nz - 1) {
                corrected.z = v_p[idx].z;
            }
            *v_c = corrected;
        });
}

/// Unstagger the cell-centered velocity to the face arrays by arithmetic
/// means of the two adjacent cells (ghost-inclusive at the domain faces).
///
/// Each component covers its own extended axis: `v_x` is written for
/// `i in 0..=nx`, `v_y` for `j in 0..=ny`, `v_z` for `k in 0..=nz`; slots
/// beyond the other axes' interior extents are left untouched.
pub fn unstagger_to_faces(
    grid: &GridSpec,
    v: &[DVec3],
    v_x: &mut [f64],
    v_y: &mut [f64],
    v_z: &mut [f64],
) {
    let (nx, ny, nz) = (grid.nx, grid.ny, grid.nz);
    let face_coords = move |idx: usize| {
        let i = idx % (nx + 1);
        let j = (idx / (nx + 1)) % (ny + 1);
        let k = idx / ((nx + 1) * (ny + 1));
        (i as i32, j as i32, k as i32)
    };

    v_x.par_iter_mut().enumerate().for_each(|(idx, fx)| {
        let (i, j, k) = face_coords(idx);
        if j < ny as i32 && k < nz as i32 {
            *fx = 0.5 * (v[grid.cell_index(i - 1, j, k)].x + v[grid.cell_index(i, j, k)].x);
        }
    });
    v_y.par_iter_mut().enumerate().for_each(|(idx, fy)| {
        let (i, j, k) = face_coords(idx);
        if i < nx as i32 && k < nz as i32 {
            *fy = 0.5 * (v[grid.cell_index(i, j - 1, k)].y + v[grid.cell_index(i, j, k)].y);
        }
    });
    v_z.par_iter_mut().enumerate().for_each(|(idx, fz)| {
        let (i, j, k) = face_coords(idx);
        if i < nx as i32 && j < ny as i32 {
            *fz = 0.5 * (v[grid.cell_index(i, j, k - 1)].z + v[grid.cell_index(i, j, k)].z);
        }
    });
}
