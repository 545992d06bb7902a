//! Fluid-particle interaction force: Ergun (dense) / Wen-Yu (dilute)
//! closure per cell, and the reciprocal drag scattered back onto the
//! particles.
//!
//! The closure is selected by void fraction: Ergun below phi = 0.8, Wen-Yu
//! up to the dilute limit, zero force above it. The whole model is skipped
//! when the kinematic viscosity is zero.

use glam::DVec3;
use rayon::prelude::*;

use crate::grid::GridSpec;
use crate::particle::{ForceAccumulator, ParticleArrays};

/// Cells with porosity at or above this are treated as empty of particles.
pub const DILUTE_LIMIT: f64 = 0.999;

/// Porosity threshold between the Ergun and Wen-Yu regimes.
pub const ERGUN_LIMIT: f64 = 0.8;

const FOUR_THIRDS_PI: f64 = 4.0 / 3.0 * std::f64::consts::PI;

/// Single-sphere drag coefficient as a function of Reynolds number.
#[inline]
pub fn drag_coefficient(re: f64) -> f64 {
    if re >= 1000.0 {
        0.44
    } else {
        24.0 / re * (1.0 + 0.15 * re.powf(0.687))
    }
}

/// Interaction force density on the fluid for one cell.
///
/// Returns zero for essentially-empty cells, degenerate inputs and inviscid
/// runs; otherwise applies the regime closure selected by `phi`.
pub fn interaction_force_density(phi: f64, d_avg: f64, v_rel: DVec3, rho: f64, nu: f64) -> DVec3 {
    let mag = v_rel.length();
    if nu == 0.0 || phi >= DILUTE_LIMIT || d_avg <= 0.0 || mag == 0.0 {
        return DVec3::ZERO;
    }
    let mu = rho * nu;
    if phi <= ERGUN_LIMIT {
        // Ergun (1952), dense packing.
        let coeff = 150.0 * mu * (1.0 - phi) * (1.0 - phi) / (phi * d_avg * d_avg)
            + 1.75 * (1.0 - phi) * rho * mag / d_avg;
        coeff * v_rel
    } else {
        // Wen & Yu (1966), dilute suspension.
        let re = phi * rho * d_avg * mag / mu;
        let cd = drag_coefficient(re);
        0.75 * cd * (1.0 - phi) * phi.powf(-2.65) * mu * rho * mag / d_avg * v_rel
    }
}

/// Evaluate the interaction force density on every interior cell.
///
/// Cells at or above the dilute limit get zero force and have `vp_avg`
/// pinned to the fluid velocity so later stages see no spurious relative
/// motion.
pub fn compute_interaction_force(
    grid: &GridSpec,
    rho: f64,
    nu: f64,
    phi: &[f64],
    d_avg: &[f64],
    v: &[DVec3],
    vp_avg: &mut [DVec3],
    fi: &mut [DVec3],
) {
    fi.par_iter_mut()
        .zip(vp_avg.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (fi_c, vp_c))| {
            if grid.interior_coords(idx).is_none() {
                return;
            }
            if nu == 0.0 {
                *fi_c = DVec3::ZERO;
                return;
            }
            if phi[idx] >= DILUTE_LIMIT {
                *fi_c = DVec3::ZERO;
                *vp_c = v[idx];
                return;
            }
            *fi_c = interaction_force_density(phi[idx], d_avg[idx], v[idx] - *vp_c, rho, nu);
        });
}

/// Scatter the reciprocal drag onto the particles.
///
/// Each particle in a cell receives `f_i / (1 - phi) * (4/3 pi r^3)`, added
/// atomically to its original force slot (many cells may hit the same slot).
pub fn scatter_to_particles(
    grid: &GridSpec,
    particles: &ParticleArrays<'_>,
    phi: &[f64],
    fi: &[DVec3],
    forces: &ForceAccumulator,
) {
    let (nx, ny) = (grid.nx, grid.ny);
    (0..grid.cell_count()).into_par_iter().for_each(|hash| {
        let x = hash % nx;
        let y = (hash / nx) % ny;
        let z = hash / (nx * ny);
        let idx = grid.cell_index(x as i32, y as i32, z as i32);

        let phi_c = phi[idx];
        if phi_c >= DILUTE_LIMIT {
            return;
        }
        let Some(range) = particles.cell_range(hash) else {
            return;
        };
        let per_volume = fi[idx] / (1.0 - phi_c);
        for p in range {
            let r = particles.x_sorted[p].w;
            let original = particles.grid_particle_index[p] as usize;
            forces.add(original, per_volume * (FOUR_THIRDS_PI * r.powi(3)));
        }
    });
}
