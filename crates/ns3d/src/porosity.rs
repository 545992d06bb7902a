//! Cell-wise porosity / particle-velocity / particle-diameter projector.
//!
//! Each fluid cell is probed as the sphere inscribed in the cell box,
//! radius `R = min(dx, dy, dz) / 2`. Particles overlapping that sphere
//! subtract their intersection volume from the running void volume; the
//! porosity is the remaining void fraction, clamped to [0, 1]. Contributing
//! particles also feed the cell's mean particle velocity and diameter.
//!
//! The sweep visits the 27 neighboring particle-hash cells with a
//! minimum-image correction on periodic axes.

use glam::DVec3;
use rayon::prelude::*;

use crate::grid::{GhostRules, GridSpec};
use crate::particle::ParticleArrays;

const FOUR_THIRDS_PI: f64 = 4.0 / 3.0 * std::f64::consts::PI;

/// Closed-form volume of the lens formed by two overlapping spheres of radii
/// `big_r` and `r` whose centers are `d` apart, valid for
/// `|big_r - r| < d < big_r + r`.
#[inline]
pub fn lens_volume(big_r: f64, r: f64, d: f64) -> f64 {
    std::f64::consts::PI
        * (big_r + r - d).powi(2)
        * (d * d + 2.0 * d * r - 3.0 * r * r + 2.0 * d * big_r + 6.0 * r * big_r
            - 3.0 * big_r * big_r)
        / (12.0 * d)
}

/// Project the particle field onto the fluid cells.
///
/// Writes `phi`, `dphi`, `vp_avg` and `d_avg` on every interior cell. Cells
/// without particle contributions are fluid-only: `phi = 1`, `vp_avg` takes
/// the cell fluid velocity and `d_avg` is zero. `dphi` is forced to zero on
/// the very first projector pass.
#[allow(clippy::too_many_arguments)]
pub fn project_particles(
    grid: &GridSpec,
    rules: &GhostRules,
    particles: &ParticleArrays<'_>,
    v: &[DVec3],
    phi_prev: &[f64],
    first_pass: bool,
    phi: &mut [f64],
    dphi: &mut [f64],
    vp_avg: &mut [DVec3],
    d_avg: &mut [f64],
) {
    let big_r = 0.5 * grid.min_spacing();
    let sphere_volume = FOUR_THIRDS_PI * big_r.powi(3);
    let periodic_z = rules.periodic_z();
    let (nx, ny, nz) = (grid.nx as i32, grid.ny as i32, grid.nz as i32);

    phi.par_iter_mut()
        .zip(dphi.par_iter_mut())
        .zip(vp_avg.par_iter_mut())
        .zip(d_avg.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (((phi_c, dphi_c), vp_c), da_c))| {
            let Some((x, y, z)) = grid.interior_coords(idx) else {
                return;
            };
            let center = grid.cell_center(x, y, z);

            let mut void = sphere_volume;
            let mut n = 0u32;
            let mut vel_sum = DVec3::ZERO;
            let mut diam_sum = 0.0;

            // 27-cell neighborhood in the particle hash, x/y wrapping.
            for dz in -1..=1 {
                let mut zn = z + dz;
                if periodic_z {
                    zn = zn.rem_euclid(nz);
                } else if zn < 0 || zn >= nz {
                    continue;
                }
                for dy in -1..=1 {
                    let yn = (y + dy).rem_euclid(ny);
                    for dx in -1..=1 {
                        let xn = (x + dx).rem_euclid(nx);
                        let hash = grid.hash_index(xn as usize, yn as usize, zn as usize);
                        let Some(range) = particles.cell_range(hash) else {
                            continue;
                        };
                        for p in range {
                            let xp = particles.x_sorted[p];
                            let r = xp.w;
                            let mut delta = xp.truncate() - center;
                            // Minimum-image distance on periodic axes.
                            delta.x -= grid.lx * (delta.x / grid.lx).round();
                            delta.y -= grid.ly * (delta.y / grid.ly).round();
                            if periodic_z {
                                delta.z -= grid.lz * (delta.z / grid.lz).round();
                            }
                            let d = delta.length();

                            if d <= big_r - r {
                                // Particle entirely inside the cell sphere.
                                void -= FOUR_THIRDS_PI * r.powi(3);
                            } else if d < big_r + r && d > 0.0 {
                                void -= lens_volume(big_r, r, d);
                            } else {
                                continue;
                            }
                            n += 1;
                            vel_sum += particles.vel_sorted[p].truncate();
                            diam_sum += 2.0 * r;
                        }
                    }
                }
            }

            let new_phi = (void / sphere_volume).clamp(0.0, 1.0);
            *phi_c = new_phi;
            *dphi_c = if first_pass {
                0.0
            } else {
                new_phi - phi_prev[idx]
            };
            if n > 0 {
                *vp_c = vel_sum / n as f64;
                *da_c = diam_sum / n as f64;
            } else {
                // Fluid-only cell: no relative motion against the fluid.
                *vp_c = v[idx];
                *da_c = 0.0;
            }
        });
}

/// Reset the porosity-related fields to their fluid-only state. Used when
/// stepping without a particle phase.
pub fn fill_fluid_only(
    grid: &GridSpec,
    v: &[DVec3],
    phi: &mut [f64],
    dphi: &mut [f64],
    vp_avg: &mut [DVec3],
    d_avg: &mut [f64],
) {
    phi.fill(1.0);
    dphi.fill(0.0);
    d_avg.fill(0.0);
    vp_avg
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, vp_c)| {
            if grid.interior_coords(idx).is_some() {
                *vp_c = v[idx];
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BoundaryCondition;
    use crate::particle::EMPTY_CELL;
    use approx::assert_relative_eq;
    use glam::DVec4;

    /// Sorted-array fixture with one particle per listed (cell, position).
    struct Fixture {
        x: Vec<DVec4>,
        vel: Vec<DVec4>,
        start: Vec<u32>,
        end: Vec<u32>,
        idx: Vec<u32>,
    }

    impl Fixture {
        fn new(grid: &GridSpec, entries: &[(usize, DVec4, DVec4)]) -> Self {
            let mut sorted: Vec<_> = entries.to_vec();
            sorted.sort_by_key(|(hash, _, _)| *hash);
            let n_cells = grid.cell_count();
            let mut start = vec![EMPTY_CELL; n_cells];
            let mut end = vec![EMPTY_CELL; n_cells];
            let mut x = Vec::new();
            let mut vel = Vec::new();
            let mut idx = Vec::new();
            for (slot, (hash, pos, v)) in sorted.iter().enumerate() {
                if start[*hash] == EMPTY_CELL {
                    start[*hash] = slot as u32;
                }
                end[*hash] = slot as u32 + 1;
                x.push(*pos);
                vel.push(*v);
                idx.push(slot as u32);
            }
            Self {
                x,
                vel,
                start,
                end,
                idx,
            }
        }

        fn arrays(&self) -> ParticleArrays<'_> {
            ParticleArrays {
                x_sorted: &self.x,
                vel_sorted: &self.vel,
                cell_start: &self.start,
                cell_end: &self.end,
                grid_particle_index: &self.idx,
            }
        }
    }

    fn run_projection(
        grid: &GridSpec,
        rules: &GhostRules,
        fixture: &Fixture,
    ) -> (Vec<f64>, Vec<f64>, Vec<DVec3>, Vec<f64>) {
        let n = grid.padded_count();
        let v = vec![DVec3::ZERO; n];
        let phi_prev = vec![1.0; n];
        let mut phi = vec![1.0; n];
        let mut dphi = vec![0.0; n];
        let mut vp_avg = vec![DVec3::ZERO; n];
        let mut d_avg = vec![0.0; n];
        project_particles(
            grid,
            rules,
            &fixture.arrays(),
            &v,
            &phi_prev,
            true,
            &mut phi,
            &mut dphi,
            &mut vp_avg,
            &mut d_avg,
        );
        (phi, dphi, vp_avg, d_avg)
    }

    #[test]
    fn test_lens_volume_matches_equal_sphere_formula() {
        // Two equal spheres at distance d: V = pi (2R - d)^2 (d + 4R) / 12.
        let r: f64 = 0.3;
        let d: f64 = 0.25;
        let expected = std::f64::consts::PI * (2.0 * r - d).powi(2) * (d + 4.0 * r) / 12.0;
        assert_relative_eq!(lens_volume(r, r, d), expected, max_relative = 1e-14);
    }

    #[test]
    fn test_lens_volume_containment_limit() {
        // At d = R - r the lens closes onto the whole small sphere.
        let big_r = 2.0;
        let r = 1.0;
        let d = 1.0;
        assert_relative_eq!(
            lens_volume(big_r, r, d),
            FOUR_THIRDS_PI,
            max_relative = 1e-14
        );
    }

    #[test]
    fn test_contained_particle_porosity() {
        // One sphere of radius 0.1 at a cell center of a 4^3 unit box:
        // R = 0.125, the particle sits entirely inside the cell sphere.
        let grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let rules =
            GhostRules::from_z_conditions(BoundaryCondition::Dirichlet, BoundaryCondition::Dirichlet);
        let center = grid.cell_center(1, 1, 1);
        let fixture = Fixture::new(
            &grid,
            &[(
                grid.hash_index(1, 1, 1),
                DVec4::new(center.x, center.y, center.z, 0.1),
                DVec4::new(0.2, 0.0, 0.0, 0.0),
            )],
        );
        let (phi, _, vp_avg, d_avg) = run_projection(&grid, &rules, &fixture);

        let cell_sphere = FOUR_THIRDS_PI * 0.125f64.powi(3);
        let particle = FOUR_THIRDS_PI * 0.1f64.powi(3);
        let idx = grid.cell_index(1, 1, 1);
        assert_relative_eq!(phi[idx], 1.0 - particle / cell_sphere, max_relative = 1e-12);
        assert_relative_eq!(vp_avg[idx].x, 0.2, max_relative = 1e-12);
        assert_relative_eq!(d_avg[idx], 0.2, max_relative = 1e-12);

        // Every other cell is out of reach of the particle.
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    if (i, j, k) != (1, 1, 1) {
                        assert!(phi[grid.cell_index(i, j, k)] >= 0.999);
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_cells_are_fluid_only() {
        let grid = GridSpec::new(3, 3, 3, 1.0, 1.0, 1.0);
        let rules =
            GhostRules::from_z_conditions(BoundaryCondition::Dirichlet, BoundaryCondition::Dirichlet);
        let fixture = Fixture::new(&grid, &[]);

        let n = grid.padded_count();
        let mut v = vec![DVec3::ZERO; n];
        let probe = grid.cell_index(1, 2, 0);
        v[probe] = DVec3::new(0.5, -0.25, 0.1);
        let phi_prev = vec![1.0; n];
        let mut phi = vec![0.0; n];
        let mut dphi = vec![9.0; n];
        let mut vp_avg = vec![DVec3::ZERO; n];
        let mut d_avg = vec![9.0; n];
        project_particles(
            &grid,
            &rules,
            &fixture.arrays(),
            &v,
            &phi_prev,
            true,
            &mut phi,
            &mut dphi,
            &mut vp_avg,
            &mut d_avg,
        );

        assert_eq!(phi[probe], 1.0);
        assert_eq!(dphi[probe], 0.0);
        assert_eq!(vp_avg[probe], v[probe]);
        assert_eq!(d_avg[probe], 0.0);
    }

    #[test]
    fn test_periodic_wrap_sees_particle_across_x_boundary() {
        // A particle near x = 0 must also deplete the cell across the
        // periodic seam at x = lx.
        let grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let rules =
            GhostRules::from_z_conditions(BoundaryCondition::Dirichlet, BoundaryCondition::Dirichlet);
        // Particle centered on the seam, overlapping cells 0 and 3 in x.
        let fixture = Fixture::new(
            &grid,
            &[(
                grid.hash_index(0, 1, 1),
                DVec4::new(0.01, 0.375, 0.375, 0.08),
                DVec4::ZERO,
            )],
        );
        let (phi, _, _, _) = run_projection(&grid, &rules, &fixture);

        // Cell (3,1,1) center is at x = 0.875; the wrapped distance to the
        // particle is 0.135 < R + r = 0.205, so it must see the overlap.
        assert!(phi[grid.cell_index(3, 1, 1)] < 1.0);
        assert!(phi[grid.cell_index(0, 1, 1)] < 1.0);
    }

    #[test]
    fn test_overpacked_cell_clamps_to_zero_porosity() {
        // More solid volume than the cell sphere holds: the void goes
        // negative and the clamp floors phi at zero.
        let grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let rules =
            GhostRules::from_z_conditions(BoundaryCondition::Dirichlet, BoundaryCondition::Dirichlet);
        let center = grid.cell_center(2, 2, 2);
        let hash = grid.hash_index(2, 2, 2);
        let entries: Vec<_> = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(0.02, 0.0, 0.0),
            DVec3::new(0.0, 0.02, 0.0),
            DVec3::new(0.0, 0.0, 0.02),
        ]
        .iter()
        .map(|o| {
            let p = center + *o;
            (hash, DVec4::new(p.x, p.y, p.z, 0.09), DVec4::ZERO)
        })
        .collect();
        let fixture = Fixture::new(&grid, &entries);
        let (phi, _, _, _) = run_projection(&grid, &rules, &fixture);
        assert_eq!(phi[grid.cell_index(2, 2, 2)], 0.0);
    }

    #[test]
    fn test_dphi_tracks_previous_porosity() {
        let grid = GridSpec::new(2, 2, 2, 1.0, 1.0, 1.0);
        let rules =
            GhostRules::from_z_conditions(BoundaryCondition::Dirichlet, BoundaryCondition::Dirichlet);
        let center = grid.cell_center(0, 0, 0);
        let fixture = Fixture::new(
            &grid,
            &[(
                grid.hash_index(0, 0, 0),
                DVec4::new(center.x, center.y, center.z, 0.1),
                DVec4::ZERO,
            )],
        );

        let n = grid.padded_count();
        let v = vec![DVec3::ZERO; n];
        let phi_prev = vec![1.0; n];
        let mut phi = vec![1.0; n];
        let mut dphi = vec![0.0; n];
        let mut vp_avg = vec![DVec3::ZERO; n];
        let mut d_avg = vec![0.0; n];
        project_particles(
            &grid,
            &rules,
            &fixture.arrays(),
            &v,
            &phi_prev,
            false,
            &mut phi,
            &mut dphi,
            &mut vp_avg,
            &mut d_avg,
        );

        let idx = grid.cell_index(0, 0, 0);
        assert!(phi[idx] < 1.0);
        assert_relative_eq!(dphi[idx], phi[idx] - 1.0, max_relative = 1e-12);
    }
}
