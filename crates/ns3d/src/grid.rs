//! Cartesian cell grid with a one-cell ghost halo and staggered face arrays.
//!
//! Cell-centered fields are stored padded: `(nx+2) * (ny+2) * (nz+2)` entries
//! with logical indices `-1..=n` per axis. Face arrays are stored unpadded
//! with `(nx+1) * (ny+1) * (nz+1)` entries.
//!
//! The indexer here is deliberately free of boundary knowledge so that every
//! stencil kernel can also be driven by single-threaded reference tests.
//! Boundary behavior lives in [`GhostRules`], a per-face table evaluated once
//! per step and passed to the refresh functions.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::NsError;

/// Grid geometry: cell counts and physical box extents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of cells in X direction
    pub nx: usize,
    /// Number of cells in Y direction
    pub ny: usize,
    /// Number of cells in Z direction
    pub nz: usize,
    /// Physical extent in X (m)
    pub lx: f64,
    /// Physical extent in Y (m)
    pub ly: f64,
    /// Physical extent in Z (m)
    pub lz: f64,
}

impl GridSpec {
    /// Create a grid spec over the box `[0, lx] x [0, ly] x [0, lz]`.
    pub fn new(nx: usize, ny: usize, nz: usize, lx: f64, ly: f64, lz: f64) -> Self {
        Self {
            nx,
            ny,
            nz,
            lx,
            ly,
            lz,
        }
    }

    /// Cell size in X.
    #[inline]
    pub fn dx(&self) -> f64 {
        self.lx / self.nx as f64
    }

    /// Cell size in Y.
    #[inline]
    pub fn dy(&self) -> f64 {
        self.ly / self.ny as f64
    }

    /// Cell size in Z.
    #[inline]
    pub fn dz(&self) -> f64 {
        self.lz / self.nz as f64
    }

    /// Smallest cell dimension.
    #[inline]
    pub fn min_spacing(&self) -> f64 {
        self.dx().min(self.dy()).min(self.dz())
    }

    /// Number of interior cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Storage footprint of a cell field including the ghost halo.
    #[inline]
    pub fn padded_count(&self) -> usize {
        (self.nx + 2) * (self.ny + 2) * (self.nz + 2)
    }

    /// Storage footprint of one staggered face component.
    #[inline]
    pub fn face_count(&self) -> usize {
        (self.nx + 1) * (self.ny + 1) * (self.nz + 1)
    }

    /// Index into a padded cell field. Valid logical range is `-1..=n` per
    /// axis; the ghost halo occupies the `-1` and `n` planes.
    #[inline]
    pub fn cell_index(&self, i: i32, j: i32, k: i32) -> usize {
        debug_assert!(i >= -1 && i <= self.nx as i32);
        debug_assert!(j >= -1 && j <= self.ny as i32);
        debug_assert!(k >= -1 && k <= self.nz as i32);
        ((k + 1) as usize * (self.ny + 2) + (j + 1) as usize) * (self.nx + 2) + (i + 1) as usize
    }

    /// Index into a staggered face array of dimensions
    /// `(nx+1) x (ny+1) x (nz+1)`.
    #[inline]
    pub fn face_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i <= self.nx && j <= self.ny && k <= self.nz);
        (k * (self.ny + 1) + j) * (self.nx + 1) + i
    }

    /// Index into the particle-hash cell arrays (`cell_start`/`cell_end`),
    /// which share the fluid grid dimensions without a halo.
    #[inline]
    pub fn hash_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (k * self.ny + j) * self.nx + i
    }

    /// Recover interior coordinates from a padded linear index.
    /// Returns `None` for ghost entries, letting parallel kernels that own
    /// one padded slot each skip the halo.
    #[inline]
    pub fn interior_coords(&self, padded: usize) -> Option<(i32, i32, i32)> {
        let sx = self.nx + 2;
        let sy = self.ny + 2;
        let i = (padded % sx) as i32 - 1;
        let j = ((padded / sx) % sy) as i32 - 1;
        let k = (padded / (sx * sy)) as i32 - 1;
        if i >= 0
            && i < self.nx as i32
            && j >= 0
            && j < self.ny as i32
            && k >= 0
            && k < self.nz as i32
        {
            Some((i, j, k))
        } else {
            None
        }
    }

    /// World position of the cell center at (i, j, k).
    #[inline]
    pub fn cell_center(&self, i: i32, j: i32, k: i32) -> DVec3 {
        DVec3::new(
            (i as f64 + 0.5) * self.dx(),
            (j as f64 + 0.5) * self.dy(),
            (k as f64 + 0.5) * self.dz(),
        )
    }
}

/// Boundary regime of one domain face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryCondition {
    /// Ghost mirrors the adjacent interior plane; the boundary value itself
    /// is pinned externally by the caller.
    Dirichlet,
    /// Ghost copies the first interior plane so the discrete gradient across
    /// the boundary is zero.
    Neumann,
    /// Ghost copies the interior plane on the opposite side of the domain.
    Periodic,
}

impl BoundaryCondition {
    /// Decode the numeric tag used on the configuration surface
    /// (0 = Dirichlet, 1 = Neumann, 2 = Periodic).
    pub fn from_tag(tag: u8) -> Result<Self, NsError> {
        match tag {
            0 => Ok(BoundaryCondition::Dirichlet),
            1 => Ok(BoundaryCondition::Neumann),
            2 => Ok(BoundaryCondition::Periodic),
            other => Err(NsError::Config(format!("unknown boundary tag {other}"))),
        }
    }
}

/// Per-face ghost rule table, evaluated once per step.
///
/// The x and y axes are always periodic; only the z faces are configurable.
#[derive(Clone, Copy, Debug)]
pub struct GhostRules {
    pub x_min: BoundaryCondition,
    pub x_max: BoundaryCondition,
    pub y_min: BoundaryCondition,
    pub y_max: BoundaryCondition,
    pub z_min: BoundaryCondition,
    pub z_max: BoundaryCondition,
}

impl GhostRules {
    /// Rules for the solver's domain: periodic side walls, configurable z.
    pub fn from_z_conditions(bc_bot: BoundaryCondition, bc_top: BoundaryCondition) -> Self {
        Self {
            x_min: BoundaryCondition::Periodic,
            x_max: BoundaryCondition::Periodic,
            y_min: BoundaryCondition::Periodic,
            y_max: BoundaryCondition::Periodic,
            z_min: bc_bot,
            z_max: bc_top,
        }
    }

    /// Uniform rules on all six faces. Used by reference tests that drive
    /// stencil kernels outside the solver's periodic-side-wall domain.
    pub fn uniform(bc: BoundaryCondition) -> Self {
        Self {
            x_min: bc,
            x_max: bc,
            y_min: bc,
            y_max: bc,
            z_min: bc,
            z_max: bc,
        }
    }

    /// True when the given axis wraps around.
    #[inline]
    pub fn periodic_z(&self) -> bool {
        self.z_min == BoundaryCondition::Periodic && self.z_max == BoundaryCondition::Periodic
    }
}

/// Refresh the face-adjacent ghost layer of a padded cell field.
///
/// Works for any `Copy` payload, so scalars, vectors and the six-component
/// stress tensor all share one implementation (the tensor's components are
/// copied together). Edge and corner diagonal ghosts are never read by any
/// stencil and are left untouched.
pub fn refresh_ghosts<T: Copy>(grid: &GridSpec, rules: &GhostRules, field: &mut [T]) {
    debug_assert_eq!(field.len(), grid.padded_count());
    let (nx, ny, nz) = (grid.nx as i32, grid.ny as i32, grid.nz as i32);

    // Interior source plane for a min/max ghost under the given rule.
    let src_lo = |bc: BoundaryCondition, n: i32| match bc {
        BoundaryCondition::Periodic => n - 1,
        _ => 0,
    };
    let src_hi = |bc: BoundaryCondition, n: i32| match bc {
        BoundaryCondition::Periodic => 0,
        _ => n - 1,
    };

    // x faces
    for k in 0..nz {
        for j in 0..ny {
            field[grid.cell_index(-1, j, k)] =
                field[grid.cell_index(src_lo(rules.x_min, nx), j, k)];
            field[grid.cell_index(nx, j, k)] =
                field[grid.cell_index(src_hi(rules.x_max, nx), j, k)];
        }
    }

    // y faces
    for k in 0..nz {
        for i in 0..nx {
            field[grid.cell_index(i, -1, k)] =
                field[grid.cell_index(i, src_lo(rules.y_min, ny), k)];
            field[grid.cell_index(i, ny, k)] =
                field[grid.cell_index(i, src_hi(rules.y_max, ny), k)];
        }
    }

    // z faces
    for j in 0..ny {
        for i in 0..nx {
            field[grid.cell_index(i, j, -1)] =
                field[grid.cell_index(i, j, src_lo(rules.z_min, nz))];
            field[grid.cell_index(i, j, nz)] =
                field[grid.cell_index(i, j, src_hi(rules.z_max, nz))];
        }
    }
}

/// Overwrite one interior z-plane of a padded scalar field with a fixed
/// value. Used for the externally scheduled top-boundary pressure.
pub fn set_z_plane(grid: &GridSpec, field: &mut [f64], k: i32, value: f64) {
    for j in 0..grid.ny as i32 {
        for i in 0..grid.nx as i32 {
            field[grid.cell_index(i, j, k)] = value;
        }
    }
}

/// Central-difference gradient of a padded scalar field at an interior cell.
#[inline]
pub(crate) fn central_gradient(grid: &GridSpec, f: &[f64], i: i32, j: i32, k: i32) -> DVec3 {
    DVec3::new(
        (f[grid.cell_index(i + 1, j, k)] - f[grid.cell_index(i - 1, j, k)]) / (2.0 * grid.dx()),
        (f[grid.cell_index(i, j + 1, k)] - f[grid.cell_index(i, j - 1, k)]) / (2.0 * grid.dy()),
        (f[grid.cell_index(i, j, k + 1)] - f[grid.cell_index(i, j, k - 1)]) / (2.0 * grid.dz()),
    )
}

/// Central-difference divergence of a padded vector field at an interior
/// cell. The z term reads the z component.
#[inline]
pub(crate) fn central_divergence(grid: &GridSpec, f: &[DVec3], i: i32, j: i32, k: i32) -> f64 {
    (f[grid.cell_index(i + 1, j, k)].x - f[grid.cell_index(i - 1, j, k)].x) / (2.0 * grid.dx())
        + (f[grid.cell_index(i, j + 1, k)].y - f[grid.cell_index(i, j - 1, k)].y)
            / (2.0 * grid.dy())
        + (f[grid.cell_index(i, j, k + 1)].z - f[grid.cell_index(i, j, k - 1)].z)
            / (2.0 * grid.dz())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_index_layout() {
        let grid = GridSpec::new(4, 5, 6, 1.0, 1.0, 1.0);
        // Ghost corner (-1,-1,-1) is the first slot.
        assert_eq!(grid.cell_index(-1, -1, -1), 0);
        assert_eq!(grid.cell_index(0, -1, -1), 1);
        assert_eq!(grid.cell_index(-1, 0, -1), 6);
        assert_eq!(grid.cell_index(-1, -1, 0), 6 * 7);
        // Last slot is the opposite ghost corner.
        assert_eq!(grid.cell_index(4, 5, 6), grid.padded_count() - 1);
    }

    #[test]
    fn test_interior_coords_roundtrip() {
        let grid = GridSpec::new(3, 4, 5, 1.0, 1.0, 1.0);
        let mut seen = 0;
        for padded in 0..grid.padded_count() {
            if let Some((i, j, k)) = grid.interior_coords(padded) {
                assert_eq!(grid.cell_index(i, j, k), padded);
                seen += 1;
            }
        }
        assert_eq!(seen, grid.cell_count());
    }

    #[test]
    fn test_face_index_extents() {
        let grid = GridSpec::new(4, 5, 6, 1.0, 1.0, 1.0);
        assert_eq!(grid.face_index(0, 0, 0), 0);
        assert_eq!(grid.face_index(4, 5, 6), grid.face_count() - 1);
    }

    #[test]
    fn test_cell_sizes() {
        let grid = GridSpec::new(4, 8, 16, 1.0, 2.0, 8.0);
        assert_eq!(grid.dx(), 0.25);
        assert_eq!(grid.dy(), 0.25);
        assert_eq!(grid.dz(), 0.5);
        assert_eq!(grid.min_spacing(), 0.25);
    }

    #[test]
    fn test_boundary_tag_decode() {
        assert_eq!(
            BoundaryCondition::from_tag(0).unwrap(),
            BoundaryCondition::Dirichlet
        );
        assert_eq!(
            BoundaryCondition::from_tag(1).unwrap(),
            BoundaryCondition::Neumann
        );
        assert_eq!(
            BoundaryCondition::from_tag(2).unwrap(),
            BoundaryCondition::Periodic
        );
        assert!(BoundaryCondition::from_tag(3).is_err());
    }

    /// Fill interior cells with a unique value per cell, refresh, and check
    /// every face ghost against the image its rule dictates.
    #[test]
    fn test_ghost_refresh_rules() {
        let grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let rules = GhostRules::from_z_conditions(
            BoundaryCondition::Dirichlet,
            BoundaryCondition::Neumann,
        );

        let mut field = vec![0.0f64; grid.padded_count()];
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    field[grid.cell_index(i, j, k)] = (100 * i + 10 * j + k) as f64;
                }
            }
        }
        refresh_ghosts(&grid, &rules, &mut field);

        for k in 0..4 {
            for j in 0..4 {
                // Periodic x: ghost takes the opposite interior plane.
                assert_eq!(
                    field[grid.cell_index(-1, j, k)],
                    field[grid.cell_index(3, j, k)]
                );
                assert_eq!(
                    field[grid.cell_index(4, j, k)],
                    field[grid.cell_index(0, j, k)]
                );
            }
        }
        for k in 0..4 {
            for i in 0..4 {
                assert_eq!(
                    field[grid.cell_index(i, -1, k)],
                    field[grid.cell_index(i, 3, k)]
                );
                assert_eq!(
                    field[grid.cell_index(i, 4, k)],
                    field[grid.cell_index(i, 0, k)]
                );
            }
        }
        for j in 0..4 {
            for i in 0..4 {
                // Dirichlet bottom mirrors the adjacent interior plane.
                assert_eq!(
                    field[grid.cell_index(i, j, -1)],
                    field[grid.cell_index(i, j, 0)]
                );
                // Neumann top copies the first interior plane.
                assert_eq!(
                    field[grid.cell_index(i, j, 4)],
                    field[grid.cell_index(i, j, 3)]
                );
            }
        }
    }

    #[test]
    fn test_ghost_refresh_leaves_corners() {
        let grid = GridSpec::new(3, 3, 3, 1.0, 1.0, 1.0);
        let rules = GhostRules::uniform(BoundaryCondition::Periodic);
        let mut field = vec![-7.0f64; grid.padded_count()];
        for k in 0..3 {
            for j in 0..3 {
                for i in 0..3 {
                    field[grid.cell_index(i, j, k)] = 1.0;
                }
            }
        }
        refresh_ghosts(&grid, &rules, &mut field);
        // Diagonal edge/corner ghosts are never written.
        assert_eq!(field[grid.cell_index(-1, -1, -1)], -7.0);
        assert_eq!(field[grid.cell_index(-1, -1, 0)], -7.0);
        assert_eq!(field[grid.cell_index(3, 3, 3)], -7.0);
    }

    #[test]
    fn test_central_gradient_linear_field() {
        let grid = GridSpec::new(4, 4, 4, 1.0, 1.0, 1.0);
        let mut f = vec![0.0f64; grid.padded_count()];
        // f = 2x + 3y - z at cell centers, including ghosts.
        for k in -1..=4 {
            for j in -1..=4 {
                for i in -1..=4 {
                    let c = grid.cell_center(i, j, k);
                    f[grid.cell_index(i, j, k)] = 2.0 * c.x + 3.0 * c.y - c.z;
                }
            }
        }
        let g = central_gradient(&grid, &f, 2, 2, 2);
        assert!((g.x - 2.0).abs() < 1e-12);
        assert!((g.y - 3.0).abs() < 1e-12);
        assert!((g.z + 1.0).abs() < 1e-12);
    }
}
