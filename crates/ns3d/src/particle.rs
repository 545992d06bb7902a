//! Read-only view of the particle subsystem's sorted arrays, and the
//! atomically accumulated force output.
//!
//! The DEM side owns particle storage and the spatial hash; the fluid core
//! consumes four arrays sorted by cell hash and writes drag back through
//! [`ForceAccumulator`]. Many fluid cells may scatter into the same particle
//! slot, so accumulation uses an explicit atomic f64 add.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{DVec3, DVec4};

use crate::error::NsError;
use crate::grid::GridSpec;

/// Sentinel for an empty particle-hash cell in `cell_start`/`cell_end`.
pub const EMPTY_CELL: u32 = u32::MAX;

/// Borrowed view of the sorted particle arrays.
#[derive(Clone, Copy)]
pub struct ParticleArrays<'a> {
    /// `(x, y, z, radius)` per particle, sorted by cell hash.
    pub x_sorted: &'a [DVec4],
    /// `(vx, vy, vz, fixed_flag)` per particle, in the same order.
    pub vel_sorted: &'a [DVec4],
    /// First sorted index per hash cell, `EMPTY_CELL` when the cell is empty.
    pub cell_start: &'a [u32],
    /// One-past-last sorted index per hash cell.
    pub cell_end: &'a [u32],
    /// Inverse permutation: sorted slot -> original particle slot.
    pub grid_particle_index: &'a [u32],
}

impl<'a> ParticleArrays<'a> {
    /// Check consistency against the fluid grid. Any mismatch is fatal.
    pub fn validate(&self, grid: &GridSpec) -> Result<(), NsError> {
        let n_cells = grid.cell_count();
        if self.cell_start.len() != n_cells || self.cell_end.len() != n_cells {
            return Err(NsError::ParticleGridMismatch(format!(
                "hash cell ranges cover {} cells, fluid grid has {}",
                self.cell_start.len(),
                n_cells
            )));
        }
        let n = self.x_sorted.len();
        if self.vel_sorted.len() != n || self.grid_particle_index.len() != n {
            return Err(NsError::ParticleGridMismatch(format!(
                "sorted array lengths disagree: {} positions, {} velocities, {} indices",
                n,
                self.vel_sorted.len(),
                self.grid_particle_index.len()
            )));
        }
        for (hash, (&start, &end)) in self.cell_start.iter().zip(self.cell_end).enumerate() {
            if start == EMPTY_CELL {
                continue;
            }
            if end < start || end as usize > n {
                return Err(NsError::ParticleGridMismatch(format!(
                    "hash cell {hash} has range {start}..{end} over {n} particles"
                )));
            }
        }
        Ok(())
    }

    /// Sorted index range of the particles in a hash cell, or `None` when the
    /// cell is empty.
    #[inline]
    pub fn cell_range(&self, hash: usize) -> Option<Range<usize>> {
        let start = self.cell_start[hash];
        if start == EMPTY_CELL {
            None
        } else {
            Some(start as usize..self.cell_end[hash] as usize)
        }
    }

    /// Number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.x_sorted.len()
    }

    /// True when no particles are present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x_sorted.is_empty()
    }
}

/// Add `value` into an f64 stored as atomic bits.
#[inline]
fn atomic_add_f64(slot: &AtomicU64, value: f64) {
    let mut current = slot.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + value).to_bits();
        match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

/// Per-particle force accumulator, indexed by ORIGINAL particle slot.
///
/// Stores a 4-vector per particle; the fourth component is carried for layout
/// compatibility with the DEM force array and is never written by this core.
pub struct ForceAccumulator {
    slots: Vec<[AtomicU64; 4]>,
}

impl ForceAccumulator {
    /// Zero-initialized accumulator for `n` particles.
    pub fn new(n: usize) -> Self {
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            slots.push([
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ]);
        }
        Self { slots }
    }

    /// Number of particle slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slots are allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Atomically add a force contribution to one particle.
    #[inline]
    pub fn add(&self, index: usize, force: DVec3) {
        let slot = &self.slots[index];
        atomic_add_f64(&slot[0], force.x);
        atomic_add_f64(&slot[1], force.y);
        atomic_add_f64(&slot[2], force.z);
    }

    /// Read back one accumulated force.
    pub fn get(&self, index: usize) -> DVec4 {
        let slot = &self.slots[index];
        DVec4::new(
            f64::from_bits(slot[0].load(Ordering::Relaxed)),
            f64::from_bits(slot[1].load(Ordering::Relaxed)),
            f64::from_bits(slot[2].load(Ordering::Relaxed)),
            f64::from_bits(slot[3].load(Ordering::Relaxed)),
        )
    }

    /// Reset all slots to zero.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            for component in slot {
                *component.get_mut() = 0;
            }
        }
    }
}
