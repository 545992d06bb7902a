//! Pressure-communication diagnostic: raise the top-boundary pressure over a
//! no-flux floor and watch it propagate down the column.
//!
//! Run with: cargo run --example pressure_diagnostic

use ns3d::{BoundaryCondition, GridSpec, NsConfig, NsCore, PressureSchedule};

fn main() {
    env_logger::init();

    let mut cfg = NsConfig::default();
    cfg.grid = GridSpec::new(8, 8, 8, 1.0, 1.0, 1.0);
    cfg.rho = 1.0;
    cfg.nu = 1.0e-3;
    cfg.dt = 1.0e-3;
    cfg.bc_top = BoundaryCondition::Dirichlet;
    cfg.bc_bot = BoundaryCondition::Neumann;
    cfg.p_top = Some(PressureSchedule::constant(1.0));

    let mut core = NsCore::new(cfg).expect("valid configuration");

    println!("step  sweeps  norm        max|v|");
    for step in 0..20 {
        let report = core.step().expect("step failed");
        println!(
            "{:>4}  {:>6}  {:>9.3e}  {:>9.3e}",
            step, report.poisson.iterations, report.poisson.final_norm, report.max_velocity
        );
    }

    let grid = *core.grid();
    println!("\npressure column at (4, 4):");
    for k in (0..grid.nz as i32).rev() {
        let p = core.p[grid.cell_index(4, 4, k)];
        println!("  z = {:>2}: p = {:.6}", k, p);
    }
    println!("\nCFL advisory dt: {:.3e} s", core.max_dt());
}
