use approx::assert_relative_eq;
use edmd::core::vector;
use edmd::core::{EventType, Simulation};
use edmd::error::Result;
use edmd::WorldConfig;
use serde_json::json;

fn head_on(elasticity: f64) -> Result<Simulation> {
    let cfg: WorldConfig = serde_json::from_value(json!({
        "box_size": [10.0, 10.0, 10.0],
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": 2}],
        "interactions": [{"name": "hs", "type": "hard_sphere", "diameter": 1.0, "elasticity": elasticity}],
        "particles": {"explicit": [
            {"r": [-2.0, 0.0, 0.0], "v": [1.0, 0.0, 0.0]},
            {"r": [2.0, 0.0, 0.0], "v": [-1.0, 0.0, 0.0]}
        ]},
        "seed": 1
    }))?;
    cfg.into_simulation()
}

fn gas(n: usize, box_len: f64, elasticity: f64, seed: u64) -> Result<Simulation> {
    let cfg: WorldConfig = serde_json::from_value(json!({
        "box_size": [box_len, box_len, box_len],
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": n}],
        "interactions": [{"name": "hs", "type": "hard_sphere", "diameter": 1.0, "elasticity": elasticity}],
        "particles": {"random": {"count": n, "max_speed": 1.0}},
        "seed": seed
    }))?;
    cfg.into_simulation()
}

fn min_separation(sim: &Simulation) -> f64 {
    let r = sim.positions();
    let mut best = f64::INFINITY;
    for i in 0..r.len() {
        for j in (i + 1)..r.len() {
            let mut d = vector::sub(&r[i], &r[j]);
            sim.boundary().minimum_image(&mut d);
            best = best.min(vector::norm2(&d).sqrt());
        }
    }
    best
}

/// Two unit spheres closing at speed 2 from 4 apart touch at t = 1.5.
#[test]
fn head_on_collision_swaps_velocities() -> Result<()> {
    let mut sim = head_on(1.0)?;
    sim.advance_to(2.0)?;
    assert_eq!(sim.count_of(EventType::Core), 1);
    let v = sim.velocities();
    assert_relative_eq!(v[0][0], -1.0, epsilon = 1e-12);
    assert_relative_eq!(v[1][0], 1.0, epsilon = 1e-12);
    // Half a time unit after contact at 1.5 they are 2 apart again.
    let r = sim.positions();
    assert_relative_eq!(r[1][0] - r[0][0], 2.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn inelastic_head_on_loses_energy_and_keeps_momentum() -> Result<()> {
    let mut sim = head_on(0.5)?;
    let ke0 = sim.kinetic_energy();
    sim.advance_to(2.0)?;
    assert_eq!(sim.count_of(EventType::Core), 1);
    let v = sim.velocities();
    assert_relative_eq!(v[0][0], -0.5, epsilon = 1e-12);
    assert_relative_eq!(v[1][0], 0.5, epsilon = 1e-12);
    assert!(sim.kinetic_energy() < ke0);
    assert_relative_eq!(sim.momentum()[0], 0.0, epsilon = 1e-12);
    Ok(())
}

#[test]
fn elastic_gas_conserves_momentum_and_energy() -> Result<()> {
    let mut sim = gas(40, 8.0, 1.0, 7)?;
    let p0 = sim.momentum();
    let e0 = sim.kinetic_energy();
    sim.run_events(5_000)?;
    assert!(sim.count_of(EventType::Core) > 0);
    let p1 = sim.momentum();
    for k in 0..3 {
        assert_relative_eq!(p1[k], p0[k], epsilon = 1e-9);
    }
    assert_relative_eq!(sim.kinetic_energy(), e0, max_relative = 1e-9);
    assert!(min_separation(&sim) > 1.0 - 1e-7);
    Ok(())
}

#[test]
fn inelastic_gas_never_gains_energy() -> Result<()> {
    let mut sim = gas(30, 8.0, 0.9, 3)?;
    let mut last = sim.kinetic_energy();
    for _ in 0..1_000 {
        if sim.step(f64::INFINITY)?.is_none() {
            break;
        }
        let ke = sim.kinetic_energy();
        assert!(ke <= last * (1.0 + 1e-12), "energy rose from {last} to {ke}");
        last = ke;
    }
    Ok(())
}

#[test]
fn executed_event_times_never_decrease() -> Result<()> {
    let mut sim = gas(40, 8.0, 1.0, 21)?;
    let mut previous = sim.time();
    for _ in 0..3_000 {
        if sim.step(f64::INFINITY)?.is_none() {
            break;
        }
        assert!(sim.time() >= previous);
        previous = sim.time();
    }
    assert!(sim.time() > 0.0);
    Ok(())
}

#[test]
fn stale_entries_are_discarded_not_executed() -> Result<()> {
    let mut sim = gas(40, 8.0, 1.0, 5)?;
    sim.run_events(2_000)?;
    assert_eq!(sim.event_count(), 2_000);
    assert!(sim.stale_count() > 0);
    let total: u64 = sim.event_counts().iter().map(|(_, n)| n).sum();
    assert_eq!(total, sim.event_count());
    Ok(())
}

#[test]
fn removing_drift_zeroes_momentum() -> Result<()> {
    let mut sim = gas(20, 8.0, 1.0, 9)?;
    sim.set_com_velocity([0.0; 3])?;
    let p = sim.momentum();
    assert!(vector::norm2(&p).sqrt() < 1e-12);
    sim.run_events(500)?;
    let p = sim.momentum();
    assert!(vector::norm2(&p).sqrt() < 1e-9);
    Ok(())
}

/// Two rigid dimers on the x axis. The inner members touch at t = 1.5 and
/// every member of each dimer picks up the same velocity change.
#[test]
fn clustered_dimers_recoil_as_rigid_bodies() -> Result<()> {
    let cfg: WorldConfig = serde_json::from_value(json!({
        "box_size": [12.0, 12.0, 12.0],
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": 4}],
        "interactions": [{"name": "hs", "type": "hard_sphere", "diameter": 1.0, "clustered": true}],
        "structures": [[0, 1], [2, 3]],
        "particles": {"explicit": [
            {"r": [-3.0, 0.0, 0.0], "v": [1.0, 0.0, 0.0]},
            {"r": [-2.0, 0.0, 0.0], "v": [1.0, 0.0, 0.0]},
            {"r": [2.0, 0.0, 0.0], "v": [-1.0, 0.0, 0.0]},
            {"r": [3.0, 0.0, 0.0], "v": [-1.0, 0.0, 0.0]}
        ]},
        "seed": 5
    }))?;
    let mut sim = cfg.into_simulation()?;
    let e0 = sim.kinetic_energy();
    sim.advance_to(2.0)?;
    assert_eq!(sim.count_of(EventType::Core), 1);
    let v = sim.velocities();
    for (id, expected) in [(0, -1.0), (1, -1.0), (2, 1.0), (3, 1.0)] {
        assert_relative_eq!(v[id][0], expected, epsilon = 1e-12);
    }
    assert_relative_eq!(sim.kinetic_energy(), e0, max_relative = 1e-12);
    let r = sim.positions();
    assert_relative_eq!(r[1][0] - r[0][0], 1.0, epsilon = 1e-9);
    assert_relative_eq!(r[2][0] - r[1][0], 2.0, epsilon = 1e-9);
    Ok(())
}
