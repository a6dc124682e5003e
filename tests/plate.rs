use approx::assert_relative_eq;
use edmd::core::{EventType, Simulation};
use edmd::error::Result;
use edmd::WorldConfig;
use serde_json::json;

const DELTA: f64 = 0.3;
const OMEGA: f64 = 2.0;
const SIGMA: f64 = 0.5;

fn plate_offset(t: f64) -> f64 {
    DELTA * (OMEGA * t).cos()
}

fn plate_speed(t: f64) -> f64 {
    -DELTA * OMEGA * (OMEGA * t).sin()
}

/// One particle rattling between the lid of a closed box and a plate
/// driven along z through the middle of it.
fn rattler(elasticity: f64) -> Result<Simulation> {
    let cfg: WorldConfig = serde_json::from_value(json!({
        "box_size": [6.0, 6.0, 6.0],
        "boundary": "reflective",
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": 1}],
        "locals": [{"name": "plate", "type": "oscillating_plate",
                    "origin": [0.0, 0.0, 0.0], "normal": [0.0, 0.0, 1.0],
                    "delta": DELTA, "omega": OMEGA, "sigma": SIGMA,
                    "elasticity": elasticity}],
        "particles": {"explicit": [{"r": [0.2, -0.3, 1.5], "v": [0.3, 0.2, -1.5]}]},
        "seed": 3
    }))?;
    cfg.into_simulation()
}

/// Runs to `t_end` and checks every event. Returns the number of plate hits.
fn rattle(sim: &mut Simulation, elasticity: f64, t_end: f64) -> Result<usize> {
    let mut hits = 0;
    let mut last_hit = f64::NEG_INFINITY;
    while sim.time() < t_end {
        let v_before = sim.velocities()[0];
        let ke_before = sim.kinetic_energy();
        let Some(event) = sim.step(f64::INFINITY)? else {
            panic!("queue exhausted at t={}", sim.time());
        };
        let t = sim.time();
        let r = sim.positions()[0];
        let v = sim.velocities()[0];
        let gap = r[2] - plate_offset(t);
        assert!(gap >= SIGMA - 1e-7, "crossed the plate at t={t}: gap {gap}");

        let on_plate = event == EventType::Wall && (gap - SIGMA).abs() < 1e-7;
        if on_plate {
            assert!(t - last_hit > 1e-9, "second plate hit at t={t}");
            last_hit = t;
            hits += 1;
            let u_before = v_before[2] - plate_speed(t);
            let u_after = v[2] - plate_speed(t);
            assert!(u_before < 0.0, "hit while separating at t={t}");
            assert_relative_eq!(u_after, -elasticity * u_before, epsilon = 1e-9);
            assert_relative_eq!(v[0], v_before[0]);
            assert_relative_eq!(v[1], v_before[1]);
        } else {
            assert_relative_eq!(sim.kinetic_energy(), ke_before, max_relative = 1e-12);
        }
    }
    Ok(hits)
}

#[test]
fn elastic_plate_reflects_the_relative_speed() -> Result<()> {
    let mut sim = rattler(1.0)?;
    let hits = rattle(&mut sim, 1.0, 60.0)?;
    assert!(hits >= 10, "only {hits} plate hits");
    assert!(sim.count_of(EventType::Wall) > hits as u64);
    Ok(())
}

#[test]
fn inelastic_plate_damps_the_relative_speed() -> Result<()> {
    let mut sim = rattler(0.9)?;
    let hits = rattle(&mut sim, 0.9, 60.0)?;
    assert!(hits >= 4, "only {hits} plate hits");
    Ok(())
}
