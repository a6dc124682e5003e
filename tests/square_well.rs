use approx::assert_relative_eq;
use edmd::core::{EventType, Simulation};
use edmd::error::Result;
use edmd::WorldConfig;
use serde_json::json;

/// Two unit-mass particles on the x axis with a well of diameter 1,
/// lambda 1.5 and depth 1.
fn pair(x: f64, speed: f64) -> Result<Simulation> {
    let cfg: WorldConfig = serde_json::from_value(json!({
        "box_size": [10.0, 10.0, 10.0],
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": 2}],
        "interactions": [{
            "name": "sw", "type": "square_well",
            "diameter": 1.0, "lambda": 1.5, "well_depth": 1.0
        }],
        "particles": {"explicit": [
            {"r": [-x, 0.0, 0.0], "v": [speed, 0.0, 0.0]},
            {"r": [x, 0.0, 0.0], "v": [-speed, 0.0, 0.0]}
        ]},
        "seed": 1
    }))?;
    cfg.into_simulation()
}

/// Step until the next event that is not a cell crossing.
fn next_physical(sim: &mut Simulation) -> Result<EventType> {
    loop {
        match sim.step(f64::INFINITY)? {
            Some(EventType::Cell) => continue,
            Some(t) => return Ok(t),
            None => panic!("queue exhausted"),
        }
    }
}

#[test]
fn fast_pair_is_captured_then_escapes() -> Result<()> {
    let mut sim = pair(2.0, 1.0)?;
    assert_eq!(sim.captured_pairs(), 0);
    let e0 = sim.total_energy();

    assert_eq!(next_physical(&mut sim)?, EventType::WellKeUp);
    assert_relative_eq!(sim.time(), 1.25, epsilon = 1e-12);
    assert_eq!(sim.captured_pairs(), 1);
    assert_relative_eq!(sim.internal_energy(), -1.0);
    assert_relative_eq!(sim.kinetic_energy(), 2.0, epsilon = 1e-12);
    assert_relative_eq!(sim.velocities()[0][0], 2f64.sqrt(), epsilon = 1e-12);

    assert_eq!(next_physical(&mut sim)?, EventType::Core);
    assert_eq!(next_physical(&mut sim)?, EventType::WellKeDown);
    assert_eq!(sim.captured_pairs(), 0);
    assert_relative_eq!(sim.internal_energy(), 0.0);
    assert_relative_eq!(sim.velocities()[0][0], -1.0, epsilon = 1e-12);
    assert_relative_eq!(sim.total_energy(), e0, epsilon = 1e-12);
    Ok(())
}

#[test]
fn slow_pair_inside_the_well_bounces() -> Result<()> {
    // Separation 1.2 < 1.5: bound from the start, drifting apart at 0.5.
    let mut sim = pair(0.6, -0.25)?;
    assert_eq!(sim.captured_pairs(), 1);
    assert_relative_eq!(sim.internal_energy(), -1.0);

    assert_eq!(next_physical(&mut sim)?, EventType::Bounce);
    assert_relative_eq!(sim.time(), 0.6, epsilon = 1e-12);
    assert_eq!(sim.captured_pairs(), 1);
    assert_relative_eq!(sim.velocities()[0][0], 0.25, epsilon = 1e-12);

    assert_eq!(next_physical(&mut sim)?, EventType::Core);
    assert_relative_eq!(sim.time(), 1.6, epsilon = 1e-12);
    assert_eq!(next_physical(&mut sim)?, EventType::Bounce);
    assert_relative_eq!(sim.time(), 2.6, epsilon = 1e-12);

    assert_eq!(sim.count_of(EventType::WellKeDown), 0);
    assert_relative_eq!(sim.kinetic_energy(), 0.0625, epsilon = 1e-12);
    Ok(())
}
