use approx::assert_relative_eq;
use edmd::core::{EventType, Liouvillean, Simulation};
use edmd::error::{Error, Result};
use edmd::WorldConfig;
use serde_json::{json, Value};

fn compressing(particles: Value, growth_rate: f64) -> Value {
    json!({
        "box_size": [10.0, 10.0, 10.0],
        "species": [{"name": "A", "mass": 1.0, "start": 0, "end": 2}],
        "interactions": [{"name": "hs", "type": "hard_sphere", "diameter": 1.0}],
        "systems": [{"name": "rebuild", "type": "compression_rebuild"}],
        "particles": particles,
        "dynamics": {"type": "compression", "growth_rate": growth_rate},
        "min_cell_size": 2.0,
        "seed": 4
    })
}

fn build(v: Value) -> Result<Simulation> {
    let cfg: WorldConfig = serde_json::from_value(v)?;
    cfg.into_simulation()
}

fn at_rest() -> Value {
    json!({"explicit": [
        {"r": [-2.0, 0.0, 0.0], "v": [0.0, 0.0, 0.0]},
        {"r": [2.0, 0.0, 0.0], "v": [0.0, 0.0, 0.0]}
    ]})
}

#[test]
fn rebuilds_follow_the_cell_width_schedule() -> Result<()> {
    let g = 0.1;
    let mut sim = build(compressing(at_rest(), g))?;
    assert_eq!(*sim.liouvillean(), Liouvillean::Compression { growth_rate: g });
    assert_relative_eq!(sim.cells().min_cell_dimension(), 2.0);

    // Cells of 2 outgrow a diameter of 1 * (1 + g t) at t = (2 / 1 - 1) / g.
    let first = sim.next_event_time().unwrap_or(f64::NAN);
    assert_relative_eq!(first, (2.0 - 1.0) / g, max_relative = 1e-12);
    assert_eq!(sim.step(f64::INFINITY)?, Some(EventType::NonEvent));

    // 10 / (2 * 1.0001) rounds down to 4 cells of 2.5.
    assert_relative_eq!(sim.cells().min_cell_dimension(), 2.5);
    let second = sim.next_event_time().unwrap_or(f64::NAN);
    assert_relative_eq!(second, (2.5 - 1.0) / g, max_relative = 1e-12);
    sim.advance_to(16.0)?;
    assert_relative_eq!(sim.cells().min_cell_dimension(), 10.0 / 3.0);
    assert_eq!(sim.count_of(EventType::NonEvent), 2);
    Ok(())
}

#[test]
fn resting_spheres_meet_when_grown_to_their_gap() -> Result<()> {
    let mut sim = build(compressing(at_rest(), 1.0))?;
    // Gap 4 closes when 1 + t = 4.
    while sim.count_of(EventType::Core) == 0 {
        if sim.step(f64::INFINITY)?.is_none() {
            panic!("queue exhausted before contact");
        }
    }
    assert_relative_eq!(sim.time(), 3.0, max_relative = 1e-9);
    // The growing contact pushes the pair apart.
    let v = sim.velocities();
    assert!(v[0][0] < 0.0 && v[1][0] > 0.0);
    assert_relative_eq!(v[0][0], -v[1][0], epsilon = 1e-12);
    Ok(())
}

#[test]
fn packing_fraction_grows_with_the_length_scale() -> Result<()> {
    let mut sim = build(compressing(at_rest(), 0.1))?;
    let phi0 = sim.packing_fraction();
    sim.advance_to(5.0)?;
    assert_relative_eq!(sim.packing_fraction(), phi0 * 1.5f64.powi(3), max_relative = 1e-12);
    Ok(())
}

#[test]
fn cubes_cannot_be_compressed() -> Result<()> {
    let mut v = compressing(at_rest(), 0.1);
    v["interactions"] = json!([{"name": "c", "type": "parallel_cubes", "width": 1.0}]);
    let err = build(v).map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
    Ok(())
}

#[test]
fn rebuild_needs_compression_dynamics() -> Result<()> {
    let mut v = compressing(at_rest(), 0.1);
    v["dynamics"] = json!({"type": "newtonian"});
    assert!(matches!(build(v), Err(Error::Config(_))));
    Ok(())
}
