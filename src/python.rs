use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::WorldConfig;
use crate::core::particle::DIM;
use crate::core::vector::Vector;
use crate::core::Simulation;

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn to_array(py: Python<'_>, rows: &[Vector]) -> Py<PyArray2<f64>> {
    let mut arr = Array2::<f64>::zeros((rows.len(), DIM));
    for (i, row) in rows.iter().enumerate() {
        for k in 0..DIM {
            arr[[i, k]] = row[k];
        }
    }
    arr.into_pyarray(py).to_owned().into()
}

/// Python-facing wrapper around [`Simulation`].
///
/// Worlds are described by the same JSON document the CLI reads.
#[pyclass]
pub struct EdmdSim {
    sim: Simulation,
}

#[pymethods]
impl EdmdSim {
    /// Build a simulation from a JSON world description.
    ///
    /// Errors: raises ValueError on malformed JSON or an inconsistent world.
    #[staticmethod]
    fn from_json(text: &str) -> PyResult<Self> {
        let cfg = WorldConfig::from_json_str(text).map_err(py_err)?;
        let sim = cfg.into_simulation().map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Load a JSON world description from a file.
    #[staticmethod]
    fn from_file(path: &str) -> PyResult<Self> {
        let cfg = WorldConfig::from_path(path).map_err(py_err)?;
        let sim = cfg.into_simulation().map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Advance to an absolute time (releases the GIL while running).
    fn advance_to(&mut self, py: Python<'_>, target_time: f64) -> PyResult<u64> {
        py.detach(|| self.sim.advance_to(target_time))
            .map(|s| s.events)
            .map_err(py_err)
    }

    /// Execute `n` events; returns how many actually ran.
    fn run_events(&mut self, py: Python<'_>, n: u64) -> PyResult<u64> {
        py.detach(|| self.sim.run_events(n))
            .map(|s| s.events)
            .map_err(py_err)
    }

    /// Positions at the current time, wrapped into the box, shape (N, 3).
    fn get_positions(&self, py: Python<'_>) -> Py<PyArray2<f64>> {
        to_array(py, &self.sim.positions())
    }

    /// Velocities, shape (N, 3).
    fn get_velocities(&self, py: Python<'_>) -> Py<PyArray2<f64>> {
        to_array(py, &self.sim.velocities())
    }

    #[getter]
    fn time(&self) -> f64 {
        self.sim.time()
    }

    #[getter]
    fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    fn kinetic_energy(&self) -> f64 {
        self.sim.kinetic_energy()
    }

    fn internal_energy(&self) -> f64 {
        self.sim.internal_energy()
    }

    fn momentum(&self) -> (f64, f64, f64) {
        let p = self.sim.momentum();
        (p[0], p[1], p[2])
    }

    fn packing_fraction(&self) -> f64 {
        self.sim.packing_fraction()
    }

    /// Shift every finite-mass particle so the centre-of-mass velocity is zero.
    fn zero_momentum(&mut self) -> PyResult<()> {
        self.sim.set_com_velocity([0.0; DIM]).map_err(py_err)
    }

    /// Executed events per type, keyed by snake_case name.
    fn event_counts<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let out = PyDict::new(py);
        for (ty, n) in self.sim.event_counts() {
            let key = serde_json::to_value(ty)
                .map_err(py_err)?
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{ty:?}"));
            out.set_item(key, n)?;
        }
        Ok(out)
    }
}

/// The edmd Python module entry point.
#[pymodule]
fn edmd(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EdmdSim>()?;
    Ok(())
}
