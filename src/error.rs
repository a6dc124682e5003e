use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the simulation engine.
///
/// Recoverable numerical edge cases (a negative discriminant, a pair that never
/// separates) are not errors: the root kernels report them as "no event".
/// `Invariant` is reserved for states the engine must never reach; a run that
/// hits one is aborted.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Numerical or geometric issue (e.g., degenerate contact normal).
    #[error("numerical error: {0}")]
    MathError(String),

    /// Inconsistent world description.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Fatal invariant violation, carrying the simulation time and the
    /// particles involved.
    #[error("invariant violated at t={time}, particles {particles:?}: {message}")]
    Invariant {
        time: f64,
        particles: Vec<usize>,
        message: String,
    },

    /// Propagated I/O errors (snapshot and trajectory output).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration or snapshot (de)serialisation failures.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for building an [`Error::Invariant`].
    pub fn invariant(time: f64, particles: &[usize], message: impl Into<String>) -> Self {
        Error::Invariant {
            time,
            particles: particles.to_vec(),
            message: message.into(),
        }
    }

    /// True for errors that must abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Invariant { .. } | Error::MathError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidParam("diameter must be > 0".to_string());
        let msg = format!("{e}");
        assert!(msg.contains("invalid parameter"));
        assert!(msg.contains("diameter"));
    }

    #[test]
    fn invariant_names_time_and_particles() {
        let e = Error::invariant(1.25, &[3, 7], "NaN impulse");
        let msg = e.to_string();
        assert!(msg.contains("t=1.25"));
        assert!(msg.contains("[3, 7]"));
        assert!(msg.contains("NaN impulse"));
        assert!(e.is_fatal());
        assert!(!Error::Config("x".into()).is_fatal());
    }
}
