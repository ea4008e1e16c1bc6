use core::fmt;

/// The specific condition that caused an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// `alpha <= 0`, or the scaling parameters leave `(N+kappa) <= 0` or
    /// `(N+lambda) <= 0`, or a declared dimension (`n_pars`, `n_outputs`)
    /// is negative, or `n_obs > n_states`.
    InvalidUkfParameter,
    /// The mean/parameter slices or the square-root factor handed to the
    /// sigma-point generator do not match the filter's declared dimensions.
    DimensionMismatch,
    /// A Cholesky-style rank-1 downdate produced a negative squared
    /// diagonal entry; the value was clamped to zero and the step
    /// continued.
    NonPositiveDefinite,
    /// The simulator pool reported that task `.0` failed.
    SimulationFailure(usize),
    /// No measurement was supplied for a step and the model had none
    /// recorded for the requested time either.
    MissingMeasurement,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidUkfParameter => {
                write!(f, "invalid UKF parameter (alpha, kappa or a declared dimension)")
            }
            ErrorKind::DimensionMismatch => {
                write!(f, "sigma-point inputs do not match the filter's declared dimensions")
            }
            ErrorKind::NonPositiveDefinite => {
                write!(f, "cholesky downdate produced a non-positive-definite factor")
            }
            ErrorKind::SimulationFailure(i) => {
                write!(f, "simulator pool task {} failed", i)
            }
            ErrorKind::MissingMeasurement => {
                write!(f, "no measurement available for the requested time")
            }
        }
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// The underlying [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
