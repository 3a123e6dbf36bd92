//! Error types for the simulator.
//!
//! ## Key Components
//!
//! - [`InvariantError`]: Returned when a policy's internal bookkeeping is
//!   inconsistent (segment sizes disagree with the entries they count, a list
//!   operation hits a node in the wrong link state, a victim is missing).
//!   These are logic defects; [`Policy::finished`](crate::traits::Policy::finished)
//!   turns them into a panic.
//! - [`ConfigError`]: Returned when simulator settings are malformed or out of
//!   range (e.g. zero capacity, a negative `percent-main`).
//! - [`TraceError`]: Returned when a trace event cannot be replayed (a zero
//!   weight).
//! - [`SimError`]: What [`replay`](crate::simulator::replay) returns; either a
//!   bad trace or a broken policy.
//!
//! A rejected admission is *not* an error; it is counted in
//! [`PolicyStats`](crate::metrics::PolicyStats).
//!
//! ## Example Usage
//!
//! ```
//! use evictsim::config::SimulatorSettings;
//! use evictsim::error::ConfigError;
//!
//! let mut settings = SimulatorSettings::default();
//! settings.percent_main = vec![-0.5];
//! let err: ConfigError = settings.validate().unwrap_err();
//! assert!(err.to_string().contains("percent-main"));
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal policy invariants are violated.
///
/// Produced by segment list operations, by `record` when a mutation finds the
/// structures in an impossible state, and by `check_invariants`. Carries a
/// human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

/// Returns `Err` carrying the lazily built message when `cond` is false.
#[inline]
pub(crate) fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), InvariantError> {
    if cond {
        Ok(())
    } else {
        Err(InvariantError(msg()))
    }
}

/// Subtracts `weight` from a size counter, failing instead of wrapping.
#[inline]
pub(crate) fn debit(counter: &mut u64, weight: u64, what: &str) -> Result<(), InvariantError> {
    let current = *counter;
    *counter = current
        .checked_sub(weight)
        .ok_or_else(|| InvariantError(format!("{what} underflow: {current} - {weight}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when simulator configuration parameters are invalid.
///
/// Produced by [`SimulatorSettings::validate`](crate::config::SimulatorSettings::validate)
/// and by [`PolicyBuilder::build`](crate::builder::PolicyBuilder::build).
/// Carries a human-readable description naming the offending option.
///
/// # Example
///
/// ```
/// use evictsim::config::SimulatorSettings;
///
/// let mut settings = SimulatorSettings::default();
/// settings.maximum_size = 0;
/// let err = settings.validate().unwrap_err();
/// assert!(err.to_string().contains("maximum-size"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// TraceError
// ---------------------------------------------------------------------------

/// Error returned when an access event is not a valid request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceError(String);

impl TraceError {
    /// Creates a new `TraceError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TraceError {}

// ---------------------------------------------------------------------------
// SimError
// ---------------------------------------------------------------------------

/// Error returned when a replay stops early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// The trace holds an event no policy accepts.
    Trace(TraceError),
    /// A policy's bookkeeping broke mid-replay.
    Invariant(InvariantError),
}

impl SimError {
    /// Returns the error description.
    pub fn message(&self) -> &str {
        match self {
            SimError::Trace(err) => err.message(),
            SimError::Invariant(err) => err.message(),
        }
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Trace(err) => write!(f, "bad trace: {err}"),
            SimError::Invariant(err) => write!(f, "invariant violated: {err}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Trace(err) => Some(err),
            SimError::Invariant(err) => Some(err),
        }
    }
}

impl From<TraceError> for SimError {
    fn from(err: TraceError) -> Self {
        SimError::Trace(err)
    }
}

impl From<InvariantError> for SimError {
    fn from(err: InvariantError) -> Self {
        SimError::Invariant(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- InvariantError ---------------------------------------------------

    #[test]
    fn invariant_display_shows_message() {
        let err = InvariantError::new("window size mismatch");
        assert_eq!(err.to_string(), "window size mismatch");
    }

    #[test]
    fn invariant_message_accessor() {
        let err = InvariantError::new("test");
        assert_eq!(err.message(), "test");
    }

    #[test]
    fn invariant_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<InvariantError>();
    }

    #[test]
    fn ensure_passes_and_fails() {
        assert!(ensure(true, || "unused".into()).is_ok());
        let err = ensure(false, || format!("size {} > {}", 11, 10)).unwrap_err();
        assert_eq!(err.message(), "size 11 > 10");
    }

    #[test]
    fn debit_rejects_underflow() {
        let mut counter = 10;
        debit(&mut counter, 4, "window").unwrap();
        assert_eq!(counter, 6);

        let err = debit(&mut counter, 7, "window").unwrap_err();
        assert!(err.message().contains("window underflow"));
        assert_eq!(counter, 6);
    }

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("maximum-size must be > 0");
        assert_eq!(err.to_string(), "maximum-size must be > 0");
    }

    #[test]
    fn config_clone_and_eq() {
        let a = ConfigError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }

    // -- SimError ---------------------------------------------------------

    #[test]
    fn sim_error_wraps_both_causes() {
        use std::error::Error;

        let trace: SimError = TraceError::new("key 3 has zero weight").into();
        assert_eq!(trace.to_string(), "bad trace: key 3 has zero weight");
        assert_eq!(trace.message(), "key 3 has zero weight");
        assert!(trace.source().is_some());

        let invariant: SimError = InvariantError::new("window: 10 != 20").into();
        assert!(matches!(invariant, SimError::Invariant(_)));
        assert_eq!(invariant.to_string(), "invariant violated: window: 10 != 20");
    }
}
