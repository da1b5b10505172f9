//! Injectable time source.

// self
use crate::_prelude::*;

/// Supplies the current instant to every time-dependent decision.
pub trait Clock: Send + Sync + Debug {
	/// Returns the current UTC instant.
	fn now(&self) -> OffsetDateTime;
}

/// Production clock reading the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock(RwLock<OffsetDateTime>);
impl ManualClock {
	/// Creates a clock frozen at `start`.
	pub fn new(start: OffsetDateTime) -> Self {
		Self(RwLock::new(start))
	}

	/// Moves the clock forward (or backward for negative durations).
	pub fn advance(&self, by: Duration) {
		*self.0.write() += by;
	}

	/// Jumps to an absolute instant.
	pub fn set(&self, at: OffsetDateTime) {
		*self.0.write() = at;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.read()
	}
}
