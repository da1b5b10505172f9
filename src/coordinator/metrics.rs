// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for refresh coordination.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	reuses: AtomicU64,
	shared_failures: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the number of times a refresh closure actually ran.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of waiters that found the record already refreshed.
	pub fn reuses(&self) -> u64 {
		self.reuses.load(Ordering::Relaxed)
	}

	/// Returns the number of waiters that found a failure recorded by the previous holder.
	pub fn shared_failures(&self) -> u64 {
		self.shared_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh closures that completed successfully.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh closures that failed.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_reuse(&self) {
		self.reuses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_shared_failure(&self) {
		self.shared_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}
