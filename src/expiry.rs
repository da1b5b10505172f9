//! Usability predicate applied before handing out an access token.

// self
use crate::_prelude::*;

/// Safety margin used when no override is configured.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);
/// Lifetime assumed when a provider omits `expires_in` or returns a non-positive value.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);
/// Longest lifetime accepted from a provider or caller; larger `expires_in` values are clamped.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::days(365);

/// Returns `true` when `expires_at` lies more than `buffer` past `now`.
///
/// An absent expiry is never usable.
pub fn is_usable(expires_at: Option<OffsetDateTime>, now: OffsetDateTime, buffer: Duration) -> bool {
	match expires_at {
		Some(at) => at - now > buffer,
		None => false,
	}
}

/// Converts a provider `expires_in` (seconds) into a lifetime, falling back to one hour.
///
/// The result never exceeds [`MAX_TOKEN_LIFETIME`], so adding it to a current instant stays
/// within the representable range.
pub fn lifetime_from_secs(expires_in: Option<i64>) -> Duration {
	match expires_in {
		Some(secs) if secs > 0 =>
			Duration::seconds(secs.min(MAX_TOKEN_LIFETIME.whole_seconds())),
		_ => DEFAULT_TOKEN_LIFETIME,
	}
}

/// Expiry rule with a fixed refresh buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryPolicy {
	buffer: Duration,
}
impl ExpiryPolicy {
	/// Creates a policy; negative buffers clamp to zero.
	pub fn new(buffer: Duration) -> Self {
		Self { buffer: buffer.max(Duration::ZERO) }
	}

	/// Configured buffer.
	pub fn buffer(&self) -> Duration {
		self.buffer
	}

	/// Applies [`is_usable`] with this policy's buffer.
	pub fn is_usable(&self, expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
		is_usable(expires_at, now, self.buffer)
	}
}
impl Default for ExpiryPolicy {
	fn default() -> Self {
		Self::new(DEFAULT_REFRESH_BUFFER)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

	#[test]
	fn buffer_boundary_is_exclusive() {
		let policy = ExpiryPolicy::default();

		assert!(policy.is_usable(Some(NOW + Duration::minutes(10)), NOW));
		assert!(!policy.is_usable(Some(NOW + Duration::minutes(5)), NOW));
		assert!(!policy.is_usable(Some(NOW + Duration::minutes(4)), NOW));
		assert!(!policy.is_usable(Some(NOW - Duration::hours(1)), NOW));
	}

	#[test]
	fn absent_expiry_is_never_usable() {
		assert!(!is_usable(None, NOW, Duration::ZERO));
		assert!(!ExpiryPolicy::new(Duration::ZERO).is_usable(None, NOW));
	}

	#[test]
	fn negative_buffer_clamps_and_lifetime_defaults() {
		assert_eq!(ExpiryPolicy::new(Duration::seconds(-30)).buffer(), Duration::ZERO);
		assert_eq!(lifetime_from_secs(Some(5_184_000)), Duration::days(60));
		assert_eq!(lifetime_from_secs(Some(0)), DEFAULT_TOKEN_LIFETIME);
		assert_eq!(lifetime_from_secs(None), DEFAULT_TOKEN_LIFETIME);
	}

	#[test]
	fn oversized_lifetimes_clamp_to_a_year() {
		assert_eq!(lifetime_from_secs(Some(i64::MAX)), MAX_TOKEN_LIFETIME);
		assert_eq!(lifetime_from_secs(Some(31_536_001)), MAX_TOKEN_LIFETIME);
		assert_eq!(lifetime_from_secs(Some(31_536_000)), Duration::days(365));
		assert_eq!(NOW + lifetime_from_secs(Some(i64::MAX)), NOW + Duration::days(365));
	}
}
