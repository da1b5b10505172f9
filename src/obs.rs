//! Optional observability helpers for connection lifecycle operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `adgrant.flow` carrying the `flow` (operation),
//!   `stage` (call site), and `connection` fields, plus the lifecycle events the manager logs.
//! - Enable `metrics` to increment `adgrant_flow_total` (labeled by `flow` + `outcome`) and
//!   `adgrant_refresh_failure_total` (labeled by `provider` + `class`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Manager operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// `get_valid_access_token`, including any refresh it triggers.
	AccessToken,
	/// `force_refresh`, rotating a token that still looks valid.
	ForceRefresh,
	/// Provider refresh performed under the connection guard.
	Refresh,
	/// Tokens supplied from outside (OAuth callback).
	ApplyTokens,
	/// Re-authorization URL construction or state verification.
	Reauth,
	/// New connection registration.
	Register,
	/// Soft delete.
	Revoke,
	/// Failure reported by a downstream API caller.
	RecordFailure,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::AccessToken => "access_token",
			FlowKind::ForceRefresh => "force_refresh",
			FlowKind::Refresh => "refresh",
			FlowKind::ApplyTokens => "apply_tokens",
			FlowKind::Reauth => "reauth",
			FlowKind::Register => "register",
			FlowKind::Revoke => "revoke",
			FlowKind::RecordFailure => "record_failure",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a manager operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Completed, but the connection must be re-authorized.
	Reauth,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Reauth => "reauth",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
