// self
use crate::{
	connection::Provider,
	obs::{FlowKind, FlowOutcome},
	provider::FailureClass,
};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"adgrant_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Counts a classified refresh failure for `provider`.
pub fn record_refresh_failure(provider: Provider, class: FailureClass) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"adgrant_refresh_failure_total",
			"provider" => provider.as_str(),
			"class" => class.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (provider, class);
	}
}
