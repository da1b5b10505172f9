// self
use crate::_prelude::*;

/// Provider-specific quirks that influence requests and URL construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Character used to join scopes when constructing `scope` parameters.
	pub scope_delimiter: char,
	/// Prefix every well-formed refresh credential starts with, if the provider has one.
	pub credential_prefix: Option<String>,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self { scope_delimiter: ' ', credential_prefix: None }
	}
}
