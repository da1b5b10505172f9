//! Provider descriptor data structures shared by all adapters.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use quirks::*;

// self
use crate::{_prelude::*, connection::Provider};

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint users are sent to during re-authorization.
	pub authorization: Url,
	/// Token endpoint used for refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by adapters and the re-authorization escalator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Provider described.
	pub provider: Provider,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided provider.
	pub fn builder(provider: Provider) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(provider)
	}

	/// Returns a copy pointing both endpoints at `base` (same paths), for staging or mocks.
	pub fn rebased(&self, base: &Url) -> Result<Self, ProviderDescriptorError> {
		let rebase = |url: &Url| {
			base.join(url.path()).map_err(|_| ProviderDescriptorError::InsecureEndpoint {
				endpoint: "base",
				url: base.to_string(),
			})
		};

		Self::builder(self.provider)
			.authorization_endpoint(rebase(&self.endpoints.authorization)?)
			.token_endpoint(rebase(&self.endpoints.token)?)
			.quirks(self.quirks.clone())
			.build()
	}
}
