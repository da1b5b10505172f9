//! Connection manager facade wiring the cipher, store, coordinator, adapters, failure tracker,
//! and re-authorization escalator together.
//!
//! The manager owns one instance of each component. `access` implements
//! [`ConnectionManager::get_valid_access_token`] (lazy refresh under the per-connection guard);
//! `lifecycle` covers registration, external token application, bookkeeping, and selection.

mod access;
mod lifecycle;

pub use access::AccessOutcome;
pub use lifecycle::NewConnection;

// self
use crate::{
	_prelude::*,
	auth::ConnectionId,
	cipher::TokenCipher,
	clock::{Clock, SystemClock},
	config::{Config, StaleTokenPolicy},
	connection::{Connection, Provider},
	coordinator::{RefreshCoordinator, RefreshMetrics},
	error::ConfigError,
	expiry::ExpiryPolicy,
	failure::FailureTracker,
	http,
	provider::{FacebookAdapter, GoogleAdsAdapter, GoogleAnalyticsAdapter, ProviderAdapter},
	reauth::ReauthEscalator,
	store::ConnectionStore,
};

/// Keeps provider credentials usable: lazy refresh, failure bookkeeping, and escalation.
///
/// Cloning is not supported; share the manager behind an [`Arc`]. Refreshes for one connection
/// are serialized within the instance, and the record `version` guards writes across instances.
pub struct ConnectionManager {
	store: Arc<dyn ConnectionStore>,
	clock: Arc<dyn Clock>,
	cipher: TokenCipher,
	adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
	coordinator: RefreshCoordinator,
	tracker: FailureTracker,
	escalator: ReauthEscalator,
	policy: ExpiryPolicy,
	max_failures: u32,
	stale_policy: StaleTokenPolicy,
	state_max_age: Duration,
}
impl ConnectionManager {
	/// Starts a builder from `config` and `store`.
	pub fn builder(config: Config, store: Arc<dyn ConnectionStore>) -> ConnectionManagerBuilder {
		ConnectionManagerBuilder {
			config,
			store,
			clock: Arc::new(SystemClock),
			adapters: HashMap::new(),
		}
	}

	/// Builds a manager with the production adapters for every provider.
	pub fn from_config(
		config: Config,
		store: Arc<dyn ConnectionStore>,
	) -> Result<Self, ConfigError> {
		Self::builder(config, store).with_default_adapters()?.build()
	}

	/// Counters of refresh attempts, reuses, successes, and failures.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.coordinator.metrics()
	}

	/// Expiry policy applied to every connection.
	pub fn expiry_policy(&self) -> ExpiryPolicy {
		self.policy
	}

	fn adapter(&self, provider: Provider) -> Result<&Arc<dyn ProviderAdapter>> {
		self.adapters.get(&provider).ok_or(Error::NoAdapter { provider })
	}

	async fn load_active(&self, id: &ConnectionId) -> Result<Connection> {
		let connection =
			self.store.fetch(id).await?.ok_or_else(|| Error::NotFound { id: id.clone() })?;

		if connection.revoked {
			return Err(Error::Revoked { id: id.clone() });
		}

		Ok(connection)
	}
}
impl Debug for ConnectionManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionManager")
			.field("providers", &self.adapters.keys().collect::<Vec<_>>())
			.field("policy", &self.policy)
			.field("max_failures", &self.max_failures)
			.field("stale_policy", &self.stale_policy)
			.finish_non_exhaustive()
	}
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
	config: Config,
	store: Arc<dyn ConnectionStore>,
	clock: Arc<dyn Clock>,
	adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}
impl ConnectionManagerBuilder {
	/// Replaces the system clock.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Registers `adapter` for the provider it reports, replacing any previous one.
	pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
		self.adapters.insert(adapter.provider(), adapter);

		self
	}

	/// Registers the production adapters for providers that have none yet.
	///
	/// Missing client credentials do not fail here; they surface as
	/// [`ConfigError::MissingCredential`] when the provider is first used.
	pub fn with_default_adapters(mut self) -> Result<Self, ConfigError> {
		let http = http::build_client(self.config.request_timeout())?;
		let google = self.config.google_credentials();

		if !self.adapters.contains_key(&Provider::GoogleAnalytics) {
			let adapter = GoogleAnalyticsAdapter::new(google.clone(), http.clone())?;

			self.adapters.insert(Provider::GoogleAnalytics, Arc::new(adapter));
		}
		if !self.adapters.contains_key(&Provider::GoogleAds) {
			let adapter = GoogleAdsAdapter::new(
				google,
				self.config.google_ads_developer_token.clone(),
				http.clone(),
			)?;

			self.adapters.insert(Provider::GoogleAds, Arc::new(adapter));
		}
		if !self.adapters.contains_key(&Provider::Facebook) {
			let adapter = FacebookAdapter::new(
				self.config.facebook_credentials(),
				&self.config.facebook_api_version,
				http,
			)?;

			self.adapters.insert(Provider::Facebook, Arc::new(adapter));
		}

		Ok(self)
	}

	/// Derives the keys and assembles the manager.
	pub fn build(self) -> Result<ConnectionManager, ConfigError> {
		let Self { config, store, clock, adapters } = self;
		let cipher = TokenCipher::from_secret(&config.encryption_secret)?;
		let escalator =
			ReauthEscalator::new(&config.encryption_secret, config.redirect_base_url()?)?;
		let tracker = FailureTracker::new(store.clone(), clock.clone());

		Ok(ConnectionManager {
			store,
			clock,
			cipher,
			adapters,
			coordinator: RefreshCoordinator::new(),
			tracker,
			escalator,
			policy: ExpiryPolicy::new(config.refresh_buffer()),
			max_failures: config.max_failures,
			stale_policy: config.stale_token_policy,
			state_max_age: config.reauth_state_max_age(),
		})
	}
}
impl Debug for ConnectionManagerBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionManagerBuilder")
			.field("providers", &self.adapters.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}
