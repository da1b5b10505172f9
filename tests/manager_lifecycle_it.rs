// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime, macros::datetime};
// self
use adgrant::{
	auth::{ConnectionId, CustomerId, ScopeSet, Secret},
	cipher::TokenCipher,
	clock::ManualClock,
	config::Config,
	connection::{Connection, ConnectionFilter, OwnerRef, Provider},
	error::{ConfigError, Error, TerminalError, TransientError},
	manager::{AccessOutcome, ConnectionManager, NewConnection},
	provider::{
		FailureClass, ProviderAdapter, ProviderDescriptor, ProviderFuture, RefreshRequest,
		RefreshedTokens, google,
	},
	store::{ConnectionStore, MemoryStore},
};

const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);
const SECRET: &str = "lifecycle-secret";

#[derive(Clone, Copy, Debug)]
enum Script {
	Succeed,
	Terminal,
	Transient,
}

/// Provider stand-in that counts calls and answers according to a script.
struct CountingAdapter {
	descriptor: ProviderDescriptor,
	calls: AtomicUsize,
	script: Mutex<Script>,
	delay: std::time::Duration,
}
impl CountingAdapter {
	fn new(script: Script) -> Arc<Self> {
		Arc::new(Self {
			descriptor: google::descriptor(Provider::GoogleAnalytics)
				.expect("Google descriptor should build."),
			calls: AtomicUsize::new(0),
			script: Mutex::new(script),
			delay: std::time::Duration::from_millis(50),
		})
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn set_script(&self, script: Script) {
		*self.script.lock() = script;
	}
}
impl ProviderAdapter for CountingAdapter {
	fn provider(&self) -> Provider {
		Provider::GoogleAnalytics
	}

	fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	fn client_id(&self) -> Result<&str, ConfigError> {
		Ok("counting-client")
	}

	fn default_scopes(&self) -> &'static [&'static str] {
		&["https://www.googleapis.com/auth/analytics.readonly"]
	}

	fn refresh(&self, request: RefreshRequest) -> ProviderFuture<'_, RefreshedTokens> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			let script = *self.script.lock();

			tokio::time::sleep(self.delay).await;

			assert!(request.credential.expose().starts_with("1//"));

			match script {
				Script::Succeed => Ok(RefreshedTokens {
					access_token: Secret::new(format!("ya29.refreshed-{call}")),
					refresh_token: None,
					expires_in: Some(3600),
					scopes: None,
				}),
				Script::Terminal => Err(TerminalError::invalid_grant("Token has been revoked").into()),
				Script::Transient =>
					Err(TransientError::new(FailureClass::Network, "connection reset").into()),
			}
		})
	}
}

fn owner() -> OwnerRef {
	OwnerRef {
		customer: CustomerId::new("acme").expect("Customer fixture should be valid."),
		operator: None,
	}
}

fn id(value: &str) -> ConnectionId {
	ConnectionId::new(value).expect("Connection fixture should be valid.")
}

fn build_manager(
	secret: &str,
	store: Arc<MemoryStore>,
	adapter: Arc<CountingAdapter>,
) -> ConnectionManager {
	ConnectionManager::builder(Config::new(secret).expect("Config should build."), store)
		.with_clock(Arc::new(ManualClock::new(NOW)))
		.with_adapter(adapter)
		.build()
		.expect("Manager should build.")
}

async fn register(manager: &ConnectionManager, conn: &ConnectionId, expires_in: i64) {
	manager
		.register(
			NewConnection::new(owner(), Provider::GoogleAnalytics, "ya29.initial")
				.with_id(conn.clone())
				.with_refresh_token("1//refresh")
				.with_account_email("owner@example.com")
				.with_expires_in(expires_in),
		)
		.await
		.expect("Registration should succeed.");
}

async fn stored(store: &MemoryStore, conn: &ConnectionId) -> Connection {
	store
		.fetch(conn)
		.await
		.expect("Store fetch should succeed.")
		.expect("Connection should exist.")
}

fn token(outcome: &AccessOutcome) -> &str {
	match outcome {
		AccessOutcome::Valid { access_token, .. } => access_token.expose(),
		other => panic!("Expected a valid token, got {other:?}."),
	}
}

#[tokio::test]
async fn fresh_connection_is_served_without_refresh() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = build_manager(SECRET, store, adapter.clone());
	let conn = id("conn-fresh");

	register(&manager, &conn, 3600).await;

	let first = manager.get_valid_access_token(&conn).await.expect("First call should succeed.");
	let second = manager.get_valid_access_token(&conn).await.expect("Second call should succeed.");

	assert_eq!(token(&first), "ya29.initial");
	assert_eq!(token(&second), "ya29.initial");
	assert_eq!(adapter.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stale_callers_share_one_refresh() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = Arc::new(build_manager(SECRET, store.clone(), adapter.clone()));
	let conn = id("conn-singleflight");

	register(&manager, &conn, 60).await;

	let handles = (0..8)
		.map(|_| {
			let manager = manager.clone();
			let conn = conn.clone();

			tokio::spawn(async move { manager.get_valid_access_token(&conn).await })
		})
		.collect::<Vec<_>>();
	let mut tokens = Vec::new();

	for handle in handles {
		let outcome = handle
			.await
			.expect("Task should not panic.")
			.expect("Every caller should receive a token.");

		tokens.push(token(&outcome).to_owned());
	}

	assert_eq!(adapter.calls(), 1);
	assert!(tokens.iter().all(|t| t == "ya29.refreshed-1"), "Tokens differ: {tokens:?}.");
	assert_eq!(manager.refresh_metrics().attempts(), 1);
	assert_eq!(manager.refresh_metrics().successes(), 1);

	let record = stored(&store, &conn).await;

	assert_eq!(record.expires_at, Some(NOW + Duration::hours(1)));
	assert_eq!(record.failure_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_transient_failure() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Transient);
	let manager = Arc::new(build_manager(SECRET, store.clone(), adapter.clone()));
	let conn = id("conn-outage");

	register(&manager, &conn, 60).await;

	let handles = (0..5)
		.map(|_| {
			let manager = manager.clone();
			let conn = conn.clone();

			tokio::spawn(async move { manager.get_valid_access_token(&conn).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let err = handle
			.await
			.expect("Task should not panic.")
			.expect_err("Every caller should see the outage.");

		match err {
			Error::Transient(e) => assert_eq!(e.class, FailureClass::Network),
			other => panic!("Expected a transient error, got {other:?}."),
		}
	}

	assert_eq!(adapter.calls(), 1);
	assert_eq!(manager.refresh_metrics().attempts(), 1);
	assert_eq!(manager.refresh_metrics().shared_failures(), 4);

	let record = stored(&store, &conn).await;

	assert_eq!(record.failure_count, 1);
	assert!(manager.should_retry(&record));
}

#[tokio::test]
async fn oversized_lifetimes_are_clamped() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = build_manager(SECRET, store, adapter);
	let conn = id("conn-long-lived");

	register(&manager, &conn, i64::MAX).await;

	assert_eq!(
		manager.connection(&conn).await.expect("Connection should exist.").expires_at,
		Some(NOW + Duration::days(365))
	);

	let applied = manager
		.apply_fresh_tokens(&conn, &Secret::new("ya29.callback"), None, Some(i64::MAX))
		.await
		.expect("Applying fresh tokens should succeed.");

	assert_eq!(applied.expires_at, Some(NOW + Duration::days(365)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_refresh_rotates_a_valid_token_once() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = Arc::new(build_manager(SECRET, store.clone(), adapter.clone()));
	let conn = id("conn-forced");

	register(&manager, &conn, 3600).await;

	let handles = (0..4)
		.map(|_| {
			let manager = manager.clone();
			let conn = conn.clone();

			tokio::spawn(async move { manager.force_refresh(&conn).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let outcome = handle
			.await
			.expect("Task should not panic.")
			.expect("Forced refresh should succeed.");

		assert_eq!(token(&outcome), "ya29.refreshed-1");
	}

	assert_eq!(adapter.calls(), 1);
	assert_eq!(stored(&store, &conn).await.rotated_at, Some(NOW));

	let again = manager.force_refresh(&conn).await.expect("A later forced refresh should run.");

	assert_eq!(token(&again), "ya29.refreshed-2");
	assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn forced_refresh_honors_needs_reauth() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Terminal);
	let manager = build_manager(SECRET, store, adapter.clone());
	let conn = id("conn-forced-sticky");

	register(&manager, &conn, 3600).await;

	let outcome = manager.force_refresh(&conn).await.expect("Escalation is not an error.");

	assert!(outcome.requires_reauth());
	assert_eq!(adapter.calls(), 1);

	adapter.set_script(Script::Succeed);

	let again = manager.force_refresh(&conn).await.expect("Escalation is not an error.");

	assert!(again.requires_reauth());
	assert_eq!(adapter.calls(), 1, "needs_reauth must block forced refreshes too.");
}

#[tokio::test]
async fn missing_scopes_compare_against_the_full_provider_list() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = build_manager(SECRET, store, adapter);
	let narrow = id("conn-narrow");
	let full = id("conn-full");

	register(&manager, &narrow, 3600).await;
	manager
		.register(
			NewConnection::new(owner(), Provider::GoogleAnalytics, "ya29.initial")
				.with_id(full.clone())
				.with_refresh_token("1//refresh")
				.with_scopes(
					ScopeSet::new(["https://www.googleapis.com/auth/analytics.readonly", "openid"])
						.expect("Scope fixture should be valid."),
				)
				.with_expires_in(3600),
		)
		.await
		.expect("Registration should succeed.");

	assert_eq!(
		manager.missing_scopes(&narrow).await.expect("Scope check should succeed."),
		vec!["https://www.googleapis.com/auth/analytics.readonly"]
	);
	assert!(manager.missing_scopes(&full).await.expect("Scope check should succeed.").is_empty());
}

#[tokio::test]
async fn terminal_failure_is_sticky_until_fresh_tokens_arrive() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Terminal);
	let manager = build_manager(SECRET, store.clone(), adapter.clone());
	let conn = id("conn-sticky");

	register(&manager, &conn, 60).await;

	let outcome = manager.get_valid_access_token(&conn).await.expect("Escalation is not an error.");

	match &outcome {
		AccessOutcome::RequiresReauth { url, reason } => {
			assert_eq!(reason, "token_refresh_failed: invalid_grant");

			let state = url
				.query_pairs()
				.find(|(k, _)| k == "state")
				.map(|(_, v)| v.into_owned())
				.expect("State parameter should be present.");

			assert_eq!(manager.verify_reauth_state(&state), Ok(conn.clone()));
		},
		other => panic!("Expected a re-authorization URL, got {other:?}."),
	}

	adapter.set_script(Script::Succeed);

	let again = manager.get_valid_access_token(&conn).await.expect("Escalation is not an error.");

	assert!(again.requires_reauth());
	assert_eq!(adapter.calls(), 1, "needs_reauth must block automatic refresh.");

	let applied = manager
		.apply_fresh_tokens(&conn, &Secret::new("ya29.callback"), Some(&Secret::new("1//new")), None)
		.await
		.expect("Applying fresh tokens should succeed.");

	assert!(!applied.needs_reauth);
	assert_eq!(applied.failure_count, 0);
	assert_eq!(applied.expires_at, Some(NOW + Duration::hours(1)));

	let outcome = manager.get_valid_access_token(&conn).await.expect("Token should be valid.");

	assert_eq!(token(&outcome), "ya29.callback");
	assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn foreign_key_ciphertext_requires_reauth() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let writer = build_manager("first-secret", store.clone(), adapter.clone());
	let reader = build_manager("second-secret", store.clone(), adapter.clone());
	let conn = id("conn-foreign");

	register(&writer, &conn, 3600).await;

	let outcome = reader.get_valid_access_token(&conn).await.expect("Escalation is not an error.");

	match outcome {
		AccessOutcome::RequiresReauth { reason, .. } => assert_eq!(reason, "decryption_failed"),
		other => panic!("Expected a re-authorization URL, got {other:?}."),
	}

	let record = stored(&store, &conn).await;

	assert!(record.needs_reauth);
	assert_eq!(record.failure_reason.as_deref(), Some("decryption_failed"));
	assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn transient_failures_accumulate_until_the_retry_ceiling() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Transient);
	let manager = build_manager(SECRET, store.clone(), adapter.clone());
	let conn = id("conn-transient");

	register(&manager, &conn, 60).await;

	for attempt in 1..=3 {
		let err = manager
			.get_valid_access_token(&conn)
			.await
			.expect_err("Transient failures should surface.");

		assert!(err.is_transient(), "Unexpected error: {err:?}.");

		let record = stored(&store, &conn).await;

		assert_eq!(record.failure_count, attempt);
		assert!(!record.needs_reauth);
		assert_eq!(record.last_failure_at, Some(NOW));
	}

	let record = stored(&store, &conn).await;

	assert!(!manager.should_retry(&record));

	adapter.set_script(Script::Succeed);

	let outcome = manager.get_valid_access_token(&conn).await.expect("Refresh should recover.");

	assert_eq!(token(&outcome), "ya29.refreshed-4");

	let record = stored(&store, &conn).await;

	assert_eq!(record.failure_count, 0);
	assert!(record.failure_reason.is_none());
	assert!(manager.should_retry(&record));
}

#[tokio::test]
async fn absent_expiry_counts_as_stale() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = build_manager(SECRET, store.clone(), adapter.clone());
	let cipher =
		TokenCipher::from_secret(&Secret::new(SECRET)).expect("Cipher should derive a key.");
	let conn = id("conn-no-expiry");
	let mut record = Connection::new(conn.clone(), owner(), Provider::GoogleAnalytics, NOW);

	record.access_token_enc = cipher.encrypt(Some("ya29.unknown-expiry")).expect("Seal should work.");
	record.refresh_token_enc = cipher.encrypt(Some("1//refresh")).expect("Seal should work.");

	store.save(record).await.expect("Seeding should succeed.");

	let outcome = manager.get_valid_access_token(&conn).await.expect("Refresh should succeed.");

	assert_eq!(token(&outcome), "ya29.refreshed-1");
	assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn bookkeeping_selection_and_revocation() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = build_manager(SECRET, store.clone(), adapter);
	let healthy = id("conn-healthy");
	let failing = id("conn-failing");

	register(&manager, &healthy, 3600).await;
	register(&manager, &failing, 3600).await;

	let used = manager.mark_used(&healthy).await.expect("mark_used should succeed.");

	assert_eq!(used.last_used_at, Some(NOW));

	let recorded = manager
		.record_external_failure(&failing, "ga4_api_error: 403")
		.await
		.expect("Recording should succeed.");

	assert_eq!(recorded.failure_count, 1);
	assert!(!recorded.needs_reauth);

	let listed = manager
		.failing_connections(&ConnectionFilter::for_customer(owner().customer))
		.await
		.expect("Listing should succeed.");

	assert_eq!(listed.iter().map(|c| c.id.clone()).collect::<Vec<_>>(), vec![failing.clone()]);

	let url = manager.reauth_url(&failing).await.expect("URL should build.");

	assert!(url.as_str().contains("access_type=offline"));
	assert_eq!(stored(&store, &failing).await.failure_count, 1, "Building a URL never writes.");

	manager.revoke(&failing).await.expect("Revocation should succeed.");
	manager.revoke(&failing).await.expect("Revocation should be idempotent.");

	assert!(matches!(
		manager.get_valid_access_token(&failing).await,
		Err(Error::Revoked { .. })
	));
	assert!(matches!(manager.mark_used(&failing).await, Err(Error::Revoked { .. })));

	let reregistered = manager
		.register(
			NewConnection::new(owner(), Provider::GoogleAnalytics, "ya29.again")
				.with_id(failing.clone())
				.with_refresh_token("1//refresh")
				.with_expires_in(3600),
		)
		.await;

	assert!(matches!(reregistered, Err(Error::Revoked { .. })));
	assert!(stored(&store, &failing).await.revoked, "Revocation is terminal.");
	assert!(
		manager
			.failing_connections(&ConnectionFilter::default())
			.await
			.expect("Listing should succeed.")
			.is_empty()
	);
	assert!(matches!(
		manager.get_valid_access_token(&id("conn-unknown")).await,
		Err(Error::NotFound { .. })
	));
}

#[tokio::test]
async fn stale_connection_without_adapter_is_reported() {
	let store = Arc::new(MemoryStore::default());
	let adapter = CountingAdapter::new(Script::Succeed);
	let manager = build_manager(SECRET, store, adapter);
	let conn = id("conn-facebook");

	manager
		.register(
			NewConnection::new(owner(), Provider::Facebook, "EAAtoken")
				.with_id(conn.clone())
				.with_expires_in(60),
		)
		.await
		.expect("Registration should succeed.");

	assert!(matches!(
		manager.get_valid_access_token(&conn).await,
		Err(Error::NoAdapter { provider: Provider::Facebook })
	));
}
