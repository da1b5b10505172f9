// self
use adgrant::reqwest::Client as ReqwestClient;

/// Builds a reqwest client that accepts the self-signed certificates `httpmock` serves.
pub fn test_reqwest_client() -> ReqwestClient {
	ReqwestClient::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.")
}
