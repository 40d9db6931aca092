// API client module: a small blocking client for the two VK methods that
// manage mini-app testing groups. The access token travels as a request
// parameter, not a header, as the VK API expects.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const DEFAULT_BASE_URL: &str = "https://api.vk.com";

/// API version sent with every call.
pub const API_VERSION: &str = "5.161";

/// `platform` value identifying the web-view build of a mini app.
const WEBVIEW_PLATFORM: &str = "31";

/// "User authorization failed": the token is invalid or expired.
const AUTHORIZATION_FAILED: i64 = 5;

/// Errors from the registry. `Api` carries the platform's own code.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API error {code}: {message}")]
    Api {
        code: i64,
        message: String,
        /// Set when the platform rejected the access token. The caller is
        /// expected to forget the cached token; the call is not retried.
        credential_lost: bool,
    },

    #[error("malformed API response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API response has neither `response` nor `error`")]
    EmptyResponse,
}

impl RegistryError {
    pub fn credential_lost(&self) -> bool {
        matches!(self, RegistryError::Api { credential_lost: true, .. })
    }
}

/// One testing group as the platform reports it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TestGroup {
    #[serde(default)]
    pub app_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub webview: Option<String>,
}

/// Result of creating or overwriting a testing group.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertedGroup {
    pub group_id: i64,
}

#[derive(Deserialize)]
struct Envelope {
    response: Option<Value>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// The two registry operations the pipeline needs.
pub trait GroupRegistry {
    fn list_test_groups(&self) -> Result<Vec<TestGroup>, RegistryError>;

    /// Overwrites `existing_group_id` when given, creates a group otherwise.
    fn upsert_test_group(
        &self,
        url: &str,
        name: &str,
        existing_group_id: Option<i64>,
    ) -> Result<UpsertedGroup, RegistryError>;
}

/// Blocking client for the testing-group methods of one app's token.
#[derive(Clone)]
pub struct GroupRegistryClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GroupRegistryClient {
    pub fn new(token: &str) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(concat!("mini-test-groups/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(GroupRegistryClient {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.to_string(),
        })
    }

    /// Points the client at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Form parameters for one call: version and token first, then the
    /// caller's params, which win on a key collision.
    fn form(&self, params: &[(&str, String)]) -> BTreeMap<String, String> {
        let mut form = BTreeMap::new();
        form.insert("v".to_string(), API_VERSION.to_string());
        form.insert("access_token".to_string(), self.token.clone());
        for (key, value) in params {
            form.insert((*key).to_string(), value.clone());
        }
        form
    }

    /// Invokes `method` and returns the `response` payload.
    pub fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, RegistryError> {
        let url = format!("{}/method/{}", self.base_url, method);
        tracing::debug!(method, "calling VK API");

        let res = self.client.post(&url).form(&self.form(params)).send()?;
        let status = res.status();
        let body = res.text()?;
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)?;
        if let Some(error) = envelope.error {
            let credential_lost = error.error_code == AUTHORIZATION_FAILED;
            if credential_lost {
                tracing::warn!(method, "access token rejected by VK API");
            }
            return Err(RegistryError::Api {
                code: error.error_code,
                message: error.error_msg,
                credential_lost,
            });
        }
        envelope.response.ok_or(RegistryError::EmptyResponse)
    }
}

/// Parameters of `apps.updateMetaForTestingGroup`. `group_id` is only sent
/// when updating.
fn upsert_params(url: &str, name: &str, existing_group_id: Option<i64>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("webview", url.to_string()),
        ("name", name.to_string()),
        ("platform", WEBVIEW_PLATFORM.to_string()),
    ];
    if let Some(group_id) = existing_group_id {
        params.push(("group_id", group_id.to_string()));
    }
    params
}

impl GroupRegistry for GroupRegistryClient {
    fn list_test_groups(&self) -> Result<Vec<TestGroup>, RegistryError> {
        let response = self.call("apps.getTestingGroups", &[])?;
        Ok(serde_json::from_value(response)?)
    }

    fn upsert_test_group(
        &self,
        url: &str,
        name: &str,
        existing_group_id: Option<i64>,
    ) -> Result<UpsertedGroup, RegistryError> {
        let params = upsert_params(url, name, existing_group_id);
        let response = self.call("apps.updateMetaForTestingGroup", &params)?;
        Ok(serde_json::from_value(response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> GroupRegistryClient {
        GroupRegistryClient::new("tok")
            .unwrap()
            .with_base_url(server.base_url())
    }

    #[test]
    fn lists_groups_with_version_and_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/method/apps.getTestingGroups")
                .x_www_form_urlencoded_tuple("v", API_VERSION)
                .x_www_form_urlencoded_tuple("access_token", "tok");
            then.status(200).json_body(json!({
                "response": [
                    {"app_id": 51, "name": "alice main", "group_id": 10, "webview": "https://a"},
                    {"app_id": 51, "name": "bob dev", "group_id": 11}
                ]
            }));
        });

        let groups = client(&server).list_test_groups().unwrap();
        mock.assert();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "alice main");
        assert_eq!(groups[0].group_id, Some(10));
        assert_eq!(groups[1].webview, None);
    }

    #[test]
    fn upsert_sends_group_metadata() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/method/apps.updateMetaForTestingGroup")
                .x_www_form_urlencoded_tuple("webview", "https://cdn/x/index.html")
                .x_www_form_urlencoded_tuple("name", "alice main")
                .x_www_form_urlencoded_tuple("platform", "31")
                .x_www_form_urlencoded_tuple("group_id", "10");
            then.status(200).json_body(json!({"response": {"group_id": 10}}));
        });

        let updated = client(&server)
            .upsert_test_group("https://cdn/x/index.html", "alice main", Some(10))
            .unwrap();
        mock.assert();
        assert_eq!(updated, UpsertedGroup { group_id: 10 });
    }

    #[test]
    fn create_omits_group_id() {
        let params = upsert_params("https://u", "n", None);
        assert!(params.iter().all(|(k, _)| *k != "group_id"));
        let params = upsert_params("https://u", "n", Some(3));
        assert!(params.contains(&("group_id", "3".to_string())));
    }

    #[test]
    fn caller_params_win_over_defaults() {
        let client = GroupRegistryClient::new("tok").unwrap();
        let form = client.form(&[("v", "5.0".to_string()), ("name", "x".to_string())]);
        assert_eq!(form["v"], "5.0");
        assert_eq!(form["access_token"], "tok");
        assert_eq!(form["name"], "x");
    }

    #[test]
    fn expired_token_is_flagged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/method/apps.getTestingGroups");
            then.status(200).json_body(json!({
                "error": {"error_code": 5, "error_msg": "User authorization failed: invalid access_token (4)."}
            }));
        });

        let err = client(&server).list_test_groups().unwrap_err();
        assert!(err.credential_lost());
        assert!(matches!(err, RegistryError::Api { code: 5, .. }));
    }

    #[test]
    fn other_api_errors_keep_the_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/method/apps.getTestingGroups");
            then.status(200)
                .json_body(json!({"error": {"error_code": 15, "error_msg": "Access denied"}}));
        });

        let err = client(&server).list_test_groups().unwrap_err();
        assert!(!err.credential_lost());
        assert_eq!(err.to_string(), "API error 15: Access denied");
    }

    #[test]
    fn http_failure_is_reported_with_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/method/apps.getTestingGroups");
            then.status(502).body("bad gateway");
        });

        let err = client(&server).list_test_groups().unwrap_err();
        assert!(matches!(err, RegistryError::Status { status: 502, ref body } if body == "bad gateway"));
    }

    #[test]
    fn empty_envelope_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/method/apps.getTestingGroups");
            then.status(200).json_body(json!({}));
        });

        let err = client(&server).list_test_groups().unwrap_err();
        assert!(matches!(err, RegistryError::EmptyResponse));
    }
}
