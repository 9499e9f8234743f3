//! Backend activation configuration for the widget
//!
//! On page load the widget asks its backend which host-page elements
//! activate a call and with what agent settings. The response also carries
//! the public key needed to construct the voice transport client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Production backend used when no better origin can be derived.
pub const PRODUCTION_BASE_URL: &str = "https://app.novavoice.app";

/// Path of the settings endpoint, relative to the resolved base URL.
pub const SETTINGS_PATH: &str = "/api/widget/settings";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Settings endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-activation-key agent settings returned by the backend.
///
/// The typed fields drive the overlay UI; everything else in the object
/// (voice id, prompt overrides, ...) is kept as an opaque payload and
/// handed to the transport untouched when the session starts.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentSettings {
    /// Display name shown in the call overlay.
    pub character: String,
    #[serde(default)]
    pub character_image: Option<String>,
    #[serde(default)]
    pub booking_url: Option<String>,
    /// Contact fields the overlay form should present, in display order.
    #[serde(default)]
    pub user_collection_fields: Vec<String>,
    /// Opaque remainder of the agent object, used as the session-init payload.
    #[serde(flatten)]
    pub assistant: serde_json::Map<String, serde_json::Value>,
}

impl AgentSettings {
    /// The opaque session-init payload passed to the transport's start call.
    pub fn assistant_payload(&self) -> serde_json::Value {
        serde_json::Value::Object(self.assistant.clone())
    }
}

/// Full settings response: activation map plus the transport credential.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WidgetSettings {
    #[serde(default)]
    pub agents: HashMap<String, AgentSettings>,
    #[serde(rename = "publicKey", default)]
    pub public_key: String,
}

/// Work out which backend origin to talk to.
///
/// Same-origin when the host page is on localhost (local development),
/// otherwise the origin the widget script itself was loaded from,
/// otherwise the production fallback.
pub fn resolve_base_url(
    override_url: Option<&str>,
    page_origin: &str,
    script_origin: Option<&str>,
) -> String {
    if let Some(url) = override_url {
        return url.trim_end_matches('/').to_string();
    }

    let is_localhost = page_origin.contains("//localhost") || page_origin.contains("//127.0.0.1");
    if is_localhost {
        return page_origin.trim_end_matches('/').to_string();
    }

    if let Some(origin) = script_origin {
        return origin.trim_end_matches('/').to_string();
    }

    PRODUCTION_BASE_URL.to_string()
}

/// Client for the settings endpoint.
pub struct SettingsClient {
    client: reqwest::Client,
    base_url: String,
}

impl SettingsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the activation configuration for the given page path.
    ///
    /// The backend keys its response off the requesting origin; the page
    /// path narrows it to the agents configured for that page.
    pub async fn fetch(&self, page_path: &str) -> Result<WidgetSettings, SettingsError> {
        let url = format!("{}{}", self.base_url, SETTINGS_PATH);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "page_path": page_path }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SettingsError::Status(response.status()));
        }

        let body = response.text().await?;
        let settings = serde_json::from_str::<WidgetSettings>(&body)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_base_url_override_wins() {
        let url = resolve_base_url(
            Some("https://staging.example.com/"),
            "https://customer.example",
            Some("https://cdn.example"),
        );
        assert_eq!(url, "https://staging.example.com");
    }

    #[test]
    fn test_resolve_base_url_localhost_is_same_origin() {
        let url = resolve_base_url(None, "http://localhost:3000", Some("https://cdn.example"));
        assert_eq!(url, "http://localhost:3000");
    }

    #[test]
    fn test_resolve_base_url_falls_back_to_script_then_production() {
        let url = resolve_base_url(None, "https://customer.example", Some("https://cdn.example"));
        assert_eq!(url, "https://cdn.example");

        let url = resolve_base_url(None, "https://customer.example", None);
        assert_eq!(url, PRODUCTION_BASE_URL);
    }

    #[test]
    fn test_settings_response_decodes() {
        let json = r#"{
            "agents": {
                "agent-button": {
                    "character": "Ava",
                    "character_image": "https://cdn.example/ava.png",
                    "booking_url": null,
                    "voice_id": "en-GB-1",
                    "user_collection_fields": ["email_address", "telephone"]
                }
            },
            "publicKey": "pk_test_123"
        }"#;

        let settings: WidgetSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.public_key, "pk_test_123");

        let agent = settings.agents.get("agent-button").unwrap();
        assert_eq!(agent.character, "Ava");
        assert_eq!(
            agent.user_collection_fields,
            vec!["email_address", "telephone"]
        );
        assert_eq!(agent.assistant_payload()["voice_id"], "en-GB-1");
    }
}
