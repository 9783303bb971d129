use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, error};

use super::{TranslationBackend, common::{Translation, TranslationRequest}};
use crate::config::{CloudCredentials, ConfigSnapshot};
use crate::error::{BackendError, Result};
use crate::language::{cloud_source_code, cloud_target_code};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Salt values drawn for each signed request.
pub const SALT_RANGE: Range<u32> = 32768..65536;

/// Baidu's "success" code, sometimes present on good responses.
const VENDOR_SUCCESS_CODE: &str = "52000";

#[derive(Debug, Deserialize)]
struct BaiduResponse {
    from: Option<String>,
    trans_result: Option<Vec<BaiduTranslation>>,
    error_code: Option<Value>,
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BaiduTranslation {
    #[serde(default)]
    dst: String,
}

/// Translation through the Baidu general translation API.
pub struct CloudBackend {
    client: Client,
}

impl CloudBackend {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// Backend using a caller-built client (proxies, TLS roots, timeouts).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TranslationBackend for CloudBackend {
    async fn execute(
        &self,
        request: &TranslationRequest,
        config: &ConfigSnapshot,
    ) -> std::result::Result<Translation, BackendError> {
        let settings = config.cloud_settings()?;
        let credentials = settings
            .credentials()
            .ok_or(BackendError::MissingCredentials)?;
        let endpoint = settings.endpoint();

        let from = cloud_source_code(&request.source_lang);
        let to = cloud_target_code(&request.target_lang);
        let salt = rand::thread_rng().gen_range(SALT_RANGE).to_string();
        let sign = sign_request(&credentials, &request.text, &salt);

        let form = [
            ("appid", credentials.app_id.as_str()),
            ("q", request.text.as_str()),
            ("from", from),
            ("to", to),
            ("salt", salt.as_str()),
            ("sign", sign.as_str()),
        ];

        debug!("Sending Baidu translation request to {} ({} -> {})", endpoint, from, to);

        let response = self
            .client
            .post(&endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport(format!("HTTP {}: {}", status, error_text)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        parse_response(body, &request.source_lang)
    }
}

/// MD5 hex of appid + text + salt + appkey, as the vendor requires.
pub fn sign_request(credentials: &CloudCredentials, text: &str, salt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(credentials.app_id.as_bytes());
    hasher.update(text.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(credentials.app_key.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_response(body: Value, declared_source: &str) -> std::result::Result<Translation, BackendError> {
    let response: BaiduResponse = serde_json::from_value(body)
        .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

    if let Some(code) = response.error_code {
        let code = match code {
            Value::String(s) => s,
            other => other.to_string(),
        };
        if code != VENDOR_SUCCESS_CODE {
            let message = response
                .error_msg
                .unwrap_or_else(|| format!("error code {}", code));
            error!("Baidu translation API error {}: {}", code, message);
            return Err(BackendError::VendorError { code, message });
        }
    }

    let first = response
        .trans_result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| BackendError::MalformedResponse("response has no trans_result".to_string()))?;

    Ok(Translation {
        text: first.dst,
        source_lang: response.from.unwrap_or_else(|| declared_source.to_string()),
    })
}
