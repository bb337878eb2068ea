//! OAuth 1.0a request signing (HMAC-SHA1) for the search API.

use std::fmt;
use std::path::Path;

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use url::Url;

use crate::error::{AppError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Application and user keys, as stored in the credential file.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub client_key: String,
    pub client_secret: String,
    pub resource_owner_key: String,
    pub resource_owner_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_key", &self.client_key)
            .field("client_secret", &"<redacted>")
            .field("resource_owner_key", &self.resource_owner_key)
            .field("resource_owner_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Credentials(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Credentials(format!("{}: {}", path.display(), e)))
    }

    /// `Authorization` header value for a request to `url`.
    pub fn authorization_header(&self, method: &str, url: &Url) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.sign(method, url, &nonce, &timestamp)
    }

    fn sign(&self, method: &str, url: &Url, nonce: &str, timestamp: &str) -> Result<String> {
        let mut oauth_params = vec![
            ("oauth_consumer_key", self.client_key.clone()),
            ("oauth_nonce", nonce.to_string()),
            ("oauth_signature_method", "HMAC-SHA1".to_string()),
            ("oauth_timestamp", timestamp.to_string()),
            ("oauth_token", self.resource_owner_key.clone()),
            ("oauth_version", "1.0".to_string()),
        ];

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.extend(oauth_params.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let base = signature_base_string(method, url, &params);
        let key = format!(
            "{}&{}",
            encode(&self.client_secret),
            encode(&self.resource_owner_secret)
        );

        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .map_err(|e| AppError::Credentials(e.to_string()))?;
        mac.update(base.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        oauth_params.push(("oauth_signature", signature));
        oauth_params.sort_by(|a, b| a.0.cmp(b.0));

        let fields = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", fields))
    }
}

/// RFC 3986 percent-encoding: everything except `A-Z a-z 0-9 - . _ ~`.
fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn signature_base_string(method: &str, url: &Url, params: &[(String, String)]) -> String {
    let mut base_url = url.clone();
    base_url.set_query(None);
    base_url.set_fragment(None);

    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(base_url.as_str()),
        encode(&param_string)
    )
}
