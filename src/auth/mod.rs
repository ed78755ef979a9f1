//! OAuth2 token management.
//!
//! The core only ever sees the `TokenProvider` trait. The real provider
//! reads the persisted token set, refreshes it through the marketplace's
//! token endpoint when expiry is near, and writes the rotated set back.
//! The interactive authorization-code bootstrap lives in [`bootstrap`] and
//! is never called by automated runs — they fail with an auth error until
//! the bootstrap has been run once by a human.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::InvestError;

/// Refresh when the token expires within this window.
const REFRESH_WINDOW_SECS: i64 = 2 * 24 * 3600;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Supplies the bearer token for marketplace requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<SecretString, InvestError>;
}

/// Fixed-token provider for tests and environments that manage the token
/// externally.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<SecretString, InvestError> {
        Ok(SecretString::new(self.token.clone()))
    }
}

// ---------------------------------------------------------------------------
// Persisted token set
// ---------------------------------------------------------------------------

/// Client credentials plus the current token set, persisted as a flat JSON
/// file next to the run configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp of access-token expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl TokenSet {
    pub fn load(path: &Path) -> Result<Self, InvestError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            InvestError::Auth(format!("Cannot read token file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            InvestError::Auth(format!("Cannot parse token file {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), InvestError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| InvestError::Auth(format!("Cannot serialise token set: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            InvestError::Auth(format!("Cannot write token file {}: {e}", path.display()))
        })
    }

    /// Whether the access token is missing or expires within the refresh
    /// window.
    pub fn needs_refresh(&self, now_unix: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now_unix < REFRESH_WINDOW_SECS,
            None => true,
        }
    }
}

/// Token endpoint response for both the refresh and authorization-code
/// grants.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

// ---------------------------------------------------------------------------
// Refreshing provider
// ---------------------------------------------------------------------------

/// Token provider backed by the persisted token set, refreshing through
/// the marketplace token endpoint when needed.
pub struct OAuthTokenProvider {
    http: reqwest::Client,
    token_file: PathBuf,
    cached: Mutex<Option<TokenSet>>,
}

impl OAuthTokenProvider {
    pub fn new(token_file: impl Into<PathBuf>) -> Result<Self, InvestError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| InvestError::Auth(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            token_file: token_file.into(),
            cached: Mutex::new(None),
        })
    }

    async fn refresh(&self, set: &TokenSet) -> Result<TokenSet, InvestError> {
        let refresh_token = set.refresh_token.as_deref().ok_or_else(|| {
            InvestError::Auth(
                "No refresh token in token file — run the interactive bootstrap once".to_string(),
            )
        })?;

        info!(token_url = %set.token_url, "Refreshing access token");

        let response = self
            .http
            .post(&set.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", set.client_id.as_str()),
                ("client_secret", set.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| InvestError::Auth(format!("Token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InvestError::Auth(format!(
                "Token refresh rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| InvestError::Auth(format!("Cannot parse token response: {e}")))?;

        let mut rotated = set.clone();
        rotated.access_token = Some(token.access_token);
        if token.refresh_token.is_some() {
            rotated.refresh_token = token.refresh_token;
        }
        rotated.expires_at = token.expires_in.map(|secs| Utc::now().timestamp() + secs);

        rotated.save(&self.token_file)?;
        info!("Token refreshed and persisted");

        Ok(rotated)
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn bearer_token(&self) -> Result<SecretString, InvestError> {
        let mut cached = self.cached.lock().await;

        let set = match cached.clone() {
            Some(set) => set,
            None => TokenSet::load(&self.token_file)?,
        };

        let set = if set.needs_refresh(Utc::now().timestamp()) {
            self.refresh(&set).await?
        } else {
            debug!("Access token still fresh");
            set
        };

        let token = set.access_token.clone().ok_or_else(|| {
            InvestError::Auth(
                "No access token — run the interactive bootstrap once".to_string(),
            )
        })?;

        *cached = Some(set);
        Ok(SecretString::new(token))
    }
}

// ---------------------------------------------------------------------------
// Interactive bootstrap (human step only)
// ---------------------------------------------------------------------------

pub mod bootstrap {
    //! One-time interactive authorization-code flow.
    //!
    //! Prints the authorization URL, waits for the operator to paste the
    //! redirect URL, exchanges the code and persists the token set. The
    //! automated entry points never call into this module.

    use super::{TokenResponse, TokenSet};
    use crate::types::InvestError;
    use chrono::Utc;
    use std::io::Write;
    use std::path::Path;

    /// Run the authorization-code exchange against a freshly-loaded token
    /// file. Blocks on stdin for the pasted redirect URL.
    pub async fn interactive_authorize(token_file: &Path) -> Result<(), InvestError> {
        let set = TokenSet::load(token_file)?;

        let authorize_url = format!(
            "{}?response_type=code&client_id={}&scope={}",
            set.auth_url,
            urlencoding::encode(&set.client_id),
            urlencoding::encode(&set.scope),
        );
        println!("Please go to {authorize_url} and authorize access.");
        print!("Paste the full redirect URL here: ");
        std::io::stdout()
            .flush()
            .map_err(|e| InvestError::Auth(format!("stdout: {e}")))?;

        let mut redirect = String::new();
        std::io::stdin()
            .read_line(&mut redirect)
            .map_err(|e| InvestError::Auth(format!("stdin: {e}")))?;
        let code = extract_code(redirect.trim())?;

        let http = reqwest::Client::new();
        let response = http
            .post(&set.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", set.client_id.as_str()),
                ("client_secret", set.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| InvestError::Auth(format!("Token exchange failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InvestError::Auth(format!(
                "Token exchange rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| InvestError::Auth(format!("Cannot parse token response: {e}")))?;

        let mut seeded = set;
        seeded.access_token = Some(token.access_token);
        seeded.refresh_token = token.refresh_token;
        seeded.expires_at = token.expires_in.map(|secs| Utc::now().timestamp() + secs);
        seeded.save(token_file)?;

        println!("Token set saved to {}", token_file.display());
        Ok(())
    }

    /// Pull the `code` query parameter out of the pasted redirect URL.
    pub(super) fn extract_code(redirect: &str) -> Result<String, InvestError> {
        let url = reqwest::Url::parse(redirect)
            .map_err(|e| InvestError::Auth(format!("Invalid redirect URL: {e}")))?;
        url.query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| InvestError::Auth("Redirect URL carries no code".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_set(expires_at: Option<i64>) -> TokenSet {
        TokenSet {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            auth_url: "https://example.com/oauth/authorize".to_string(),
            token_url: "https://example.com/oauth/access_token".to_string(),
            scope: "Investments BidsEdit SmSell".to_string(),
            access_token: Some("token".to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_needs_refresh_inside_window() {
        let now = 1_700_000_000;
        // Expires in one day — inside the two-day window
        assert!(make_set(Some(now + 24 * 3600)).needs_refresh(now));
        // Expires in three days — still fresh
        assert!(!make_set(Some(now + 3 * 24 * 3600)).needs_refresh(now));
        // Unknown expiry always refreshes
        assert!(make_set(None).needs_refresh(now));
    }

    #[test]
    fn test_token_set_roundtrip() {
        let mut path = std::env::temp_dir();
        path.push(format!("autovest_token_{}.json", uuid::Uuid::new_v4()));

        let set = make_set(Some(1_700_000_000));
        set.save(&path).unwrap();
        let loaded = TokenSet::load(&path).unwrap();

        assert_eq!(loaded.client_id, "client");
        assert_eq!(loaded.access_token.as_deref(), Some("token"));
        assert_eq!(loaded.expires_at, Some(1_700_000_000));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_auth_error() {
        let err = TokenSet::load(Path::new("/tmp/autovest_no_such_token.json")).unwrap_err();
        assert!(matches!(err, InvestError::Auth(_)));
    }

    #[test]
    fn test_extract_code() {
        let code =
            bootstrap::extract_code("https://app.example.com/callback?code=abc123&state=xyz")
                .unwrap();
        assert_eq!(code, "abc123");

        assert!(bootstrap::extract_code("https://app.example.com/callback?state=xyz").is_err());
        assert!(bootstrap::extract_code("not a url").is_err());
    }

    #[tokio::test]
    async fn test_static_provider() {
        use secrecy::ExposeSecret;
        let provider = StaticTokenProvider::new("fixed");
        let token = provider.bearer_token().await.unwrap();
        assert_eq!(token.expose_secret(), "fixed");
    }
}
