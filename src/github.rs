/*!
 * GitHub identity client
 *
 * Resolves a personal access token to the account it belongs to, the
 * OAuth scopes it carries, and the current rate-limit budget. Used by
 * the credential vault to vet tokens before they are stored.
 */

use async_trait::async_trait;
use sacristan_core_vigil::credential_vault::{IdentityClient, IdentityProfile, RateLimitSnapshot};
use sacristan_core_vigil::VigilError;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("sacristan/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

/// Identity client backed by the GitHub REST API
#[derive(Debug, Clone)]
pub struct GithubIdentity {
    client: reqwest::Client,
    base_url: String,
}

impl GithubIdentity {
    /// Create a client against the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, VigilError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VigilError::Internal(format!("http client: {}", e)))?;
        Ok(GithubIdentity {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn header_str(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn header_num<T: std::str::FromStr>(headers: &reqwest::header::HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// Parse the comma-separated `x-oauth-scopes` header into a scope list.
fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl IdentityClient for GithubIdentity {
    async fn fetch_profile(&self, token: &str) -> Result<IdentityProfile, VigilError> {
        let url = format!("{}/user", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| VigilError::Network(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VigilError::CredentialRejected {
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let scopes = header_str(&headers, "x-oauth-scopes")
            .map(|raw| parse_scopes(&raw))
            .unwrap_or_default();
        let rate_limit = RateLimitSnapshot {
            limit: header_num(&headers, "x-ratelimit-limit").unwrap_or_default(),
            remaining: header_num(&headers, "x-ratelimit-remaining").unwrap_or_default(),
            reset_epoch_s: header_num(&headers, "x-ratelimit-reset").unwrap_or_default(),
        };

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| VigilError::Network(format!("decode {}: {}", url, e)))?;

        debug!(login = %user.login, scopes = ?scopes, "resolved token identity");
        Ok(IdentityProfile {
            login: user.login,
            scopes,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scopes_trims_and_drops_empty() {
        assert_eq!(
            parse_scopes("repo, read:org , gist"),
            vec!["repo", "read:org", "gist"]
        );
        assert!(parse_scopes("").is_empty());
        assert!(parse_scopes(" , ").is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let client = GithubIdentity::new("https://api.github.com/").unwrap();
        assert_eq!(client.base_url, "https://api.github.com");
    }
}
