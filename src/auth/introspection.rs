//! OAuth2 token introspection (RFC 7662) for reference tokens.

use super::{AuthError, ScopeClaim};
use crate::models::subject::Subject;
use serde::Deserialize;

pub struct IntrospectionClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[hidden]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    scope: Option<ScopeClaim>,
}

impl IntrospectionClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            endpoint,
            client_id,
            client_secret,
        }
    }

    /// Ask the authority whether `token` is active and who it belongs to.
    pub async fn introspect(&self, token: &str) -> Result<Subject, AuthError> {
        let response: IntrospectionResponse = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(AuthError::Introspection)?
            .json()
            .await
            .map_err(AuthError::Introspection)?;

        if !response.active {
            return Err(AuthError::Inactive);
        }
        let id = response.sub.ok_or(AuthError::MissingSubject)?;
        let scopes = response
            .scope
            .map(ScopeClaim::into_scopes)
            .unwrap_or_default();
        Ok(Subject::new(id, scopes))
    }
}
