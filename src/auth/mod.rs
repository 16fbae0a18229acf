//! Bearer token authentication.
//!
//! Two kinds of access tokens are accepted:
//! - self-contained JWTs (`at+jwt`), checked locally by [`jwt::JwtValidator`];
//! - opaque reference tokens, checked against the authority's OAuth2
//!   introspection endpoint by [`introspection::IntrospectionClient`].
//!
//! A token containing a `.` is treated as a JWT, anything else as a
//! reference token. Either way the caller must hold the required scope.

pub mod introspection;
pub mod jwt;
pub mod middleware;

use crate::{config::AuthSettings, models::subject::Subject};
use anyhow::{Context, bail};
use introspection::IntrospectionClient;
use jwt::JwtValidator;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token is not active")]
    Inactive,
    #[error("token has no subject")]
    MissingSubject,
    #[error("reference tokens are not accepted")]
    IntrospectionUnavailable,
    #[error("token introspection failed: {0}")]
    Introspection(#[source] reqwest::Error),
    #[error("required scope `{0}` missing")]
    MissingScope(String),
}

/// `scope` is a space-delimited string in introspection responses and
/// usually a JSON array in JWT access tokens.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

impl ScopeClaim {
    pub(crate) fn into_scopes(self) -> Vec<String> {
        match self {
            ScopeClaim::Delimited(s) => s.split_whitespace().map(str::to_string).collect(),
            ScopeClaim::List(list) => list,
        }
    }
}

/// Claims read from a validated JWT. `exp`, `iss` and `aud` are checked by
/// `jsonwebtoken` itself.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    scope: Option<ScopeClaim>,
}

impl AccessClaims {
    pub(crate) fn into_subject(self) -> Result<Subject, AuthError> {
        let id = self.sub.ok_or(AuthError::MissingSubject)?;
        let scopes = self.scope.map(ScopeClaim::into_scopes).unwrap_or_default();
        Ok(Subject::new(id, scopes))
    }
}

/// Relevant part of an OpenID Connect discovery document.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
    #[serde(default)]
    introspection_endpoint: Option<String>,
}

#[derive(Debug)]
pub struct Authenticator {
    jwt: JwtValidator,
    introspection: Option<IntrospectionClient>,
    required_scope: String,
}

impl Authenticator {
    pub fn new(
        jwt: JwtValidator,
        introspection: Option<IntrospectionClient>,
        required_scope: String,
    ) -> Self {
        Self {
            jwt,
            introspection,
            required_scope,
        }
    }

    /// Build the authenticator from configuration.
    ///
    /// With an authority configured, its discovery document provides the
    /// issuer, the JWKS (unless a local HS256 secret is set) and the
    /// introspection endpoint. Introspection is only enabled when audience
    /// and client secret are configured as well.
    pub async fn from_settings(
        settings: &AuthSettings,
        http: reqwest::Client,
    ) -> anyhow::Result<Self> {
        let discovery = match &settings.authority {
            Some(authority) => Some(discover(&http, authority).await?),
            None => None,
        };
        let issuer = discovery
            .as_ref()
            .map(|doc| doc.issuer.clone())
            .or_else(|| settings.authority.clone());

        let jwt = match (&settings.jwt_secret, &discovery) {
            (Some(secret), _) => JwtValidator::with_shared_secret(
                secret.as_bytes(),
                issuer,
                settings.audience.clone(),
            ),
            (None, Some(doc)) => JwtValidator::from_jwks_uri(
                http.clone(),
                doc.jwks_uri.clone(),
                issuer,
                settings.audience.clone(),
            )
            .await
            .context("loading the authority's signing keys")?,
            (None, None) => bail!("configure BOARDS_AUTH_AUTHORITY or BOARDS_JWT_SECRET"),
        };

        let endpoint = discovery.and_then(|doc| doc.introspection_endpoint);
        let introspection = match (endpoint, &settings.audience, &settings.client_secret) {
            (Some(endpoint), Some(client_id), Some(secret)) => Some(IntrospectionClient::new(
                http,
                endpoint,
                client_id.clone(),
                secret.clone(),
            )),
            _ => {
                tracing::info!("token introspection disabled; only JWT access tokens accepted");
                None
            }
        };

        Ok(Self::new(jwt, introspection, settings.required_scope.clone()))
    }

    /// Validate `token` and check the required scope.
    pub async fn authenticate(&self, token: &str) -> Result<Subject, AuthError> {
        let subject = if is_reference_token(token) {
            match &self.introspection {
                Some(client) => client.introspect(token).await?,
                None => return Err(AuthError::IntrospectionUnavailable),
            }
        } else {
            self.jwt.validate(token).await?
        };

        if !subject.has_scope(&self.required_scope) {
            return Err(AuthError::MissingScope(self.required_scope.clone()));
        }
        Ok(subject)
    }
}

fn is_reference_token(token: &str) -> bool {
    !token.contains('.')
}

async fn discover(http: &reqwest::Client, authority: &str) -> anyhow::Result<DiscoveryDocument> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        authority.trim_end_matches('/')
    );
    let doc = http
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("fetching discovery document {}", url))?
        .json::<DiscoveryDocument>()
        .await
        .with_context(|| format!("decoding discovery document {}", url))?;
    tracing::info!("Loaded discovery document for issuer {}", doc.issuer);
    Ok(doc)
}
