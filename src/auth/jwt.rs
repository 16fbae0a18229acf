//! JWT access token validation.

use super::{AccessClaims, AuthError};
use crate::models::subject::Subject;
use anyhow::{Context, bail};
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, Validation, decode, decode_header, errors::ErrorKind,
    jwk::JwkSet,
};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Minimum time between two JWKS downloads triggered by unknown `kid`s.
pub const MIN_JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Keys a token signature may be checked against.
enum VerificationKeys {
    /// One symmetric key, HMAC algorithms only.
    Shared(DecodingKey),
    /// Asymmetric keys from the authority's JWKS, selected by `kid`.
    Published(PublishedKeys),
}

#[derive(Clone)]
struct PublishedKey {
    kid: Option<String>,
    key: DecodingKey,
}

/// The authority's current key set plus where to reload it from.
struct PublishedKeys {
    keys: RwLock<Vec<PublishedKey>>,
    source: JwksSource,
}

struct JwksSource {
    http: reqwest::Client,
    uri: String,
    min_interval: Duration,
    last_fetch: Mutex<Instant>,
}

/// Validates `at+jwt` access tokens.
pub struct JwtValidator {
    keys: VerificationKeys,
    issuer: Option<String>,
    audience: Option<String>,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = match &self.keys {
            VerificationKeys::Shared(_) => "[shared secret]".to_string(),
            VerificationKeys::Published(published) => format!("[JWKS {}]", published.source.uri),
        };
        f.debug_struct("JwtValidator")
            .field("keys", &keys)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl JwtValidator {
    pub fn with_shared_secret(
        secret: &[u8],
        issuer: Option<String>,
        audience: Option<String>,
    ) -> Self {
        Self {
            keys: VerificationKeys::Shared(DecodingKey::from_secret(secret)),
            issuer,
            audience,
        }
    }

    /// Load the authority's key set from `jwks_uri`.
    ///
    /// The set is downloaded again when a token names an unknown `kid`, at
    /// most once per [`MIN_JWKS_REFRESH_INTERVAL`].
    pub async fn from_jwks_uri(
        http: reqwest::Client,
        jwks_uri: String,
        issuer: Option<String>,
        audience: Option<String>,
    ) -> anyhow::Result<Self> {
        let keys = fetch_keys(&http, &jwks_uri).await?;
        if keys.is_empty() {
            bail!("authority published no usable signing keys at {}", jwks_uri);
        }
        Ok(Self {
            keys: VerificationKeys::Published(PublishedKeys {
                keys: RwLock::new(keys),
                source: JwksSource {
                    http,
                    uri: jwks_uri,
                    min_interval: MIN_JWKS_REFRESH_INTERVAL,
                    last_fetch: Mutex::new(Instant::now()),
                },
            }),
            issuer,
            audience,
        })
    }

    /// Override the minimum interval between key set downloads.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        if let VerificationKeys::Published(published) = &mut self.keys {
            published.source.min_interval = interval;
        }
        self
    }

    /// Check signature, token type, expiry, issuer and audience.
    pub async fn validate(&self, token: &str) -> Result<Subject, AuthError> {
        let header = decode_header(token)
            .map_err(|err| AuthError::InvalidToken(format!("malformed header: {}", err)))?;
        if !is_access_token_type(header.typ.as_deref()) {
            return Err(AuthError::InvalidToken(format!(
                "unexpected token type {:?}",
                header.typ
            )));
        }
        let key = self.key_for(&header).await?;

        let mut validation = Validation::new(header.alg);
        match &self.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<AccessClaims>(token, &key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            }
        })?;
        data.claims.into_subject()
    }

    async fn key_for(&self, header: &Header) -> Result<DecodingKey, AuthError> {
        let hmac = matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        );
        match &self.keys {
            VerificationKeys::Shared(key) if hmac => Ok(key.clone()),
            VerificationKeys::Published(published) if !hmac => {
                published.find(header.kid.as_deref()).await
            }
            _ => Err(AuthError::InvalidToken(format!(
                "algorithm {:?} not accepted",
                header.alg
            ))),
        }
    }
}

impl PublishedKeys {
    async fn find(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        if let Some(key) = select_key(&self.keys.read().await, kid) {
            return Ok(key);
        }
        if kid.is_some() {
            self.refresh().await;
            if let Some(key) = select_key(&self.keys.read().await, kid) {
                return Ok(key);
            }
        }
        Err(AuthError::InvalidToken("unknown signing key".into()))
    }

    /// Reload the key set unless that happened less than `min_interval` ago.
    /// Concurrent callers wait for the running download instead of starting
    /// their own.
    async fn refresh(&self) {
        let mut last_fetch = self.source.last_fetch.lock().await;
        if last_fetch.elapsed() < self.source.min_interval {
            return;
        }
        *last_fetch = Instant::now();

        match fetch_keys(&self.source.http, &self.source.uri).await {
            Ok(keys) if !keys.is_empty() => {
                info!("reloaded {} signing keys from {}", keys.len(), self.source.uri);
                *self.keys.write().await = keys;
            }
            Ok(_) => warn!(
                "{} returned no usable signing keys; keeping the old set",
                self.source.uri
            ),
            Err(err) => warn!("failed to reload signing keys: {:#}", err),
        }
    }
}

fn select_key(keys: &[PublishedKey], kid: Option<&str>) -> Option<DecodingKey> {
    let found = match kid {
        Some(kid) => keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
        None if keys.len() == 1 => keys.first(),
        None => None,
    };
    found.map(|k| k.key.clone())
}

async fn fetch_keys(http: &reqwest::Client, jwks_uri: &str) -> anyhow::Result<Vec<PublishedKey>> {
    let jwks: JwkSet = http
        .get(jwks_uri)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("fetching JWKS from {}", jwks_uri))?
        .json()
        .await
        .with_context(|| format!("decoding JWKS from {}", jwks_uri))?;
    Ok(usable_keys(&jwks))
}

/// Keys that cannot be turned into a decoding key are skipped.
fn usable_keys(jwks: &JwkSet) -> Vec<PublishedKey> {
    jwks.keys
        .iter()
        .filter_map(|jwk| match DecodingKey::from_jwk(jwk) {
            Ok(key) => Some(PublishedKey {
                kid: jwk.common.key_id.clone(),
                key,
            }),
            Err(err) => {
                warn!("skipping unusable JWKS key {:?}: {}", jwk.common.key_id, err);
                None
            }
        })
        .collect()
}

fn is_access_token_type(typ: Option<&str>) -> bool {
    typ.is_some_and(|t| {
        t.eq_ignore_ascii_case("at+jwt") || t.eq_ignore_ascii_case("application/at+jwt")
    })
}
