use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub object_store: ObjectStoreSettings,
    pub auth: AuthSettings,
}

/// Where file payloads are written.
#[derive(Clone)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    /// S3-compatible endpoint; `None` selects the local filesystem backend.
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub storage_dir: String,
}

/// Token validation settings.
#[derive(Clone)]
pub struct AuthSettings {
    /// OpenID authority; its discovery document supplies the JWKS and the
    /// introspection endpoint.
    pub authority: Option<String>,
    /// Expected `aud`, also the client id used for introspection.
    pub audience: Option<String>,
    /// Client secret for token introspection.
    pub client_secret: Option<String>,
    /// HS256 key for locally signed tokens (development).
    pub jwt_secret: Option<String>,
    pub required_scope: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Authenticated file attachment API")]
pub struct Args {
    /// Host to bind to (overrides BOARDS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BOARDS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BOARDS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload request in bytes (overrides BOARDS_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Bucket holding file payloads (overrides BOARDS_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// S3-compatible endpoint, e.g. http://localhost:9000 (overrides BOARDS_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Signing region (overrides BOARDS_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Access key id (overrides BOARDS_S3_ACCESS_KEY)
    #[arg(long)]
    pub s3_access_key: Option<String>,

    /// Secret access key (overrides BOARDS_S3_SECRET_KEY)
    #[arg(long)]
    pub s3_secret_key: Option<String>,

    /// Local payload directory when no S3 endpoint is set (overrides BOARDS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// OpenID authority URL (overrides BOARDS_AUTH_AUTHORITY)
    #[arg(long)]
    pub auth_authority: Option<String>,

    /// Expected token audience (overrides BOARDS_AUTH_AUDIENCE)
    #[arg(long)]
    pub auth_audience: Option<String>,

    /// Introspection client secret (overrides BOARDS_AUTH_SECRET)
    #[arg(long)]
    pub auth_secret: Option<String>,

    /// HS256 secret for development tokens (overrides BOARDS_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Scope every caller must hold (overrides BOARDS_REQUIRED_SCOPE)
    #[arg(long)]
    pub required_scope: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI values over environment values over defaults.
    ///
    /// `lookup` stands in for `std::env::var` so tests need not touch the
    /// process environment.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let parsed = |name: &str| -> Result<Option<u64>> {
            var(name)?
                .map(|value| {
                    u64::from_str(value.trim())
                        .with_context(|| format!("parsing {} value `{}`", name, value))
                })
                .transpose()
        };

        let env_port = parsed("BOARDS_PORT")?
            .map(|port| u16::try_from(port).context("BOARDS_PORT out of range"))
            .transpose()?;
        let env_max_upload = parsed("BOARDS_MAX_UPLOAD_BYTES")?
            .map(|n| usize::try_from(n).context("BOARDS_MAX_UPLOAD_BYTES out of range"))
            .transpose()?;

        let object_store = ObjectStoreSettings {
            bucket: args
                .bucket
                .or(var("BOARDS_BUCKET")?)
                .unwrap_or_else(|| "boards".into()),
            endpoint: args.s3_endpoint.or(var("BOARDS_S3_ENDPOINT")?),
            region: args
                .s3_region
                .or(var("BOARDS_S3_REGION")?)
                .unwrap_or_else(|| "us-east-1".into()),
            access_key: args.s3_access_key.or(var("BOARDS_S3_ACCESS_KEY")?),
            secret_key: args.s3_secret_key.or(var("BOARDS_S3_SECRET_KEY")?),
            storage_dir: args
                .storage_dir
                .or(var("BOARDS_STORAGE_DIR")?)
                .unwrap_or_else(|| "./data/objects".into()),
        };

        let auth = AuthSettings {
            authority: args.auth_authority.or(var("BOARDS_AUTH_AUTHORITY")?),
            audience: args.auth_audience.or(var("BOARDS_AUTH_AUDIENCE")?),
            client_secret: args.auth_secret.or(var("BOARDS_AUTH_SECRET")?),
            jwt_secret: args.jwt_secret.or(var("BOARDS_JWT_SECRET")?),
            required_scope: args
                .required_scope
                .or(var("BOARDS_REQUIRED_SCOPE")?)
                .unwrap_or_else(|| "VLO_BOARDS".into()),
        };

        Ok(Self {
            host: args
                .host
                .or(var("BOARDS_HOST")?)
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.or(env_port).unwrap_or(3000),
            database_url: args
                .database_url
                .or(var("BOARDS_DATABASE_URL")?)
                .unwrap_or_else(|| "sqlite://./data/meta/boards.db".into()),
            max_upload_bytes: args.max_upload_bytes.or(env_max_upload).unwrap_or(30_000_000),
            object_store,
            auth,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn redacted(value: &Option<String>) -> &'static str {
    if value.is_some() { "[hidden]" } else { "<unset>" }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("object_store", &self.object_store)
            .field("auth", &self.auth)
            .finish()
    }
}

impl fmt::Debug for ObjectStoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreSettings")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &redacted(&self.access_key))
            .field("secret_key", &redacted(&self.secret_key))
            .field("storage_dir", &self.storage_dir)
            .finish()
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("authority", &self.authority)
            .field("audience", &self.audience)
            .field("client_secret", &redacted(&self.client_secret))
            .field("jwt_secret", &redacted(&self.jwt_secret))
            .field("required_scope", &self.required_scope)
            .finish()
    }
}
