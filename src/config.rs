//! Command-line and environment configuration.

use crate::auth::password::{PasswordHasher, MAX_COST, MIN_COST};
use crate::auth::policy::AccessPolicy;
use crate::auth::token::{TokenService, MAX_TOKEN_TTL};
use crate::auth::AuthService;
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

const MAX_TOKEN_TTL_MINUTES: i64 = MAX_TOKEN_TTL.whole_minutes();

/// Hospital records service.
#[derive(Debug, Clone, Parser)]
#[command(name = "carebase", version, about)]
pub struct Config {
    /// SQLite database file, created on first start.
    #[arg(long, env = "CAREBASE_DATABASE", default_value = "hospital_management.db")]
    pub database: PathBuf,

    /// Address the HTTP server binds to.
    #[arg(long, env = "CAREBASE_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// HMAC secret used to sign access tokens.
    #[arg(
        long,
        env = "CAREBASE_TOKEN_SECRET",
        hide_env_values = true,
        required_unless_present = "token_secret_file",
        conflicts_with = "token_secret_file"
    )]
    pub token_secret: Option<String>,

    /// File holding the signing secret. Re-read on SIGHUP to rotate the key.
    #[arg(long, env = "CAREBASE_TOKEN_SECRET_FILE")]
    pub token_secret_file: Option<PathBuf>,

    /// Lifetime of issued access tokens.
    #[arg(long, env = "CAREBASE_TOKEN_TTL_MINUTES", default_value_t = 30,
          value_parser = clap::value_parser!(u32).range(1..=MAX_TOKEN_TTL_MINUTES))]
    pub token_ttl_minutes: u32,

    /// bcrypt work factor for new password hashes.
    #[arg(long, env = "CAREBASE_BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST,
          value_parser = clap::value_parser!(u32).range(i64::from(MIN_COST)..=i64::from(MAX_COST)))]
    pub bcrypt_cost: u32,

    /// Require a bearer token and apply the role matrix on every entity route.
    #[arg(long, env = "CAREBASE_ENFORCE_ROLES")]
    pub enforce_roles: bool,

    /// Reject logins and tokens of deactivated accounts.
    #[arg(
        long,
        env = "CAREBASE_REVOKE_INACTIVE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub revoke_inactive: bool,

    /// Browser origins allowed to call the API; `*` allows any origin.
    #[arg(
        long = "cors-origin",
        env = "CAREBASE_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub cors_origins: Vec<String>,

    /// Email of the administrator created on first start.
    #[arg(long, env = "CAREBASE_ADMIN_EMAIL", default_value = "admin@hospital.com")]
    pub admin_email: String,

    /// Password of the administrator created on first start.
    #[arg(long, env = "CAREBASE_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "CAREBASE_LOG", default_value = "info")]
    pub log: String,
}

impl Config {
    pub fn token_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.token_ttl_minutes))
    }

    pub fn access_policy(&self) -> AccessPolicy {
        if self.enforce_roles {
            AccessPolicy::enforced()
        } else {
            AccessPolicy::open()
        }
    }

    /// Signing secret, from the flag or from the secret file.
    pub fn signing_secret(&self) -> Result<Vec<u8>> {
        match (&self.token_secret, &self.token_secret_file) {
            (Some(secret), _) => Ok(secret.as_bytes().to_vec()),
            (None, Some(path)) => read_secret_file(path),
            (None, None) => anyhow::bail!("No token secret configured"),
        }
    }

    pub fn auth_service(&self) -> Result<AuthService> {
        let tokens = TokenService::new(self.signing_secret()?, self.token_ttl())
            .context("Invalid token settings")?;
        Ok(AuthService {
            passwords: PasswordHasher::new(self.bcrypt_cost),
            tokens,
            policy: self.access_policy(),
            revoke_inactive: self.revoke_inactive,
        })
    }

    /// Re-reads the secret file and installs it as the signing key.
    ///
    /// Returns `false` when the secret was given inline and there is nothing
    /// to re-read.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or holds an empty secret. The
    /// previous key stays in place.
    pub fn reload_token_secret(&self, tokens: &TokenService) -> Result<bool> {
        let Some(path) = &self.token_secret_file else {
            return Ok(false);
        };
        tokens
            .rotate_key(read_secret_file(path)?)
            .with_context(|| format!("Invalid token secret in {}", path.display()))?;
        Ok(true)
    }

    /// Cross-origin policy for browser front ends.
    ///
    /// A `*` entry allows any origin without credentials. An explicit list
    /// echoes the requested method and headers and allows credentials.
    pub fn cors_layer(&self) -> Result<CorsLayer> {
        if self.cors_origins.iter().any(|origin| origin == "*") {
            return Ok(CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any));
        }
        let origins = self
            .cors_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("Invalid CORS origin {origin:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true))
    }
}

fn read_secret_file(path: &Path) -> Result<Vec<u8>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read token secret from {}", path.display()))?;
    Ok(contents.trim_end_matches(['\r', '\n']).as_bytes().to_vec())
}
