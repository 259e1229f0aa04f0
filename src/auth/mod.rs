//! Authentication: credential checks, token issuance, caller resolution.

pub mod password;
pub mod policy;
pub mod token;

use crate::db::users;
use crate::error::RepoError;
use crate::models::Role;
use password::PasswordHasher;
use policy::AccessPolicy;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use token::{TokenError, TokenService};
use tracing::{debug, warn};

/// Username (the account email) and password presented at `/token`.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Response body of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

impl AccessToken {
    fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub email: String,
    /// Role as stated in the token.
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Incorrect username or password")]
    InvalidCredentials,
    #[error("Account is inactive")]
    Inactive,
    /// The token names a user that no longer exists.
    #[error("Unknown token subject")]
    UnknownSubject,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Everything needed to turn credentials into tokens and tokens into callers.
#[derive(Debug)]
pub struct AuthService {
    pub passwords: PasswordHasher,
    pub tokens: TokenService,
    pub policy: AccessPolicy,
    /// Re-check `is_active` on login and on every authenticated request.
    pub revoke_inactive: bool,
}

impl AuthService {
    /// Exchanges credentials for a bearer token.
    pub fn login(
        &self,
        conn: &Connection,
        credentials: &Credentials,
    ) -> Result<AccessToken, AuthError> {
        let Some(user) = users::find_by_email(conn, &credentials.username)? else {
            warn!(username = %credentials.username, "login for unknown account");
            return Err(AuthError::InvalidCredentials);
        };
        if !self
            .passwords
            .verify(&credentials.password, &user.hashed_password)
        {
            warn!(user_id = user.id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if self.revoke_inactive && !user.is_active {
            warn!(user_id = user.id, "login for inactive account");
            return Err(AuthError::Inactive);
        }

        let token = self.tokens.issue(&user.email, user.role)?;
        debug!(user_id = user.id, role = %user.role, "issued access token");
        Ok(AccessToken::bearer(token))
    }

    /// Verifies a bearer token and resolves it to a stored user.
    ///
    /// The caller carries the role stored now, not the one the token was
    /// issued with.
    pub fn authenticate(&self, conn: &Connection, token: &str) -> Result<Caller, AuthError> {
        let claims = self.tokens.verify(token)?;
        let user = users::find_by_email(conn, &claims.sub)?.ok_or(AuthError::UnknownSubject)?;
        if self.revoke_inactive && !user.is_active {
            return Err(AuthError::Inactive);
        }
        Ok(Caller {
            id: user.id,
            email: user.email,
            role: user.role,
        })
    }
}
