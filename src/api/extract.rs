//! Request extractors whose rejections render as [`ApiError`].

use super::error::ApiError;
use super::{blocking, SharedState};
use crate::auth::policy::{AccessError, Operation};
use crate::auth::Caller;
use crate::db::Scope;
use crate::models::EntityKind;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

/// JSON request body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Payload<T>(pub T);

/// URL-encoded form body.
#[derive(FromRequest)]
#[from_request(via(axum::Form), rejection(ApiError))]
pub struct FormBody<T>(pub T);

/// Query string.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Params<T>(pub T);

/// Path parameters.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathId<T>(pub T);

/// The caller behind a request, if it presented a bearer token.
///
/// A missing `Authorization` header yields an anonymous session; a header
/// that is present but does not carry a valid token is rejected outright.
#[derive(Debug, Clone)]
pub struct Session(pub Option<Caller>);

impl Session {
    pub fn caller_id(&self) -> Option<i64> {
        self.0.as_ref().map(|caller| caller.id)
    }

    pub fn authorize(
        &self,
        state: &SharedState,
        kind: EntityKind,
        operation: Operation,
    ) -> Result<Scope, AccessError> {
        state.auth.policy.authorize(self.0.as_ref(), kind, operation)
    }
}

fn bearer_token(parts: &Parts) -> Result<Option<String>, ApiError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let invalid = || ApiError::unauthorized("Could not validate credentials");
    let value = value.to_str().map_err(|_| invalid())?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(Some(token.trim().to_string()))
        }
        _ => Err(invalid()),
    }
}

#[axum::async_trait]
impl FromRequestParts<SharedState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts)? else {
            return Ok(Session(None));
        };
        let caller = blocking(state, move |state, conn| {
            state.auth.authenticate(conn, &token)
        })
        .await?;
        debug!(user_id = caller.id, role = %caller.role, "authenticated request");
        Ok(Session(Some(caller)))
    }
}
