//! `POST /token`: exchanges form credentials for a bearer token.

use super::error::ApiResult;
use super::extract::FormBody;
use super::{blocking, SharedState};
use crate::auth::{AccessToken, Credentials};
use axum::extract::State;
use axum::Json;
use tracing::{info, instrument};

#[instrument(skip_all, fields(username = %credentials.username))]
pub async fn login(
    State(state): State<SharedState>,
    FormBody(credentials): FormBody<Credentials>,
) -> ApiResult<Json<AccessToken>> {
    let token = blocking(&state, move |state, conn| {
        state.auth.login(conn, &credentials)
    })
    .await?;
    info!("login succeeded");
    Ok(Json(token))
}
