//! HTTP surface of the service.
//!
//! Handlers are thin: they extract the request, consult the access policy
//! and hand the repository call to tokio's blocking pool, where it runs
//! against the shared SQLite connection.

pub mod entities;
pub mod error;
pub mod extract;
pub mod token;

use crate::auth::policy::Operation;
use crate::auth::AuthService;
use crate::db::{self, Database, Table};
use crate::models::{Appointment, MedicalRecord, Page, Patient, Prescription, User};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use error::{ApiError, ApiResult};
use extract::{Params, PathId, Session};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct AppState {
    pub db: Database,
    pub auth: AuthService,
}

pub type SharedState = Arc<AppState>;

/// Runs `f` on the blocking pool with exclusive use of the connection.
pub(crate) async fn blocking<T, E, F>(state: &SharedState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppState, &mut Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError>,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || {
        let state = &*state;
        state
            .db
            .with_conn(|conn| f(state, conn))
            .map_err(Into::<ApiError>::into)
    })
    .await?
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/token", post(token::login))
        .route("/users", get(list::<User>).post(entities::create_user))
        .route(
            "/users/:id",
            get(fetch::<User>)
                .put(entities::update_user)
                .delete(remove::<User>),
        )
        .route(
            "/patients",
            get(list::<Patient>).post(entities::create_patient),
        )
        .route(
            "/patients/:id",
            get(fetch::<Patient>)
                .put(entities::update_patient)
                .delete(remove::<Patient>),
        )
        .route(
            "/records",
            get(list::<MedicalRecord>).post(entities::create_record),
        )
        .route(
            "/records/:id",
            get(fetch::<MedicalRecord>)
                .put(entities::update_record)
                .delete(remove::<MedicalRecord>),
        )
        .route(
            "/appointments",
            get(list::<Appointment>).post(entities::create_appointment),
        )
        .route(
            "/appointments/:id",
            get(fetch::<Appointment>)
                .put(entities::update_appointment)
                .delete(remove::<Appointment>),
        )
        .route(
            "/prescriptions",
            get(list::<Prescription>).post(entities::create_prescription),
        )
        .route(
            "/prescriptions/:id",
            get(fetch::<Prescription>)
                .put(entities::update_prescription)
                .delete(remove::<Prescription>),
        )
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Hospital Management System API" }))
}

async fn list<T>(
    State(state): State<SharedState>,
    session: Session,
    Params(page): Params<Page>,
) -> ApiResult<Json<Vec<T>>>
where
    T: Table + Serialize + Send + 'static,
{
    let scope = session.authorize(&state, T::KIND, Operation::Read)?;
    let rows = blocking(&state, move |_, conn| db::list::<T>(conn, page, scope)).await?;
    Ok(Json(rows))
}

async fn fetch<T>(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
) -> ApiResult<Json<T>>
where
    T: Table + Serialize + Send + 'static,
{
    let scope = session.authorize(&state, T::KIND, Operation::Read)?;
    let row = blocking(&state, move |_, conn| db::get::<T>(conn, id, scope)).await?;
    Ok(Json(row))
}

async fn remove<T>(
    State(state): State<SharedState>,
    session: Session,
    PathId(id): PathId<i64>,
) -> ApiResult<Json<Value>>
where
    T: Table + Send + 'static,
{
    session.authorize(&state, T::KIND, Operation::Delete)?;
    blocking(&state, move |_, conn| db::delete::<T>(conn, id)).await?;
    Ok(Json(json!({ "message": format!("{} deleted successfully", T::KIND) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{PasswordHasher, MIN_COST};
    use crate::auth::policy::AccessPolicy;
    use crate::auth::token::{TokenService, DEFAULT_TOKEN_TTL};
    use crate::config::Config;
    use crate::db::fixtures;
    use crate::models::Role;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use clap::Parser;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(policy: AccessPolicy) -> SharedState {
        Arc::new(AppState {
            db: Database::open_in_memory().unwrap(),
            auth: AuthService {
                passwords: PasswordHasher::new(MIN_COST),
                tokens: TokenService::new(b"http-tests".to_vec(), DEFAULT_TOKEN_TTL).unwrap(),
                policy,
                revoke_inactive: true,
            },
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_request(method: Method, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn empty_request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn login_request(username: &str, password: &str) -> Request<Body> {
        Request::post("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={username}&password={password}")))
            .unwrap()
    }

    fn user_body(email: &str, role: &str) -> Value {
        json!({
            "name": "Ana Souza",
            "email": email,
            "phone": "+1 555 0100",
            "password": "pw1",
            "role": role,
        })
    }

    fn patient_body() -> Value {
        json!({
            "name": "John Doe",
            "phone": "+1 555 0199",
            "date_of_birth": "1980-04-12",
            "gender": "Male",
            "blood_type": "O+",
        })
    }

    async fn token_for(app: &Router, email: &str) -> String {
        let (status, body) = send(app, login_request(email, "pw1")).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn root_reports_service_banner() {
        let app = router(state(AccessPolicy::open()));
        let (status, body) = send(&app, empty_request(Method::GET, "/", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Hospital Management System API");
    }

    fn cors_router(origins: &str) -> Router {
        let config = Config::try_parse_from([
            "carebase",
            "--token-secret",
            "s",
            "--cors-origin",
            origins,
        ])
        .unwrap();
        router(state(AccessPolicy::open())).layer(config.cors_layer().unwrap())
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/patients")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn any_browser_origin_may_call_the_api_by_default() {
        let app = cors_router("*");

        let response = app
            .clone()
            .oneshot(preflight("http://localhost:3000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");

        let request = Request::get("/")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn listed_origins_get_credentialed_cors_and_others_none() {
        let app = cors_router("http://localhost:3000");

        let response = app
            .clone()
            .oneshot(preflight("http://localhost:3000"))
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");

        let response = app.oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn registration_and_login_flow() {
        let app = router(state(AccessPolicy::open()));

        let (status, body) = send(
            &app,
            json_request(Method::POST, "/users", user_body("a@x.com", "Doctor"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 1);
        assert!(body.get("hashed_password").is_none());

        let (status, body) = send(
            &app,
            json_request(Method::POST, "/users", user_body("a@x.com", "Nurse"), None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Email already registered");

        let (status, body) = send(&app, login_request("a@x.com", "pw1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["access_token"].as_str().unwrap().split('.').count(), 3);

        let response = app
            .clone()
            .oneshot(login_request("a@x.com", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn patient_record_and_listing_scenario() {
        let app = router(state(AccessPolicy::open()));
        send(
            &app,
            json_request(Method::POST, "/users", user_body("a@x.com", "Doctor"), None),
        )
        .await;

        let mut patient = patient_body();
        patient["owner_id"] = json!(1);
        let (status, body) =
            send(&app, json_request(Method::POST, "/patients", patient, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["owner_id"], 1);
        let patient_id = body["id"].as_i64().unwrap();

        let (status, record) = send(
            &app,
            json_request(
                Method::POST,
                "/records",
                json!({
                    "patient_id": patient_id,
                    "date": "2024-03-01",
                    "doctor": "Dr. John Smith",
                    "diagnosis": "Hypertension",
                    "treatment": "Lisinopril",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], "In Progress");

        let (status, listed) = send(&app, empty_request(Method::GET, "/records", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed, json!([record]));
    }

    #[tokio::test]
    async fn owner_defaults_to_authenticated_caller() {
        let app = router(state(AccessPolicy::open()));
        send(
            &app,
            json_request(Method::POST, "/users", user_body("desk@x.com", "Secretary"), None),
        )
        .await;
        let token = token_for(&app, "desk@x.com").await;

        let (_, owned) = send(
            &app,
            json_request(Method::POST, "/patients", patient_body(), Some(&token)),
        )
        .await;
        assert_eq!(owned["owner_id"], 1);

        let (_, anonymous) =
            send(&app, json_request(Method::POST, "/patients", patient_body(), None)).await;
        assert_eq!(anonymous["owner_id"], Value::Null);
    }

    #[tokio::test]
    async fn crud_errors_map_to_statuses() {
        let app = router(state(AccessPolicy::open()));

        let (status, body) = send(&app, empty_request(Method::GET, "/patients/9", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Patient not found");

        let (status, _) = send(
            &app,
            json_request(
                Method::POST,
                "/appointments",
                json!({
                    "patient_id": 9,
                    "date": "2024-03-08",
                    "time": "09:30",
                    "doctor": "Dr. John Smith",
                    "reason": "Follow-up",
                }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let mut blank_name = patient_body();
        blank_name["name"] = json!("   ");
        let (status, _) =
            send(&app, json_request(Method::POST, "/patients", blank_name, None)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, empty_request(Method::GET, "/patients/abc", None)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) =
            send(&app, empty_request(Method::GET, "/patients?limit=-1", None)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn update_and_delete_round() {
        let app = router(state(AccessPolicy::open()));
        let (_, patient) =
            send(&app, json_request(Method::POST, "/patients", patient_body(), None)).await;

        let (status, updated) = send(
            &app,
            json_request(Method::PUT, "/patients/1", json!({"blood_type": "AB-"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["blood_type"], "AB-");
        assert_eq!(updated["name"], patient["name"]);
        assert_eq!(updated["created_at"], patient["created_at"]);

        let (status, body) = send(&app, empty_request(Method::DELETE, "/patients/1", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Patient deleted successfully");

        let (status, _) = send(&app, empty_request(Method::GET, "/patients/1", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_with_dependents_conflicts() {
        let state = state(AccessPolicy::open());
        state.db.with_conn(|conn| {
            let patient = fixtures::patient(conn, None);
            fixtures::record(conn, patient.id);
        });
        let app = router(state);

        let (status, body) = send(&app, empty_request(Method::DELETE, "/patients/1", None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["detail"],
            "Patient 1 is still referenced by 1 medical record entries"
        );
    }

    #[tokio::test]
    async fn presented_token_must_verify_even_in_open_mode() {
        let app = router(state(AccessPolicy::open()));
        let (status, body) =
            send(&app, empty_request(Method::GET, "/patients", Some("not.a.token"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Could not validate credentials");
    }

    #[tokio::test]
    async fn enforced_policy_requires_token_and_applies_roles() {
        let state = state(AccessPolicy::enforced());
        state.db.with_conn(|conn| {
            fixtures::user(conn, "desk@x.com", Role::Secretary);
            fixtures::user(conn, "doc@x.com", Role::Doctor);
        });
        let app = router(state);

        let (status, _) = send(&app, empty_request(Method::GET, "/patients", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let secretary = token_for(&app, "desk@x.com").await;
        let (status, _) =
            send(&app, empty_request(Method::GET, "/patients", Some(&secretary))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            send(&app, empty_request(Method::GET, "/records", Some(&secretary))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let doctor = token_for(&app, "doc@x.com").await;
        let (status, _) = send(&app, empty_request(Method::GET, "/users", Some(&doctor))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            send(&app, empty_request(Method::GET, "/records", Some(&doctor))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn patient_role_sees_only_own_patients() {
        let state = state(AccessPolicy::enforced());
        state.db.with_conn(|conn| {
            let me = fixtures::user(conn, "me@x.com", Role::Patient);
            let other = fixtures::user(conn, "other@x.com", Role::Patient);
            fixtures::patient(conn, Some(other.id));
            fixtures::patient(conn, Some(me.id));
        });
        let app = router(state);
        let token = token_for(&app, "me@x.com").await;

        let (status, listed) =
            send(&app, empty_request(Method::GET, "/patients", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["id"], 2);

        let (status, _) =
            send(&app, empty_request(Method::GET, "/patients/1", Some(&token))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/patients", patient_body(), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
