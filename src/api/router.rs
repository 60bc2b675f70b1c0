//! REST API router.
//!
//! Everything lives under `/api/`; profile pictures are served statically
//! from `/uploads/`.
//!
//! Middleware stack on protected routes (outermost → innermost):
//! 1. Access logger → 2. Rate limiter → 3. Auth validator

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

#[cfg(test)]
pub(crate) fn api_router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx)
}

fn build_router(ctx: ApiContext) -> Router {
    // Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        // Auth
        .route("/auth/logout", post(endpoints::auth::logout))
        .route("/auth/me", get(endpoints::auth::me))
        .route("/auth/password", put(endpoints::auth::change_password))
        // Users & staff titles
        .route("/users", get(endpoints::users::list).post(endpoints::users::create))
        .route(
            "/users/:id",
            get(endpoints::users::detail)
                .put(endpoints::users::update)
                .delete(endpoints::users::deactivate),
        )
        .route(
            "/users/:id/picture",
            post(endpoints::users::upload_picture)
                .layer(DefaultBodyLimit::max(endpoints::users::PICTURE_BODY_LIMIT)),
        )
        .route("/doctors", get(endpoints::users::doctors))
        .route("/roles", get(endpoints::roles::list).post(endpoints::roles::create))
        .route(
            "/roles/:id",
            put(endpoints::roles::update).delete(endpoints::roles::deactivate),
        )
        // Branches
        .route("/branches", get(endpoints::branches::list).post(endpoints::branches::create))
        .route(
            "/branches/:id",
            get(endpoints::branches::detail)
                .put(endpoints::branches::update)
                .delete(endpoints::branches::deactivate),
        )
        // Patients
        .route("/patients", get(endpoints::patients::list).post(endpoints::patients::create))
        .route(
            "/patients/:id",
            get(endpoints::patients::detail)
                .put(endpoints::patients::update)
                .delete(endpoints::patients::deactivate),
        )
        .route("/patients/:id/appointments", get(endpoints::patients::appointments))
        .route("/patients/:id/invoices", get(endpoints::patients::invoices))
        .route("/patients/:id/policies", get(endpoints::patients::policies))
        // Appointments
        .route(
            "/appointments",
            get(endpoints::appointments::list).post(endpoints::appointments::create),
        )
        .route("/appointments/walk-in", post(endpoints::appointments::walk_in))
        .route(
            "/appointments/:id",
            get(endpoints::appointments::detail).put(endpoints::appointments::update),
        )
        .route("/appointments/:id/approve", post(endpoints::appointments::approve))
        .route("/appointments/:id/reject", post(endpoints::appointments::reject))
        .route("/appointments/:id/cancel", post(endpoints::appointments::cancel))
        .route("/appointments/:id/complete", post(endpoints::appointments::complete))
        .route(
            "/appointments/:id/treatments",
            get(endpoints::appointments::treatments).post(endpoints::appointments::add_treatments),
        )
        // Treatment catalogue
        .route(
            "/treatments",
            get(endpoints::treatments::list).post(endpoints::treatments::create),
        )
        .route(
            "/treatments/:id",
            get(endpoints::treatments::detail)
                .put(endpoints::treatments::update)
                .delete(endpoints::treatments::deactivate),
        )
        // Billing
        .route("/invoices", get(endpoints::invoices::list).post(endpoints::invoices::create))
        .route("/invoices/:id", get(endpoints::invoices::detail))
        .route("/invoices/:id/cancel", post(endpoints::invoices::cancel))
        .route("/invoices/:id/pdf", get(endpoints::invoices::pdf))
        .route(
            "/invoices/:id/payments",
            get(endpoints::invoices::payments).post(endpoints::invoices::add_payment),
        )
        // Insurance
        .route("/insurance/policies", post(endpoints::insurance::create_policy))
        .route(
            "/insurance/policies/:id",
            put(endpoints::insurance::update_policy).delete(endpoints::insurance::deactivate_policy),
        )
        .route("/insurance/coverage", get(endpoints::insurance::coverage))
        .route(
            "/insurance/claims",
            get(endpoints::insurance::list_claims).post(endpoints::insurance::submit_claim),
        )
        .route("/insurance/claims/:id", get(endpoints::insurance::claim_detail))
        .route("/insurance/claims/:id/review", post(endpoints::insurance::review_claim))
        .route("/insurance/claims/:id/approve", post(endpoints::insurance::approve_claim))
        .route("/insurance/claims/:id/reject", post(endpoints::insurance::reject_claim))
        .route("/insurance/claims/:id/pay", post(endpoints::insurance::pay_claim))
        // Audit & reports
        .route("/audit", get(endpoints::audit::list))
        .route("/reports/dashboard", get(endpoints::reports::dashboard))
        .route("/reports/revenue", get(endpoints::reports::revenue))
        .route("/reports/doctor-workload", get(endpoints::reports::doctor_workload))
        .with_state(ctx.clone())
        // Middleware stack (innermost first, outermost last):
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes (rate-limited and access-logged, no auth)
    let public = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::Extension(ctx.clone()));

    let config = &ctx.core.config;
    let router = Router::new()
        .nest("/api", protected.merge(public))
        .nest_service("/uploads", ServeDir::new(&config.uploads_dir));

    match config.cors_origin.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        ),
        Some(Err(e)) => {
            tracing::warn!("Ignoring invalid CORS origin: {e}");
            router
        }
        None => router,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use chrono::{Datelike, Duration, Local, NaiveDateTime, Weekday};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::auth;
    use crate::config::AppConfig;
    use crate::db;
    use crate::models::{User, UserRole};

    struct TestApp {
        router: Router,
        core: Arc<CoreState>,
        admin_token: String,
        _dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(CoreState::new(AppConfig::for_data_dir(dir.path())));
        let conn = core.open_db().unwrap();
        let now = chrono::Utc::now();
        let admin = User {
            id: Uuid::new_v4(),
            email: "admin@clinic.test".into(),
            password_hash: auth::hash_password("admin-password"),
            full_name: "Ada Admin".into(),
            phone: None,
            role: UserRole::SystemAdministrator,
            staff_title_id: None,
            branch_id: None,
            profile_picture: None,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        db::insert_user(&conn, &admin).unwrap();
        let admin_token = auth::issue_session(&conn, &admin, 24).unwrap();
        TestApp {
            router: api_router(core.clone()),
            core,
            admin_token,
            _dir: dir,
        }
    }

    async fn call(app: &TestApp, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// A weekday at 10:00 at least a week out.
    fn next_weekday_slot() -> NaiveDateTime {
        let mut date = Local::now().date_naive() + Duration::days(7);
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date += Duration::days(1);
        }
        date.and_hms_opt(10, 0, 0).unwrap()
    }

    async fn create_branch(app: &TestApp) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/api/branches",
            Some(&app.admin_token),
            Some(json!({"name": format!("Downtown {}", Uuid::new_v4()), "address": "1 Main St"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_staff(app: &TestApp, email: &str, role: &str, branch: &str) -> (String, String) {
        let (status, body) = call(
            app,
            "POST",
            "/api/users",
            Some(&app.admin_token),
            Some(json!({
                "email": email,
                "password": "staff-password",
                "full_name": "Staff Member",
                "role": role,
                "branch_id": branch,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["id"].as_str().unwrap().to_string();
        let (status, login) = call(
            app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": email, "password": "staff-password"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (id, login["token"].as_str().unwrap().to_string())
    }

    async fn register_patient(app: &TestApp, branch: &str) -> (String, String) {
        let (status, body) = call(
            app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "email": "pat@example.com",
                "password": "patient-password",
                "first_name": "Pat",
                "last_name": "Patient",
                "date_of_birth": "1990-01-01",
                "phone": "+15550001",
                "branch_id": branch,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["patient"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app();
        let (status, body) = call(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let app = test_app();
        let (status, body) = call(&app, "GET", "/api/patients", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "AUTH_REQUIRED");

        let (status, _) = call(&app, "GET", "/api/patients", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = test_app();
        let (status, _) = call(&app, "GET", "/api/nonexistent", Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn login_rejects_bad_password_and_logout_revokes() {
        let app = test_app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "admin@clinic.test", "password": "wrong-password"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");

        let (status, me) = call(&app, "GET", "/api/auth/me", Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["role"], "system_administrator");
        assert!(me["user"].get("password_hash").is_none());

        let (status, _) = call(&app, "POST", "/api/auth/logout", Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", "/api/auth/me", Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn patient_booking_flow() {
        let app = test_app();
        let branch = create_branch(&app).await;
        let (doctor_id, doctor_token) = create_staff(&app, "doc@clinic.test", "doctor", &branch).await;
        let (patient_id, patient_token) = register_patient(&app, &branch).await;

        let slot = next_weekday_slot();
        let (status, appt) = call(
            &app,
            "POST",
            "/api/appointments",
            Some(&patient_token),
            Some(json!({
                "doctor_id": doctor_id,
                "scheduled_at": slot.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "reason": "Checkup",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{appt}");
        assert_eq!(appt["status"], "pending");
        assert_eq!(appt["patient_id"], patient_id.as_str());
        let appt_id = appt["id"].as_str().unwrap().to_string();

        // Same doctor, 15 minutes later: conflict.
        let (status, _) = call(
            &app,
            "POST",
            "/api/appointments",
            Some(&patient_token),
            Some(json!({
                "doctor_id": doctor_id,
                "scheduled_at": (slot + Duration::minutes(15)).format("%Y-%m-%dT%H:%M:%S").to_string(),
                "reason": "Second",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Patients cannot approve their own booking.
        let uri = format!("/api/appointments/{appt_id}/approve");
        let (status, _) = call(&app, "POST", &uri, Some(&patient_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, approved) = call(&app, "POST", &uri, Some(&doctor_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["status"], "approved");

        // Approved → approved is not a valid transition.
        let (status, _) = call(&app, "POST", &uri, Some(&doctor_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, mine) = call(&app, "GET", "/api/appointments", Some(&patient_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);

        let uri = format!("/api/appointments/{appt_id}/cancel");
        let (status, cancelled) = call(&app, "POST", &uri, Some(&patient_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");
    }

    #[tokio::test]
    async fn weekend_booking_is_rejected() {
        let app = test_app();
        let branch = create_branch(&app).await;
        let (doctor_id, _) = create_staff(&app, "doc@clinic.test", "doctor", &branch).await;
        let (_, patient_token) = register_patient(&app, &branch).await;

        let mut date = Local::now().date_naive() + Duration::days(7);
        while date.weekday() != Weekday::Sat {
            date += Duration::days(1);
        }
        let (status, body) = call(
            &app,
            "POST",
            "/api/appointments",
            Some(&patient_token),
            Some(json!({
                "doctor_id": doctor_id,
                "scheduled_at": format!("{date}T10:00:00"),
                "reason": "Weekend",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn invoice_payment_and_pdf() {
        let app = test_app();
        let branch = create_branch(&app).await;
        let (_, clerk_token) = create_staff(&app, "desk@clinic.test", "receptionist", &branch).await;
        let (patient_id, patient_token) = register_patient(&app, &branch).await;

        let (status, invoice) = call(
            &app,
            "POST",
            "/api/invoices",
            Some(&clerk_token),
            Some(json!({
                "patient_id": patient_id,
                "items": [{"description": "Consultation", "unit_price_cents": 5000, "quantity": 2}],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{invoice}");
        assert_eq!(invoice["total_cents"], 10000);
        assert_eq!(invoice["status"], "unpaid");
        let invoice_id = invoice["id"].as_str().unwrap().to_string();

        let pay_uri = format!("/api/invoices/{invoice_id}/payments");
        let (status, _) = call(
            &app,
            "POST",
            &pay_uri,
            Some(&clerk_token),
            Some(json!({"amount_cents": 20000, "method": "cash"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, paid) = call(
            &app,
            "POST",
            &pay_uri,
            Some(&clerk_token),
            Some(json!({"amount_cents": 4000, "method": "card"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(paid["invoice"]["status"], "partially_paid");

        // The patient can read their own invoice but not record payments.
        let (status, detail) = call(&app, "GET", &format!("/api/invoices/{invoice_id}"), Some(&patient_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["balance_cents"], 6000);
        assert_eq!(detail["payments"].as_array().unwrap().len(), 1);
        let (status, _) = call(
            &app,
            "POST",
            &pay_uri,
            Some(&patient_token),
            Some(json!({"amount_cents": 100, "method": "cash"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let request = Request::builder()
            .uri(format!("/api/invoices/{invoice_id}/pdf"))
            .header("Authorization", format!("Bearer {clerk_token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/pdf");
        let bytes = axum::body::to_bytes(response.into_body(), 4 * 1024 * 1024).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn branch_with_staff_cannot_be_removed() {
        let app = test_app();
        let branch = create_branch(&app).await;
        let (doctor_id, _) = create_staff(&app, "doc@clinic.test", "doctor", &branch).await;

        let uri = format!("/api/branches/{branch}");
        let (status, _) = call(&app, "DELETE", &uri, Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "DELETE", &format!("/api/users/{doctor_id}"), Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "DELETE", &uri, Some(&app.admin_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted() {
        let app = test_app();
        let (_, me) = call(&app, "GET", "/api/auth/me", Some(&app.admin_token), None).await;
        let uri = format!("/api/users/{}", me["user"]["id"].as_str().unwrap());
        let (status, _) = call(&app, "PUT", &uri, Some(&app.admin_token), Some(json!({"role": "doctor"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn branch_roles_cannot_be_left_without_a_branch() {
        let app = test_app();
        let (status, doctor) = call(
            &app,
            "POST",
            "/api/users",
            Some(&app.admin_token),
            Some(json!({
                "email": "roaming@clinic.test",
                "password": "staff-password",
                "full_name": "Roaming Doctor",
                "role": "doctor",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{doctor}");
        let uri = format!("/api/users/{}", doctor["id"].as_str().unwrap());
        let (status, _) = call(&app, "PUT", &uri, Some(&app.admin_token), Some(json!({"role": "receptionist"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // An account already in that state sees nothing instead of every branch.
        let conn = app.core.open_db().unwrap();
        let floating = db::repository::fixtures::user(&conn, "float@clinic.test", UserRole::Receptionist, None);
        let token = auth::issue_session(&conn, &floating, 24).unwrap();
        for uri in ["/api/appointments", "/api/patients", "/api/invoices"] {
            let (status, _) = call(&app, "GET", uri, Some(&token), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn receptionist_cannot_manage_users() {
        let app = test_app();
        let branch = create_branch(&app).await;
        let (_, clerk_token) = create_staff(&app, "desk@clinic.test", "receptionist", &branch).await;
        let (status, _) = call(
            &app,
            "POST",
            "/api/users",
            Some(&clerk_token),
            Some(json!({
                "email": "x@clinic.test",
                "password": "long-enough",
                "full_name": "X",
                "role": "doctor",
                "branch_id": branch,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, "GET", "/api/audit", Some(&clerk_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn profile_picture_upload_is_served() {
        let app = test_app();
        let me = call(&app, "GET", "/api/auth/me", Some(&app.admin_token), None).await.1;
        let id = me["user"]["id"].as_str().unwrap().to_string();

        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let data = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        );
        let uri = format!("/api/users/{id}/picture");
        let (status, user) = call(&app, "POST", &uri, Some(&app.admin_token), Some(json!({"data": data}))).await;
        assert_eq!(status, StatusCode::OK, "{user}");
        let url = user["profile_picture"].as_str().unwrap().to_string();
        assert!(url.starts_with("/uploads/") && url.ends_with(".png"));

        let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let pdf = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4");
        let (status, _) = call(&app, "POST", &uri, Some(&app.admin_token), Some(json!({"data": pdf}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn picture_size_limit_is_enforced_by_the_handler() {
        let app = test_app();
        let me = call(&app, "GET", "/api/auth/me", Some(&app.admin_token), None).await.1;
        let uri = format!("/api/users/{}/picture", me["user"]["id"].as_str().unwrap());
        let png_of = |len: usize| {
            let mut bytes = vec![0u8; len];
            bytes[..8].copy_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
            format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(&bytes)
            )
        };

        let (status, body) = call(&app, "POST", &uri, Some(&app.admin_token), Some(json!({"data": png_of(2_000_000)}))).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = call(&app, "POST", &uri, Some(&app.admin_token), Some(json!({"data": png_of(2 * 1024 * 1024 + 1)}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }

    #[tokio::test]
    async fn mutations_are_audited() {
        let app = test_app();
        create_branch(&app).await;
        let (status, entries) = call(
            &app,
            "GET",
            "/api/audit?entity_type=branch",
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entries = entries.as_array().unwrap();
        assert!(entries.iter().any(|e| e["action"] == "create"));
    }

    #[tokio::test]
    async fn refused_requests_are_audited() {
        let app = test_app();
        let (status, _) = call(&app, "GET", "/api/patients", Some("not-a-session"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        call(&app, "GET", "/api/branches", Some(&app.admin_token), None).await;

        let (_, entries) = call(
            &app,
            "GET",
            "/api/audit?entity_type=http_request",
            Some(&app.admin_token),
            None,
        )
        .await;
        let entries = entries.as_array().unwrap();
        assert!(entries
            .iter()
            .any(|e| e["action"] == "GET /api/patients" && e["details"] == "status:401" && e["user_id"].is_null()));
        assert!(entries
            .iter()
            .any(|e| e["action"] == "GET /api/branches" && e["details"] == "status:200" && !e["user_id"].is_null()));
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(CoreState::new(AppConfig::for_data_dir(dir.path())));
        let ctx = ApiContext {
            core,
            rate_limiter: Arc::new(std::sync::Mutex::new(crate::api::types::RateLimiter::with_limits(2, 100))),
        };
        let router = api_router_with_ctx(ctx);
        for expected in [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS] {
            let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), expected);
            if expected == StatusCode::TOO_MANY_REQUESTS {
                assert_eq!(response.headers()["retry-after"], "60");
            }
        }
    }

    #[tokio::test]
    async fn dashboard_counts_patients() {
        let app = test_app();
        let branch = create_branch(&app).await;
        register_patient(&app, &branch).await;
        let (status, dash) = call(
            &app,
            "GET",
            &format!("/api/reports/dashboard?branch_id={branch}"),
            Some(&app.admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dash["total_patients"], 1);
        assert_eq!(dash["outstanding_cents"], 0);
        assert!(app.core.config.cors_origin.is_none());
    }

    #[tokio::test]
    async fn doctor_dashboard_is_pinned_and_hides_money() {
        let app = test_app();
        let home = create_branch(&app).await;
        let elsewhere = create_branch(&app).await;
        let (_, doctor_token) = create_staff(&app, "doc@clinic.test", "doctor", &home).await;

        let (status, dash) = call(
            &app,
            "GET",
            &format!("/api/reports/dashboard?branch_id={elsewhere}"),
            Some(&doctor_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dash["branch_id"], home.as_str());
        assert!(dash.get("revenue_this_month_cents").is_none());
        assert!(dash.get("outstanding_cents").is_none());
        assert!(dash.get("claims_by_status").is_none());
    }
}
