//! Shared harness for HTTP-level tests
//!
//! Drives the full router in-process against an in-memory database.
#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use carepath::{
    config::BootstrapAdminConfig, server::build_router, AppContext, ServerConfig,
};
use chrono::{Datelike, Days, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "root@uni.edu";
pub const ADMIN_PASSWORD: &str = "admin-password-1";
pub const ENROLLMENT_PASSWORD: &str = "ChangeMe123!";

pub struct TestPortal {
    pub ctx: AppContext,
    pub router: Router,
}

impl TestPortal {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::for_testing("/tmp/carepath-http".into())).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let ctx = AppContext::in_memory(config).await.unwrap();
        ctx.enrollment
            .bootstrap_admin(&BootstrapAdminConfig {
                email: ADMIN_EMAIL.to_string(),
                password: ADMIN_PASSWORD.to_string(),
            })
            .await
            .unwrap();
        let router = build_router(ctx.clone());
        Self { ctx, router }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    pub async fn send_raw(&self, method: Method, uri: &str, token: &str, raw: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(raw.to_string()))
            .unwrap();
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn login(&self, email: &str, password: &str, role: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": email, "password": password, "role": role })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["accessToken"].as_str().unwrap().to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD, "admin").await
    }

    /// Enroll a psychologist through the admin API and log in as them
    pub async fn psychologist(&self, admin_token: &str, email: &str) -> Participant {
        let (status, body) = self
            .post(
                "/admin/psychologists",
                admin_token,
                json!({
                    "contactInfo": { "email": email },
                    "personalInfo": { "firstName": "Pat", "lastName": "Lee" },
                    "professionalInfo": { "specialization": "Anxiety", "qualifications": ["PsyD"] }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "enroll failed: {}", body);
        let id = body["account"]["id"].as_str().unwrap().to_string();
        let token = self.login(email, ENROLLMENT_PASSWORD, "psychologist").await;
        Participant { id, token }
    }

    /// Enroll a student under a psychologist and log in as them
    pub async fn student(&self, psychologist: &Participant, email: &str, number: &str) -> Participant {
        let (status, body) = self
            .post(
                "/psychologists/students/enroll",
                &psychologist.token,
                json!({
                    "contactInfo": { "email": email },
                    "personalInfo": { "firstName": "Sam", "lastName": "Ray" },
                    "academicInfo": { "studentNumber": number, "yearOfStudy": 2 }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "enroll failed: {}", body);
        let id = body["account"]["id"].as_str().unwrap().to_string();
        let token = self.login(email, ENROLLMENT_PASSWORD, "student").await;
        Participant { id, token }
    }
}

pub struct Participant {
    pub id: String,
    pub token: String,
}

/// A date one week ahead and its Sunday-based weekday
pub fn next_week() -> (String, u32) {
    let date = Utc::now().date_naive() + Days::new(7);
    (
        date.format("%Y-%m-%d").to_string(),
        date.weekday().num_days_from_sunday(),
    )
}
