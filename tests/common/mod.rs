#![allow(dead_code)]

use std::path::Path;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use hr_admin::authz::AuthzMode;
use hr_admin::db::{self, seed};
use hr_admin::jwt::JwtConfig;
use hr_admin::{create_app_with_config, AppConfig};

pub const ADMIN_LOGIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const USER_PASSWORD: &str = "user-password";

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub admin_id: i64,
    // Keeps the database file alive for the duration of the test.
    _dir: TempDir,
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with_mode(AuthzMode::Strict).await
}

pub async fn spawn_app_with_mode(mode: AuthzMode) -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let pool = test_pool(dir.path()).await?;

    let admin_id = seed::create_admin(&pool, ADMIN_LOGIN, "Administrator", ADMIN_PASSWORD).await?;

    let mut config = AppConfig::new(JwtConfig::new("test-secret"));
    config.authz_mode = mode;
    let router = create_app_with_config(pool.clone(), config).await?;

    Ok(TestApp {
        router,
        pool,
        admin_id,
        _dir: dir,
    })
}

/// File-backed SQLite with the server's connection settings and every migration applied.
pub async fn test_pool(dir: &Path) -> Result<SqlitePool> {
    let opts = db::configure(SqliteConnectOptions::new().filename(dir.join("test.db")));
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.router.clone().oneshot(req).await?;
        let status = resp.status();
        let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&body_bytes)))?
        };
        Ok((status, value))
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    /// Logs in and returns the bearer token.
    pub async fn login(&self, login: &str, password: &str) -> Result<String> {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "login": login, "password": password })),
            )
            .await?;
        if status != StatusCode::OK {
            panic!("login of '{}' failed: {} - {}", login, status, body);
        }
        body["data"]["token"]
            .as_str()
            .map(String::from)
            .context("missing token")
    }

    pub async fn admin_token(&self) -> Result<String> {
        self.login(ADMIN_LOGIN, ADMIN_PASSWORD).await
    }

    pub async fn create_group(&self, token: &str, code: &str) -> Result<()> {
        let (status, body) = self
            .post("/api/groups", token, json!({ "code": code, "name": format!("Group {}", code) }))
            .await?;
        if status != StatusCode::CREATED {
            panic!("group create failed: {} - {}", status, body);
        }
        Ok(())
    }

    pub async fn grant(
        &self,
        token: &str,
        group: &str,
        system: &str,
        function: &str,
        actions: &str,
        restriction: &str,
    ) -> Result<()> {
        let uri = format!("/api/groups/{}/permissions/{}/{}", group, system, function);
        let (status, body) = self
            .put(&uri, token, json!({ "actions": actions, "restriction": restriction }))
            .await?;
        if status != StatusCode::OK {
            panic!("grant failed: {} - {}", status, body);
        }
        Ok(())
    }

    /// Creates an active user with [`USER_PASSWORD`]; returns the id.
    pub async fn create_user(&self, token: &str, login: &str, groups: &[&str]) -> Result<i64> {
        let (status, body) = self
            .post(
                "/api/users",
                token,
                json!({
                    "login": login,
                    "name": format!("User {}", login),
                    "password": USER_PASSWORD,
                    "groups": groups,
                }),
            )
            .await?;
        if status != StatusCode::CREATED {
            panic!("user create failed: {} - {}", status, body);
        }
        body["data"]["id"].as_i64().context("missing user id")
    }
}
