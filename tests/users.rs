use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

mod common;
use common::{spawn_app, TestApp, USER_PASSWORD};

fn logins(page: &Value) -> Vec<String> {
    page["data"]["data"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row["login"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn user_crud_flow() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    app.create_group(&admin, "RH").await?;

    // -- create
    let (status, body) = app
        .post(
            "/api/users",
            &admin,
            json!({
                "login": "MSouza",
                "name": "Maria Souza",
                "email": "maria@example.com",
                "password": USER_PASSWORD,
                "groups": ["rh"]
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    let id = body["data"]["id"].as_i64().unwrap_or_default();
    assert_eq!(body["data"]["login"], "msouza");
    assert_eq!(body["data"]["groups"], json!(["RH"]));
    assert!(body["data"].get("password_hash").is_none());

    // -- duplicate login, whatever the case
    let (status, _) = app
        .post(
            "/api/users",
            &admin,
            json!({ "login": "msouza", "name": "Outra", "password": USER_PASSWORD, "groups": [] }),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // -- get / update
    let (status, body) = app.get(&format!("/api/users/{}", id), &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "maria@example.com");

    let (status, body) = app
        .put(&format!("/api/users/{}", id), &admin, json!({ "name": "Maria S. Souza" }))
        .await?;
    assert_eq!(status, StatusCode::OK, "update failed: {}", body);
    assert_eq!(body["data"]["name"], "Maria S. Souza");
    assert_eq!(body["data"]["email"], "maria@example.com");

    // -- search
    let (status, body) = app.get("/api/users?search%5Bvalue%5D=souza", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logins(&body), vec!["msouza".to_string()]);
    assert_eq!(body["data"]["recordsTotal"], 2);
    assert_eq!(body["data"]["recordsFiltered"], 1);

    // -- password reset
    let (status, _) = app
        .post(&format!("/api/users/{}/password", id), &admin, json!({ "new_password": "reset-password" }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    app.login("msouza", "reset-password").await?;

    // -- soft delete
    let (status, body) = app.delete(&format!("/api/users/{}", id), &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "user deleted");

    let (status, _) = app.get(&format!("/api/users/{}", id), &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "login": "msouza", "password": "reset-password" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The login stays reserved
    let (status, _) = app
        .post(
            "/api/users",
            &admin,
            json!({ "login": "msouza", "name": "Nova", "password": USER_PASSWORD, "groups": [] }),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn user_payloads_are_validated() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let (status, body) = app
        .post(
            "/api/users",
            &admin,
            json!({
                "login": "has space",
                "name": "",
                "email": "not-an-email",
                "password": "short",
                "groups": []
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    for field in ["login", "name", "email", "password"] {
        assert!(body["errors"][field].is_array(), "missing error for {}: {}", field, body);
    }

    let (status, body) = app
        .post(
            "/api/users",
            &admin,
            json!({ "login": "fantasma", "name": "Fantasma", "password": USER_PASSWORD, "groups": ["NOPE"] }),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["groups[0]"].is_array(), "body: {}", body);

    Ok(())
}

#[tokio::test]
async fn administrators_cannot_remove_themselves() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    let me = format!("/api/users/{}", app.admin_id);

    let (status, _) = app.delete(&me, &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.put(&me, &admin, json!({ "active": false })).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.get(&me, &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], true);

    Ok(())
}

async fn scoped_world(app: &TestApp, admin: &str) -> Result<()> {
    app.create_group(admin, "RH").await?;
    app.create_group(admin, "FIN").await?;
    app.grant(admin, "RH", "SEG", "SEG_USUARIOS", "CA", "P").await?;
    app.grant(admin, "FIN", "SEG", "SEG_USUARIOS", "C", "C").await?;
    app.create_user(admin, "ana", &["RH"]).await?;
    app.create_user(admin, "bia", &["RH"]).await?;
    app.create_user(admin, "caio", &["FIN"]).await?;
    Ok(())
}

#[tokio::test]
async fn restriction_levels_scope_user_visibility() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    scoped_world(&app, &admin).await?;

    // Liberal: everyone
    let (_, body) = app.get("/api/users", &admin).await?;
    assert_eq!(logins(&body), vec!["admin", "ana", "bia", "caio"]);

    // Partial: users sharing a group
    let ana = app.login("ana", USER_PASSWORD).await?;
    let (status, body) = app.get("/api/users", &ana).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logins(&body), vec!["ana", "bia"]);
    assert_eq!(body["data"]["recordsTotal"], 2);

    // Closed: only the caller
    let caio = app.login("caio", USER_PASSWORD).await?;
    let (_, body) = app.get("/api/users", &caio).await?;
    assert_eq!(logins(&body), vec!["caio"]);

    Ok(())
}

#[tokio::test]
async fn hidden_users_look_missing() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    scoped_world(&app, &admin).await?;

    let ids: Vec<(String, i64)> = sqlx::query_as("SELECT login, id FROM users ORDER BY login")
        .fetch_all(&app.pool)
        .await?;
    let id_of = |login: &str| ids.iter().find(|(l, _)| l == login).map(|(_, id)| *id).unwrap_or_default();

    let ana = app.login("ana", USER_PASSWORD).await?;

    let (status, _) = app.get(&format!("/api/users/{}", id_of("bia")), &ana).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&format!("/api/users/{}", id_of("caio")), &ana).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Alter within scope is fine, outside it the row does not exist
    let (status, _) = app
        .put(&format!("/api/users/{}", id_of("bia")), &ana, json!({ "name": "Bia Lima" }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .put(&format!("/api/users/{}", id_of("caio")), &ana, json!({ "name": "Caio" }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // No E letter, no delete
    let (status, _) = app.delete(&format!("/api/users/{}", id_of("bia")), &ana).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn membership_cannot_reach_beyond_the_callers_groups() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    app.create_group(&admin, "HELP").await?;
    app.grant(&admin, "HELP", "SEG", "SEG_USUARIOS", "CAI", "L").await?;
    let helpdesk = app.create_user(&admin, "helpdesk", &["HELP"]).await?;
    let other = app.create_user(&admin, "outro", &[]).await?;
    let token = app.login("helpdesk", USER_PASSWORD).await?;

    // Own membership is off limits, even for groups already held
    let (status, body) = app
        .put(&format!("/api/users/{}/groups", helpdesk), &token, json!({ "groups": ["HELP", "ADMIN"] }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "unexpected: {}", body);

    // Groups the caller is not in cannot be handed out
    let (status, _) = app
        .put(&format!("/api/users/{}/groups", other), &token, json!({ "groups": ["ADMIN"] }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .post(
            "/api/users",
            &token,
            json!({ "login": "cumplice", "name": "Cumplice", "password": USER_PASSWORD, "groups": ["ADMIN"] }),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Own groups are fine
    let (status, body) = app
        .put(&format!("/api/users/{}/groups", other), &token, json!({ "groups": ["HELP"] }))
        .await?;
    assert_eq!(status, StatusCode::OK, "assign failed: {}", body);
    assert_eq!(body["data"]["groups"], json!(["HELP"]));

    let (_, body) = app.get(&format!("/api/users/{}", helpdesk), &admin).await?;
    assert_eq!(body["data"]["groups"], json!(["HELP"]));
    let (status, _) = app.get("/api/groups", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Group administrators may assign any group
    let (status, _) = app
        .put(&format!("/api/users/{}/groups", other), &admin, json!({ "groups": ["ADMIN"] }))
        .await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn email_can_be_cleared() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    let id = app.create_user(&admin, "semmail", &[]).await?;
    let uri = format!("/api/users/{}", id);

    let (status, body) = app.put(&uri, &admin, json!({ "email": "semmail@example.com" })).await?;
    assert_eq!(status, StatusCode::OK, "update failed: {}", body);
    assert_eq!(body["data"]["email"], "semmail@example.com");

    // Omitted keeps it
    let (_, body) = app.put(&uri, &admin, json!({ "name": "Sem Mail" })).await?;
    assert_eq!(body["data"]["email"], "semmail@example.com");

    let (status, body) = app.put(&uri, &admin, json!({ "email": "  " })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], Value::Null);

    let (_, body) = app.get(&uri, &admin).await?;
    assert_eq!(body["data"]["email"], Value::Null);

    Ok(())
}
