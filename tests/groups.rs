use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;
use common::spawn_app;

fn codes(list: &Value, key: &str) -> Vec<String> {
    list.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row[key].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn group_crud_flow() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let (status, body) = app
        .post("/api/groups", &admin, json!({ "code": " rh ", "name": "Recursos humanos" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    assert_eq!(body["data"]["code"], "RH");
    assert_eq!(body["data"]["active"], true);

    let (status, body) = app
        .post("/api/groups", &admin, json!({ "code": "RH", "name": "Outro" }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = app
        .post("/api/groups", &admin, json!({ "code": "R H", "name": "" }))
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["code"].is_array());
    assert!(body["errors"]["name"].is_array());

    let (_, body) = app.get("/api/groups?search=recursos", &admin).await?;
    assert_eq!(body["data"]["recordsTotal"], 2);
    assert_eq!(body["data"]["recordsFiltered"], 1);
    assert_eq!(codes(&body["data"]["data"], "code"), vec!["RH"]);

    let (status, body) = app
        .put("/api/groups/rh", &admin, json!({ "name": "RH", "active": false }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "RH");
    assert_eq!(body["data"]["active"], false);

    let (status, _) = app.delete("/api/groups/RH", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/api/groups/RH", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn admin_group_is_protected() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let (status, _) = app.delete("/api/groups/ADMIN", &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .put("/api/groups/admin", &admin, json!({ "active": false }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // Renaming is still allowed
    let (status, body) = app
        .put("/api/groups/ADMIN", &admin, json!({ "name": "Administradores" }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], true);

    Ok(())
}

#[tokio::test]
async fn grant_rows_are_managed_per_function() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    app.create_group(&admin, "RH").await?;

    let (status, body) = app
        .put(
            "/api/groups/rh/permissions/seg/seg_usuarios",
            &admin,
            json!({ "actions": "ic", "restriction": "P" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "grant failed: {}", body);
    assert_eq!(body["data"]["actions"], "CI");
    assert_eq!(body["data"]["restriction"], "P");

    // Upsert replaces the row
    app.grant(&admin, "RH", "SEG", "SEG_USUARIOS", "ACEI", "C").await?;
    app.grant(&admin, "RH", "SEG", "SEG_BOTOES", "C", "L").await?;

    let (status, body) = app.get("/api/groups/RH/permissions", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["function_code"], "SEG_BOTOES");
    assert_eq!(rows[1]["function_code"], "SEG_USUARIOS");
    assert_eq!(rows[1]["actions"], "ACEI");
    assert_eq!(rows[1]["restriction"], "C");

    // Bad letters and empty sets
    for actions in ["XZ", "", "  "] {
        let (status, body) = app
            .put(
                "/api/groups/RH/permissions/SEG/SEG_USUARIOS",
                &admin,
                json!({ "actions": actions, "restriction": "L" }),
            )
            .await?;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{actions:?} accepted");
        assert!(body["errors"]["actions"].is_array());
    }

    let (status, body) = app
        .put(
            "/api/groups/RH/permissions/SEG/SEG_USUARIOS",
            &admin,
            json!({ "actions": "C", "restriction": "Z" }),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["restriction"].is_array());

    let (status, _) = app
        .put(
            "/api/groups/RH/permissions/SEG/SEG_NADA",
            &admin,
            json!({ "actions": "C", "restriction": "L" }),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .put(
            "/api/groups/NOPE/permissions/SEG/SEG_USUARIOS",
            &admin,
            json!({ "actions": "C", "restriction": "L" }),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Removal
    let (status, body) = app.delete("/api/groups/RH/permissions/SEG/SEG_BOTOES", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "grant removed");
    let (status, _) = app.delete("/api/groups/RH/permissions/SEG/SEG_BOTOES", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/groups/RH/permissions", &admin).await?;
    assert_eq!(codes(&body["data"], "function_code"), vec!["SEG_USUARIOS"]);

    Ok(())
}

#[tokio::test]
async fn members_are_listed_and_cascade_on_delete() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    app.create_group(&admin, "RH").await?;
    app.create_group(&admin, "FIN").await?;

    let bia = app.create_user(&admin, "bia", &["RH", "FIN"]).await?;
    app.create_user(&admin, "ana", &["RH"]).await?;
    let gone = app.create_user(&admin, "gone", &["RH"]).await?;
    app.delete(&format!("/api/users/{}", gone), &admin).await?;
    let idle = app.create_user(&admin, "idle", &["RH"]).await?;
    let (status, _) = app
        .put(&format!("/api/users/{}", idle), &admin, json!({ "active": false }))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/groups/RH/users", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(codes(&body["data"], "login"), vec!["ana", "bia"]);

    let (status, _) = app.get("/api/groups/NOPE/users", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete("/api/groups/RH", &admin).await?;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get(&format!("/api/users/{}", bia), &admin).await?;
    assert_eq!(body["data"]["groups"], json!(["FIN"]));

    Ok(())
}

#[tokio::test]
async fn search_treats_wildcards_literally() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;
    app.create_group(&admin, "RH_GESTAO").await?;
    app.create_group(&admin, "RHXGESTAO").await?;

    let (status, body) = app.get("/api/groups?search=RH_GES", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recordsTotal"], 3);
    assert_eq!(body["data"]["recordsFiltered"], 1);
    assert_eq!(codes(&body["data"]["data"], "code"), vec!["RH_GESTAO"]);

    let (_, body) = app.get("/api/groups?search%5Bvalue%5D=%25", &admin).await?;
    assert_eq!(body["data"]["recordsFiltered"], 0);

    let (_, body) = app.get("/api/systems?search=SEG_", &admin).await?;
    assert_eq!(body["data"]["recordsFiltered"], 0);

    Ok(())
}
