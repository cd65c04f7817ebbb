use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{spawn_app, spawn_app_with_mode, USER_PASSWORD};
use hr_admin::authz::AuthzMode;

#[tokio::test]
async fn system_crud_flow() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    // -- create, code normalised
    let (status, body) = app
        .post(
            "/api/systems",
            &admin,
            json!({ "code": " folha ", "name": "Folha de pagamento", "description": "Calculo mensal" }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    assert_eq!(body["data"]["code"], "FOLHA");
    assert_eq!(body["data"]["active"], true);

    // -- duplicate
    let (status, body) = app
        .post("/api/systems", &admin, json!({ "code": "FOLHA", "name": "Outra" }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    // -- get (path codes normalised too)
    let (status, body) = app.get("/api/systems/folha", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Folha de pagamento");

    // -- update
    let (status, body) = app
        .put("/api/systems/FOLHA", &admin, json!({ "name": "Folha", "active": false }))
        .await?;
    assert_eq!(status, StatusCode::OK, "update failed: {}", body);
    assert_eq!(body["data"]["name"], "Folha");
    assert_eq!(body["data"]["active"], false);
    assert_eq!(body["data"]["description"], "Calculo mensal");

    // -- list (seeded SEG plus FOLHA)
    let (status, body) = app
        .get("/api/systems?draw=4&start=0&length=10&search%5Bvalue%5D=folh", &admin)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["draw"], 4);
    assert_eq!(body["data"]["recordsTotal"], 2);
    assert_eq!(body["data"]["recordsFiltered"], 1);
    assert_eq!(body["data"]["data"][0]["code"], "FOLHA");

    // -- delete
    let (status, body) = app.delete("/api/systems/FOLHA", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap_or_default().contains("FOLHA"));

    let (status, _) = app.get("/api/systems/FOLHA", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn system_codes_are_validated() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let (status, body) = app
        .post("/api/systems", &admin, json!({ "code": "TOO_LONG_CODE", "name": "" }))
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["code"].is_array());
    assert!(body["errors"]["name"].is_array());

    let (status, body) = app
        .post("/api/systems", &admin, json!({ "code": "FO-LHA", "name": "Folha" }))
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["code"].is_array());

    let (status, _) = app.get("/api/systems/FO%20LHA", &admin).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn referenced_systems_and_functions_cannot_be_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    app.post("/api/systems", &admin, json!({ "code": "PONTO", "name": "Ponto" }))
        .await?;
    let (status, body) = app
        .post("/api/systems/PONTO/functions", &admin, json!({ "code": "pon_marcacao", "name": "Marcacao" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "function create failed: {}", body);
    assert_eq!(body["data"]["code"], "PON_MARCACAO");

    let (status, _) = app
        .post("/api/systems/PONTO/functions", &admin, json!({ "code": "PON_MARCACAO", "name": "Outra" }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post("/api/systems/NOPE/functions", &admin, json!({ "code": "X", "name": "X" }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A grant references the function
    app.grant(&admin, "ADMIN", "PONTO", "PON_MARCACAO", "C", "L").await?;

    let (status, _) = app.delete("/api/systems/PONTO/functions/PON_MARCACAO", &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete("/api/systems/PONTO", &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // Once the grant is gone the function and then the system can go
    let (status, _) = app.delete("/api/groups/ADMIN/permissions/PONTO/PON_MARCACAO", &admin).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/systems/PONTO/functions", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    // Deleting the system drops its unreferenced functions with it
    let (status, body) = app.delete("/api/systems/PONTO", &admin).await?;
    assert_eq!(status, StatusCode::OK, "delete failed: {}", body);
    let (status, _) = app.get("/api/systems/PONTO/functions", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete("/api/systems/PONTO/functions/PON_MARCACAO", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn security_system_stays_active() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let (status, _) = app.put("/api/systems/SEG", &admin, json!({ "active": false })).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete("/api/systems/SEG", &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn security_system_survives_without_grants() -> Result<()> {
    let app = spawn_app_with_mode(AuthzMode::Off).await?;
    let admin = app.admin_token().await?;

    for function in ["SEG_SISTEMAS", "SEG_USUARIOS", "SEG_BOTOES", "SEG_GRUPOS", "SEG_AUDITORIA"] {
        let (status, body) = app
            .delete(&format!("/api/groups/ADMIN/permissions/SEG/{}", function), &admin)
            .await?;
        assert_eq!(status, StatusCode::OK, "revoke of {} failed: {}", function, body);
    }

    let (status, body) = app.delete("/api/systems/SEG", &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT, "unexpected: {}", body);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = app.get("/api/systems/SEG/functions", &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(5));

    Ok(())
}

#[tokio::test]
async fn consult_only_callers_cannot_write() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    app.create_group(&admin, "LEITURA").await?;
    app.grant(&admin, "LEITURA", "SEG", "SEG_SISTEMAS", "C", "L").await?;
    app.create_user(&admin, "leitor", &["LEITURA"]).await?;
    let token = app.login("leitor", USER_PASSWORD).await?;

    let (status, _) = app.get("/api/systems/SEG", &token).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .post("/api/systems", &token, json!({ "code": "RH", "name": "RH" }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.put("/api/systems/SEG", &token, json!({ "name": "x" })).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.delete("/api/systems/SEG", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
