use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;
use common::{spawn_app, TestApp, USER_PASSWORD};

async fn create_button(app: &TestApp, token: &str, function: &str, label: &str, action: &str, order: i64) -> Result<i64> {
    let (status, body) = app
        .post(
            "/api/buttons",
            token,
            json!({
                "system_code": "seg",
                "function_code": function,
                "label": label,
                "action": action,
                "icon": "fa-circle",
                "sort_order": order
            }),
        )
        .await?;
    if status != StatusCode::CREATED {
        panic!("button create failed: {} - {}", status, body);
    }
    Ok(body["data"]["id"].as_i64().unwrap_or_default())
}

fn labels(list: &Value) -> Vec<String> {
    list.as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row["label"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn button_crud_flow() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let id = create_button(&app, &admin, "seg_usuarios", "Novo", "I", 1).await?;
    create_button(&app, &admin, "SEG_USUARIOS", "Excluir", "E", 2).await?;
    create_button(&app, &admin, "SEG_BOTOES", "Novo botao", "I", 1).await?;

    let (status, body) = app.get(&format!("/api/buttons/{}", id), &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["system_code"], "SEG");
    assert_eq!(body["data"]["function_code"], "SEG_USUARIOS");
    assert_eq!(body["data"]["action"], "I");
    assert_eq!(body["data"]["active"], true);

    // -- grid narrowed to one function
    let (status, body) = app
        .get("/api/buttons?system=SEG&function=seg_usuarios&draw=2", &admin)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["draw"], 2);
    assert_eq!(body["data"]["recordsTotal"], 2);
    assert_eq!(labels(&body["data"]["data"]), vec!["Novo", "Excluir"]);

    let (_, body) = app.get("/api/buttons?search%5Bvalue%5D=botao", &admin).await?;
    assert_eq!(body["data"]["recordsTotal"], 3);
    assert_eq!(body["data"]["recordsFiltered"], 1);

    // -- update
    let (status, body) = app
        .put(
            &format!("/api/buttons/{}", id),
            &admin,
            json!({ "label": "Incluir", "action": "I", "sort_order": 5 }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "update failed: {}", body);
    assert_eq!(body["data"]["label"], "Incluir");
    assert_eq!(body["data"]["sort_order"], 5);
    assert_eq!(body["data"]["icon"], "fa-circle");

    // -- delete
    let (status, body) = app.delete(&format!("/api/buttons/{}", id), &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "button deleted");
    let (status, _) = app.get(&format!("/api/buttons/{}", id), &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn button_payloads_are_validated() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    let (status, body) = app
        .post(
            "/api/buttons",
            &admin,
            json!({ "system_code": "SEG", "function_code": "SEG_USUARIOS", "label": "Novo", "action": "X" }),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["action"].is_array(), "body: {}", body);

    let (status, body) = app
        .post(
            "/api/buttons",
            &admin,
            json!({ "system_code": "SEG", "function_code": "SEG_NADA", "label": "Novo", "action": "I" }),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["function_code"].is_array(), "body: {}", body);

    let (status, body) = app
        .post(
            "/api/buttons",
            &admin,
            json!({ "system_code": "SEG", "function_code": "SEG_USUARIOS", "label": " ", "action": "C" }),
        )
        .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["label"].is_array());

    Ok(())
}

#[tokio::test]
async fn visible_buttons_follow_grants() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    create_button(&app, &admin, "SEG_USUARIOS", "Consultar", "C", 0).await?;
    let novo = create_button(&app, &admin, "SEG_USUARIOS", "Novo", "I", 1).await?;
    create_button(&app, &admin, "SEG_USUARIOS", "Editar", "A", 2).await?;
    create_button(&app, &admin, "SEG_USUARIOS", "Excluir", "E", 3).await?;

    app.create_group(&admin, "RH").await?;
    app.grant(&admin, "RH", "SEG", "SEG_USUARIOS", "CI", "P").await?;
    app.create_user(&admin, "visual", &["RH"]).await?;
    let token = app.login("visual", USER_PASSWORD).await?;

    let uri = "/api/buttons/visible?system=seg&function=seg_usuarios";
    let (status, body) = app.get(uri, &token).await?;
    assert_eq!(status, StatusCode::OK, "visible failed: {}", body);
    assert_eq!(labels(&body["data"]), vec!["Consultar", "Novo"]);

    // The administrator holds every letter
    let (_, body) = app.get(uri, &admin).await?;
    assert_eq!(labels(&body["data"]), vec!["Consultar", "Novo", "Editar", "Excluir"]);

    // Inactive buttons are hidden from everyone
    let (status, _) = app
        .put(&format!("/api/buttons/{}", novo), &admin, json!({ "active": false }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get(uri, &token).await?;
    assert_eq!(labels(&body["data"]), vec!["Consultar"]);

    // No access to the function at all
    let (status, _) = app
        .get("/api/buttons/visible?system=SEG&function=SEG_BOTOES", &token)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn functions_with_buttons_cannot_be_deleted() -> Result<()> {
    let app = spawn_app().await?;
    let admin = app.admin_token().await?;

    app.post("/api/systems", &admin, json!({ "code": "PONTO", "name": "Ponto" }))
        .await?;
    app.post("/api/systems/PONTO/functions", &admin, json!({ "code": "PON_ESPELHO", "name": "Espelho" }))
        .await?;

    let (status, body) = app
        .post(
            "/api/buttons",
            &admin,
            json!({ "system_code": "PONTO", "function_code": "PON_ESPELHO", "label": "Imprimir", "action": "C" }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    let id = body["data"]["id"].as_i64().unwrap_or_default();

    let (status, _) = app.delete("/api/systems/PONTO/functions/PON_ESPELHO", &admin).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    app.delete(&format!("/api/buttons/{}", id), &admin).await?;
    let (status, _) = app.delete("/api/systems/PONTO/functions/PON_ESPELHO", &admin).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}
