use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{authz, models, response, routes};

/// Operations reachable without a bearer token.
const PUBLIC_OPERATIONS: &[(&str, &str)] = &[("/api/health", "get"), ("/api/auth/login", "post")];

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::login,
		routes::auth::refresh,
		routes::auth::me,
		routes::auth::logout,
		routes::auth::permissions,
		routes::auth::check,
		routes::auth::change_password,
		routes::systems::list_systems,
		routes::systems::get_system,
		routes::systems::create_system,
		routes::systems::update_system,
		routes::systems::delete_system,
		routes::systems::list_functions,
		routes::systems::create_function,
		routes::systems::delete_function,
		routes::users::list_users,
		routes::users::get_user,
		routes::users::create_user,
		routes::users::update_user,
		routes::users::delete_user,
		routes::users::reset_password,
		routes::users::set_user_groups,
		routes::buttons::list_buttons,
		routes::buttons::visible_buttons,
		routes::buttons::get_button,
		routes::buttons::create_button,
		routes::buttons::update_button,
		routes::buttons::delete_button,
		routes::groups::list_groups,
		routes::groups::get_group,
		routes::groups::create_group,
		routes::groups::update_group,
		routes::groups::delete_group,
		routes::groups::list_group_permissions,
		routes::groups::set_group_permission,
		routes::groups::delete_group_permission,
		routes::groups::list_group_users,
		routes::audit::list_audit,
		routes::audit::verify_chain
	),
	components(
		schemas(
			response::ErrorDetail,
			authz::Action,
			authz::Restriction,
			authz::FunctionAccess,
			authz::UserPermissions,
			authz::PermissionDecision,
			routes::health::HealthResponse,
			routes::auth::PermissionsResponse,
			routes::audit::ChainVerification,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::UserCreateRequest,
			models::user::UserUpdateRequest,
			models::user::UserGroupsRequest,
			models::user::PasswordChangeRequest,
			models::user::PasswordResetRequest,
			models::system::System,
			models::system::SystemCreateRequest,
			models::system::SystemUpdateRequest,
			models::system::SystemFunction,
			models::system::FunctionCreateRequest,
			models::button::Button,
			models::button::ButtonCreateRequest,
			models::button::ButtonUpdateRequest,
			models::group::Group,
			models::group::GroupCreateRequest,
			models::group::GroupUpdateRequest,
			models::group::GroupPermission,
			models::group::GroupPermissionRequest,
			models::audit::AuditEntry
		)
	),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Auth", description = "Login, tokens and permission queries"),
		(name = "Systems", description = "Systems and their functions"),
		(name = "Users", description = "User administration"),
		(name = "Buttons", description = "UI actions gated by ACEI permissions"),
		(name = "Groups", description = "Groups and their grants"),
		(name = "Audit", description = "Hash-chained audit trail")
	)
)]
pub struct ApiDoc;

/// Every response is wrapped in the envelope; the schemas above describe `data`.
pub fn build_openapi(port: u16, tls: bool) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	mark_public_operations(&mut doc);
	ensure_openapi_version(&mut doc);
	add_examples(&mut doc);
	ensure_servers(&mut doc, port, tls);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn root(doc: &mut Value) -> Option<&mut Map<String, Value>> {
	doc.as_object_mut()
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = root(doc) else { return };
	let components = root.entry("components").or_insert_with(|| json!({}));
	let Some(components) = components.as_object_mut() else { return };
	let schemes = components.entry("securitySchemes").or_insert_with(|| json!({}));
	let Some(schemes) = schemes.as_object_mut() else { return };

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_global_security(doc: &mut Value) {
	if let Some(root) = root(doc) {
		root.entry("security").or_insert_with(|| json!([{ "bearerAuth": [] }]));
	}
}

fn mark_public_operations(doc: &mut Value) {
	for (path, method) in PUBLIC_OPERATIONS {
		if let Some(operation) = doc
			.get_mut("paths")
			.and_then(|paths| paths.get_mut(*path))
			.and_then(|item| item.get_mut(*method))
			.and_then(Value::as_object_mut)
		{
			operation.insert("security".to_string(), json!([]));
		}
	}
}

fn ensure_openapi_version(doc: &mut Value) {
	if let Some(root) = root(doc) {
		root.entry("openapi").or_insert_with(|| Value::String("3.0.3".to_string()));
	}
}

fn add_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_parameter_examples(operation);
					apply_request_examples(operation);
				}
			}
		}
	}
}

fn apply_parameter_examples(operation: &mut Value) {
	let Some(parameters) = operation.get_mut("parameters").and_then(Value::as_array_mut) else { return };

	for parameter in parameters.iter_mut() {
		let example = match parameter.get("name").and_then(Value::as_str) {
			Some("system") => json!("SEG"),
			Some("function") => json!("SEG_USUARIOS"),
			Some("code") => json!("ADMIN"),
			Some("action") => json!("C"),
			Some("id") => json!(1),
			_ => continue,
		};
		if let Some(obj) = parameter.as_object_mut() {
			obj.entry("example").or_insert(example);
		}
	}
}

fn apply_request_examples(operation: &mut Value) {
	let Some(app_json) = operation
		.get_mut("requestBody")
		.and_then(|body| body.get_mut("content"))
		.and_then(|content| content.get_mut("application/json"))
		.and_then(Value::as_object_mut)
	else {
		return;
	};
	let Some(reference) = app_json
		.get("schema")
		.and_then(|schema| schema.get("$ref"))
		.and_then(Value::as_str)
	else {
		return;
	};

	let example = match reference {
		"#/components/schemas/LoginRequest" => json!({
			"login": "admin",
			"password": "S3cureP@ssw0rd"
		}),
		"#/components/schemas/UserCreateRequest" => json!({
			"login": "msouza",
			"name": "Maria Souza",
			"email": "maria.souza@example.com",
			"password": "S3cureP@ssw0rd",
			"groups": ["RH"]
		}),
		"#/components/schemas/SystemCreateRequest" => json!({
			"code": "FOLHA",
			"name": "Folha de pagamento",
			"description": "Calculo e emissao da folha"
		}),
		"#/components/schemas/ButtonCreateRequest" => json!({
			"system_code": "SEG",
			"function_code": "SEG_USUARIOS",
			"label": "Novo",
			"action": "I",
			"icon": "plus",
			"sort_order": 1
		}),
		"#/components/schemas/GroupPermissionRequest" => json!({
			"actions": "CI",
			"restriction": "P"
		}),
		_ => return,
	};

	app_json.insert("example".to_string(), example);
}

fn ensure_servers(doc: &mut Value, port: u16, tls: bool) {
	let scheme = if tls { "https" } else { "http" };
	let server_url = format!("{}://localhost:{}", scheme, port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr
				.iter()
				.any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
