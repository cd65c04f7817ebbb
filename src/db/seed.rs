use sqlx::SqlitePool;

use crate::authz::codes;
use crate::errors::AppError;
use crate::utils::{hash_password, utc_now};
use crate::validation::LOGIN_LEN;

/// Creates an active user in the `ADMIN` group. Returns the new user id.
pub async fn create_admin(pool: &SqlitePool, login: &str, name: &str, password: &str) -> Result<i64, AppError> {
	let login = login.trim().to_lowercase();
	if login.is_empty() || login.len() > LOGIN_LEN {
		return Err(AppError::invalid("login", format!("must be 1 to {LOGIN_LEN} characters")));
	}
	let password_hash = hash_password(password)?;
	let now = utc_now();

	let mut tx = pool.begin().await?;

	let user_id: i64 = sqlx::query_scalar(
		"INSERT INTO users (login, name, email, password_hash, active, created_at, updated_at) VALUES (?, ?, NULL, ?, 1, ?, ?) RETURNING id",
	)
	.bind(&login)
	.bind(name)
	.bind(&password_hash)
	.bind(now)
	.bind(now)
	.fetch_one(&mut *tx)
	.await?;

	sqlx::query("INSERT INTO user_groups (user_id, group_code, created_at) VALUES (?, ?, ?)")
		.bind(user_id)
		.bind(codes::ADMIN_GROUP)
		.bind(now)
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;

	tracing::info!(user_id, login = %login, "administrator created");
	Ok(user_id)
}

/// Creates the first administrator only when no user exists yet.
pub async fn bootstrap_admin(pool: &SqlitePool, login: &str, password: &str) -> Result<Option<i64>, AppError> {
	let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users").fetch_one(pool).await?;
	if count > 0 {
		return Ok(None);
	}
	create_admin(pool, login, "Administrator", password).await.map(Some)
}
