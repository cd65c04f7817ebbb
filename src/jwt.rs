use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;

const DEFAULT_EXP_HOURS: i64 = 8;
const DEFAULT_ISSUER: &str = "hr-admin";
const DEFAULT_AUDIENCE: &str = "hr-admin-web";

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
    pub issuer: String,
    pub audience: String,
}

impl JwtConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours: DEFAULT_EXP_HOURS,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }

        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(DEFAULT_EXP_HOURS))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        let mut config = Self::new(secret.into_bytes());
        config.exp_hours = exp_hours;
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            config.issuer = issuer;
        }
        if let Ok(audience) = std::env::var("JWT_AUDIENCE") {
            config.audience = audience;
        }
        Ok(config)
    }

    pub fn encode(&self, subject: &TokenSubject) -> Result<IssuedToken, AppError> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: subject.user_id.to_string(),
            login: subject.login.clone(),
            name: subject.name.clone(),
            groups: subject.groups.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

/// Identity baked into a token.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: i64,
    pub login: String,
    pub name: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub login: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub login: String,
    pub groups: Vec<String>,
}

impl TryFrom<Claims> for AuthUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::token("subject is not a user id"))?;

        Ok(AuthUser {
            user_id,
            login: claims.login,
            groups: claims.groups,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token.trim())?;
        claims.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 12,
            login: "jsilva".to_string(),
            name: "Joao Silva".to_string(),
            groups: vec!["RH".to_string(), "GESTOR".to_string()],
        }
    }

    #[test]
    fn token_round_trips_identity() {
        let config = JwtConfig::new("unit-secret");
        let issued = config.encode(&subject()).unwrap();
        let claims = config.decode(&issued.token).unwrap();

        let user = AuthUser::try_from(claims).unwrap();
        assert_eq!(user.user_id, 12);
        assert_eq!(user.login, "jsilva");
        assert_eq!(user.groups, vec!["RH", "GESTOR"]);
    }

    #[test]
    fn token_from_other_audience_is_rejected() {
        let config = JwtConfig::new("unit-secret");
        let mut other = JwtConfig::new("unit-secret");
        other.audience = "someone-else".to_string();

        let issued = other.encode(&subject()).unwrap();
        assert!(matches!(config.decode(&issued.token), Err(AppError::Token(_))));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issued = JwtConfig::new("one").encode(&subject()).unwrap();
        assert!(JwtConfig::new("two").decode(&issued.token).is_err());
    }
}
