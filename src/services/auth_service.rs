use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::services::settings_service::SettingsService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Password version at issue time; a bump invalidates the token.
    pub pv: i64,
    pub exp: i64,
}

pub struct AuthService {
    settings: Arc<SettingsService>,
}

impl AuthService {
    pub fn new(settings: Arc<SettingsService>) -> Self {
        Self { settings }
    }

    pub fn login(&self, username: &str, password: &str) -> AppResult<String> {
        let auth = self
            .settings
            .snapshot()
            .map_err(AppError::Internal)?
            .auth
            .clone();
        if username != auth.username {
            return Err(AppError::unauthorized("invalid credentials"));
        }
        let verified = bcrypt::verify(password, &auth.password_hash)
            .map_err(|error| AppError::Internal(error.into()))?;
        if !verified {
            return Err(AppError::unauthorized("invalid credentials"));
        }

        let claims = Claims {
            sub: auth.username.clone(),
            pv: auth.password_version,
            exp: (Utc::now() + chrono::Duration::hours(auth.token_ttl_hours)).timestamp(),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
        )
        .map_err(|error| AppError::Internal(error.into()))
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let auth = self
            .settings
            .snapshot()
            .map_err(AppError::Internal)?
            .auth
            .clone();
        let decoded = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AppError::unauthorized("invalid token"))?;

        if decoded.claims.pv != auth.password_version {
            return Err(AppError::unauthorized("token predates a password change"));
        }
        Ok(decoded.claims)
    }
}
