use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject - the user id
    pub exp: i64,    // expiration time (unix timestamp)
}

/// Validate a JWT (HS256) and return the user id from its subject.
///
/// This is the single source of identity for both the Bearer middleware
/// and the WebSocket handshake; a client-supplied user id is never
/// trusted directly.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized)?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)
}

/// Middleware to extract the Bearer token and add the user id to request
/// extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let user_id = verify_token(token, &state.config.jwt_secret)?;

    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-test-secret-test-secret!";

    fn issue(sub: &str, exp: i64) -> String {
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips() {
        let user_id = Uuid::new_v4();
        let token = issue(&user_id.to_string(), chrono::Utc::now().timestamp() + 3600);
        assert_eq!(verify_token(&token, SECRET).unwrap(), user_id);
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue(
            &Uuid::new_v4().to_string(),
            chrono::Utc::now().timestamp() - 3600,
        );
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue(&Uuid::new_v4().to_string(), chrono::Utc::now().timestamp() + 3600);
        assert!(verify_token(&token, "another-secret-another-secret-yes").is_err());
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let token = issue("not-a-uuid", chrono::Utc::now().timestamp() + 3600);
        assert!(verify_token(&token, SECRET).is_err());
    }
}
