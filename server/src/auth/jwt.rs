use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Lifetime of tokens minted by `issue_access_token`.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Resolve the HS256 signing key.
///
/// A configured secret wins. Otherwise a 256-bit random key is kept as raw
/// bytes in `data_dir/jwt_secret`, generated on first boot.
pub fn load_or_generate_jwt_secret(
    data_dir: &str,
    configured: Option<&str>,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if let Some(secret) = configured.filter(|s| !s.is_empty()) {
        tracing::info!("Using configured JWT signing key");
        return Ok(secret.as_bytes().to_vec());
    }

    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Mint an access token for a player. Accounts are managed elsewhere; this
/// is used by tooling and tests.
pub fn issue_access_token(
    secret: &[u8],
    user_id: &str,
    username: &str,
    developer: bool,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        id: user_id.to_string(),
        username: username.to_string(),
        developer,
        iat: now,
        exp: now + ACCESS_TOKEN_TTL_SECS,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Verify signature and expiry and return the claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
