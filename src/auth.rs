use crate::{
    config::JwtConfig,
    error::{ApiError, ApiResult},
    store::Store,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, info};

/// Header the client sends its token in.
pub const TOKEN_HEADER: &str = "x-auth-token";

const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity of the caller, attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: i64,
    hasher: Argon2<'static>,
}

impl AuthService {
    pub fn new(store: Store, jwt: &JwtConfig) -> Self {
        Self::with_hasher(store, jwt, Argon2::default())
    }

    pub fn with_hasher(store: Store, jwt: &JwtConfig, hasher: Argon2<'static>) -> Self {
        Self {
            store,
            encoding_key: EncodingKey::from_secret(jwt.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt.secret.as_bytes()),
            expiry_seconds: jwt.expiry_seconds,
            hasher,
        }
    }

    /// Create an account and return a token for it.
    pub async fn register(&self, username: &str, password: &str) -> ApiResult<String> {
        require_credentials(username, password)?;

        if self.store.find_user_by_username(username).await?.is_some() {
            return Err(ApiError::Conflict("User already exists".to_string()));
        }

        let password_hash = self.hash_password(password).await?;
        let user = self.store.create_user(username, &password_hash).await?;
        info!(
            "Registered user {} ({}) at {}",
            user.username, user.id, user.created_at
        );

        self.issue_token(&user.id)
    }

    /// Check credentials and return a fresh token. Unknown usernames and
    /// wrong passwords fail with the same message.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<String> {
        require_credentials(username, password)?;

        let Some(user) = self.store.find_user_by_username(username).await? else {
            debug!("Login attempt for unknown user {}", username);
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };

        if !self.verify_password(password, &user.password_hash).await? {
            debug!("Wrong password for user {}", username);
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        self.issue_token(&user.id)
    }

    /// Validate a token and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> ApiResult<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| ApiError::Unauthorized("Token is not valid".to_string()))?;

        Ok(data.claims.sub)
    }

    fn issue_token(&self, user_id: &str) -> ApiResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("Failed to sign token: {}", e)))
    }

    async fn hash_password(&self, password: &str) -> ApiResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();

        task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    }

    async fn verify_password(&self, password: &str, password_hash: &str) -> ApiResult<bool> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let password_hash = password_hash.to_string();

        task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&password_hash)
                .map_err(|e| ApiError::Internal(format!("Stored hash is unreadable: {}", e)))?;
            Ok(hasher
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    }
}

fn require_credentials(username: &str, password: &str) -> ApiResult<()> {
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required.".to_string(),
        ));
    }
    Ok(())
}

/// Token from `x-auth-token`, or from `Authorization: Bearer` as a fallback.
fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|h| h.to_str().ok()) {
        return Some(token);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Middleware that rejects requests without a valid token and stores the
/// caller's [`AuthUser`] in the request extensions.
pub async fn require_auth(
    State(auth): State<AuthService>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(req.headers())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("No token, authorization denied".to_string()))?;

    let user_id = auth.verify(token)?;
    req.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(req).await)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::temp_store;
    use argon2::{Algorithm as HashAlgorithm, Params, Version};
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    pub(crate) fn test_jwt() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing-only".to_string(),
            expiry_seconds: 3600,
        }
    }

    /// Cheap Argon2 parameters so tests don't spend seconds hashing.
    pub(crate) fn fast_hasher() -> Argon2<'static> {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap();
        Argon2::new(HashAlgorithm::Argon2id, Version::V0x13, params)
    }

    pub(crate) async fn test_auth() -> (TempDir, Store, AuthService) {
        let (dir, store) = temp_store().await;
        let auth = AuthService::with_hasher(store.clone(), &test_jwt(), fast_hasher());
        (dir, store, auth)
    }

    #[tokio::test]
    async fn register_then_login_yields_verifiable_tokens() {
        let (_dir, store, auth) = test_auth().await;

        let token = auth.register("ada", "lovelace").await.unwrap();
        let user_id = auth.verify(&token).unwrap();

        let stored = store.find_user_by_username("ada").await.unwrap().unwrap();
        assert_eq!(stored.id, user_id);
        assert_ne!(stored.password_hash, "lovelace");
        assert!(stored.password_hash.starts_with("$argon2id$"));

        let login_token = auth.login("ada", "lovelace").await.unwrap();
        assert_eq!(auth.verify(&login_token).unwrap(), user_id);
    }

    #[tokio::test]
    async fn second_registration_of_a_username_fails() {
        let (_dir, _store, auth) = test_auth().await;

        auth.register("ada", "one").await.unwrap();
        let err = auth.register("ada", "two").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_fail_alike() {
        let (_dir, _store, auth) = test_auth().await;
        auth.register("ada", "lovelace").await.unwrap();

        let wrong = auth.login("ada", "babbage").await.unwrap_err();
        let unknown = auth.login("grace", "lovelace").await.unwrap_err();
        assert!(matches!(&wrong, ApiError::Unauthorized(m) if m == INVALID_CREDENTIALS));
        assert!(matches!(&unknown, ApiError::Unauthorized(m) if m == INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected() {
        let (_dir, _store, auth) = test_auth().await;

        assert!(matches!(
            auth.register("", "pw").await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            auth.login("ada", "").await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn tampered_expired_and_foreign_tokens_are_rejected() {
        let (_dir, store, auth) = test_auth().await;
        let token = auth.register("ada", "lovelace").await.unwrap();

        // Flip the first signature character.
        let (head, sig) = token.rsplit_once('.').unwrap();
        let first = if sig.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{}.{}{}", head, first, &sig[1..]);
        assert!(auth.verify(&tampered).is_err());

        let expired = encode(
            &Header::default(),
            &Claims {
                sub: "someone".to_string(),
                iat: Utc::now().timestamp() - 7200,
                exp: Utc::now().timestamp() - 3600,
            },
            &EncodingKey::from_secret(test_jwt().secret.as_bytes()),
        )
        .unwrap();
        assert!(auth.verify(&expired).is_err());

        let other = AuthService::with_hasher(
            store,
            &JwtConfig {
                secret: "a-completely-different-secret-value".to_string(),
                expiry_seconds: 3600,
            },
            fast_hasher(),
        );
        assert!(other.verify(&token).is_err());
        assert!(auth.verify("not.a.token").is_err());
    }

    #[test]
    fn token_header_takes_precedence_over_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-bearer"));
        assert_eq!(token_from_headers(&headers), Some("from-bearer"));

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("from-custom"));
        assert_eq!(token_from_headers(&headers), Some("from-custom"));
    }

    #[tokio::test]
    async fn token_just_past_expiry_is_rejected() {
        let (_dir, _store, auth) = test_auth().await;
        let now = Utc::now().timestamp();

        let token = encode(
            &Header::default(),
            &Claims {
                sub: "someone".to_string(),
                iat: now - 60,
                exp: now - 5,
            },
            &EncodingKey::from_secret(test_jwt().secret.as_bytes()),
        )
        .unwrap();
        assert!(auth.verify(&token).is_err());
    }

    #[tokio::test]
    async fn same_password_gets_a_fresh_salt_each_time() {
        let (_dir, _store, auth) = test_auth().await;

        let first = auth.hash_password("lovelace").await.unwrap();
        let second = auth.hash_password("lovelace").await.unwrap();
        assert_ne!(first, second);

        let parsed = PasswordHash::new(&first).unwrap();
        assert_eq!(parsed.salt.unwrap().as_str().len(), 22);
        assert!(auth.verify_password("lovelace", &second).await.unwrap());
    }
}
