//! Administrator authentication and session tokens.
//!
//! New passwords are stored as Argon2id PHC strings. Hashes written by
//! werkzeug's `generate_password_hash` (`pbkdf2:` and `scrypt:` forms) are
//! still accepted for administrators provisioned before that. A successful
//! login yields a
//! stateless HS256 JWT carrying the administrator's email; it expires exactly
//! 24 hours after issuance and there is no server-side revocation.
//!
//! A token is accepted iff its signature verifies and `now < exp`.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::store::{Store, StoreError};

const TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const WERKZEUG_SCRYPT_KEY_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing or invalid token")]
    Unauthenticated,
    #[error("token expired")]
    TokenExpired,
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("failed to hash password: {0}")]
    Hashing(String),
    #[error("credential lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// The authenticated administrator a token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Signs and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();

        // Expiry is checked by hand so the boundary is `now < exp` with no leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let iat = now.timestamp();
        let exp = iat + TOKEN_TTL_SECONDS;
        let claims = Claims {
            sub: identity.email.clone(),
            iat,
            exp,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::Signing)?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .unwrap_or_else(|| now + TimeDelta::seconds(TOKEN_TTL_SECONDS));

        Ok(IssuedToken { token, expires_at })
    }

    pub fn authorize(&self, token: &str) -> Result<Identity, AuthError> {
        self.authorize_at(token, Utc::now())
    }

    pub fn authorize_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|error| {
                debug!(error = %error, "token rejected");
                AuthError::Unauthenticated
            })?;

        if now.timestamp() >= data.claims.exp {
            return Err(AuthError::TokenExpired);
        }

        Ok(Identity {
            email: data.claims.sub,
        })
    }
}

/// Checks administrator credentials against the store and issues tokens.
pub struct Authenticator {
    store: Arc<dyn Store>,
    signer: TokenSigner,
    // Checked against when the email is unknown.
    dummy_hash: OnceCell<Option<String>>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(store: Arc<dyn Store>, signer: TokenSigner) -> Self {
        Self {
            store,
            signer,
            dummy_hash: OnceCell::new(),
        }
    }

    pub async fn issue_token(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        self.issue_token_at(email, password, Utc::now()).await
    }

    pub async fn issue_token_at(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let Some(admin) = self.store.find_admin(email).await? else {
            if let Some(dummy) = self.dummy_hash().await {
                let _ = verify_blocking(password, dummy).await;
            }
            debug!(email = %email, "login for unknown administrator");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_blocking(password, &admin.password_hash).await? {
            debug!(email = %email, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        self.signer.issue_at(&Identity { email: admin.email }, now)
    }

    pub fn authorize(&self, token: &str) -> Result<Identity, AuthError> {
        self.signer.authorize(token)
    }

    /// Created once, on the blocking pool.
    async fn dummy_hash(&self) -> Option<&str> {
        self.dummy_hash
            .get_or_init(|| async {
                tokio::task::spawn_blocking(|| hash_password(&uuid::Uuid::new_v4().to_string()).ok())
                    .await
                    .ok()
                    .flatten()
            })
            .await
            .as_deref()
    }
}

/// Runs the password verification on the blocking pool.
async fn verify_blocking(password: &str, stored_hash: &str) -> Result<bool, AuthError> {
    let password = password.to_owned();
    let stored_hash = stored_hash.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Constant-time check of `password` against a stored Argon2 PHC string or
/// werkzeug hash. A stored hash that cannot be parsed never matches.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("pbkdf2:") || stored_hash.starts_with("scrypt:") {
        return verify_werkzeug(password, stored_hash);
    }

    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(error = %error, "stored password hash is malformed");
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// `<method>$<salt>$<hex digest>`, where the salt is used as its literal text
/// and the method is `pbkdf2:<sha256|sha512>:<iterations>` or
/// `scrypt:<n>:<r>:<p>`.
fn verify_werkzeug(password: &str, stored_hash: &str) -> bool {
    let mut parts = stored_hash.splitn(3, '$');
    let (Some(method), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next())
    else {
        warn!("stored werkzeug hash is malformed");
        return false;
    };
    let Ok(expected) = hex::decode(digest) else {
        warn!("stored werkzeug hash has a non-hex digest");
        return false;
    };
    let Some(derived) = derive_werkzeug(method, password.as_bytes(), salt.as_bytes()) else {
        warn!(method = %method, "unsupported werkzeug hash method");
        return false;
    };

    derived.ct_eq(&expected).into()
}

fn derive_werkzeug(method: &str, password: &[u8], salt: &[u8]) -> Option<Vec<u8>> {
    let mut params = method.split(':');
    match params.next()? {
        "pbkdf2" => {
            let digest = params.next()?;
            let rounds: u32 = params.next()?.parse().ok()?;
            match digest {
                "sha256" => {
                    let mut out = vec![0_u8; 32];
                    pbkdf2_hmac::<Sha256>(password, salt, rounds, &mut out);
                    Some(out)
                }
                "sha512" => {
                    let mut out = vec![0_u8; 64];
                    pbkdf2_hmac::<Sha512>(password, salt, rounds, &mut out);
                    Some(out)
                }
                _ => None,
            }
        }
        "scrypt" => {
            let n: u64 = params.next()?.parse().ok()?;
            let r: u32 = params.next()?.parse().ok()?;
            let p: u32 = params.next()?.parse().ok()?;
            if !n.is_power_of_two() {
                return None;
            }
            let log_n = u8::try_from(n.trailing_zeros()).ok()?;
            let params = scrypt::Params::new(log_n, r, p, WERKZEUG_SCRYPT_KEY_LEN).ok()?;
            let mut out = vec![0_u8; WERKZEUG_SCRYPT_KEY_LEN];
            scrypt::scrypt(password, salt, &params, &mut out).ok()?;
            Some(out)
        }
        _ => None,
    }
}
