use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::constants::{PASSWORD_HASH_LEN, SALT_LEN, SESSION_TOKEN_LEN};
use crate::error::{AppError, Result};

// =============================================================================
// Random Material
// =============================================================================

/// Fill a fresh buffer from the operating system CSPRNG
///
/// An exhausted or failing entropy source is surfaced as
/// `AppError::RandomSource` and fails the calling operation.
fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

/// Generate a new password salt (16 random bytes, standard base64)
pub fn generate_salt() -> Result<String> {
    Ok(STANDARD.encode(random_bytes::<SALT_LEN>()?))
}

/// Generate a session token (32 random bytes, base64url with padding)
pub fn generate_session_token() -> Result<String> {
    Ok(URL_SAFE.encode(random_bytes::<SESSION_TOKEN_LEN>()?))
}

// =============================================================================
// Password Hashing
// =============================================================================

/// Cost parameters for the password KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    /// Argon2 memory cost in KiB
    pub memory_kib: u32,
    /// Argon2 time cost (passes over memory)
    pub iterations: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self {
            memory_kib: crate::constants::DEFAULT_PASSWORD_HASH_MEMORY_KIB,
            iterations: crate::constants::DEFAULT_PASSWORD_HASH_ITERATIONS,
        }
    }
}

fn kdf(params: PasswordParams) -> Result<Argon2<'static>> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        1,
        Some(PASSWORD_HASH_LEN),
    )
    .map_err(|e| AppError::PasswordHash(e.to_string()))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(password: &str, salt: &str, params: PasswordParams) -> Result<[u8; PASSWORD_HASH_LEN]> {
    let salt_bytes = STANDARD
        .decode(salt)
        .map_err(|e| AppError::PasswordHash(format!("invalid salt encoding: {}", e)))?;

    let mut output = [0u8; PASSWORD_HASH_LEN];
    kdf(params)?
        .hash_password_into(password.as_bytes(), &salt_bytes, &mut output)
        .map_err(|e| AppError::PasswordHash(e.to_string()))?;

    Ok(output)
}

/// Hash a password with the user's salt
///
/// # Algorithm
/// `hash = base64(Argon2id(password, salt))` with a 32-byte output.
/// The salt is the base64 string produced by [`generate_salt`].
pub fn hash_password(password: &str, salt: &str, params: PasswordParams) -> Result<String> {
    Ok(STANDARD.encode(derive(password, salt, params)?))
}

/// Check a password against a stored hash
///
/// The hash bytes are compared in constant time.
pub fn verify_password(
    password: &str,
    salt: &str,
    stored_hash: &str,
    params: PasswordParams,
) -> Result<bool> {
    let expected = match STANDARD.decode(stored_hash) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Stored password hash is not valid base64");
            return Ok(false);
        }
    };

    let computed = derive(password, salt, params)?;
    Ok(computed.as_slice().ct_eq(expected.as_slice()).into())
}
