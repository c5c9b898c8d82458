//! File-level encryption for the on-disk credential tree. Not part of the
//! coordination layer's testable surface (§1) — the cryptographic choices
//! here only need to be honest about their guarantees, not exhaustively
//! audited.

use aes_gcm::aead::{Aead, KeyInit, OsRng as AesOsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::password_hash::SaltString;
use argon2::Argon2;
use rand::RngCore;

use quorumdb_core::{QuorumError, QuorumResult};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Derives a 256-bit key from a master password and a per-file salt via
/// Argon2id.
fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> QuorumResult<[u8; 32]> {
    let salt_string = SaltString::encode_b64(salt)
        .map_err(|e| QuorumError::Internal(format!("bad salt: {e}")))?;
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt_string.as_salt().as_str().as_bytes(), &mut key)
        .map_err(|e| QuorumError::Internal(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Seals `plaintext` under `password`, returning `salt || nonce || ciphertext`.
pub fn seal(password: &str, plaintext: &[u8]) -> QuorumResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let key_bytes = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    AesOsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| QuorumError::Internal("encryption failed".into()))?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a blob produced by [`seal`]. Returns [`QuorumError::BadCredentials`]
/// if the password is wrong or the file is corrupt — the AEAD tag does not
/// let us tell the two apart, and callers should not be able to either.
pub fn open(password: &str, blob: &[u8]) -> QuorumResult<Vec<u8>> {
    if blob.len() < SALT_LEN + NONCE_LEN {
        return Err(QuorumError::BadCredentials);
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let salt_array: [u8; SALT_LEN] = salt.try_into().expect("checked length above");
    let key_bytes = derive_key(password, &salt_array)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| QuorumError::BadCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_correct_password() {
        let sealed = seal("hunter2", b"hello world").unwrap();
        let opened = open("hunter2", &sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn rejects_wrong_password() {
        let sealed = seal("hunter2", b"hello world").unwrap();
        let err = open("wrong", &sealed).unwrap_err();
        assert!(matches!(err, QuorumError::BadCredentials));
    }
}
