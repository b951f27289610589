// Encryption Service
// Protects streaming credentials at rest using AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

// Prefix for identifying encrypted values in the configuration record
const TOKEN_PREFIX: &str = "ENC::";

/// Encryption for sensitive configuration fields (streaming key, consumer
/// secret, serialized platform credentials). Uses a machine-specific key
/// stored next to the configuration record.
pub struct Encryption;

impl Encryption {
    /// Get or create the machine-specific encryption key
    /// Returns a zeroizing key that will be securely erased from memory
    fn get_or_create_machine_key(app_data_dir: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
        let key_file = app_data_dir.join(".output_key");

        if key_file.exists() {
            let mut key_data = std::fs::read(&key_file)
                .map_err(|e| format!("Failed to read machine key: {e}"))?;

            if key_data.len() != KEY_LEN {
                key_data.zeroize();
                return Err("Invalid machine key file".to_string());
            }

            Self::restrict_key_file(&key_file)?;

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&key_data);
            key_data.zeroize();

            Ok(key)
        } else {
            let mut rng = rand::thread_rng();
            let key = Zeroizing::new(rng.gen::<[u8; KEY_LEN]>());

            std::fs::write(&key_file, *key)
                .map_err(|e| format!("Failed to save machine key: {e}"))?;

            Self::restrict_key_file(&key_file)?;

            Ok(key)
        }
    }

    #[cfg(unix)]
    fn restrict_key_file(key_file: &Path) -> Result<(), String> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(key_file, perms)
            .map_err(|e| format!("Failed to set key file permissions: {e}"))
    }

    /// Set Windows file attributes to hide and protect the machine key file
    #[cfg(windows)]
    fn restrict_key_file(key_file: &Path) -> Result<(), String> {
        use std::os::windows::fs::MetadataExt;

        let metadata = std::fs::metadata(key_file)
            .map_err(|e| format!("Failed to read key file metadata: {e}"))?;
        let mut attributes = metadata.file_attributes();

        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
        attributes |= FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM;

        use std::os::windows::ffi::OsStrExt;
        let wide_path: Vec<u16> = key_file.as_os_str().encode_wide().chain(Some(0)).collect();

        unsafe {
            if winapi::um::fileapi::SetFileAttributesW(wide_path.as_ptr(), attributes) == 0 {
                return Err("Failed to set Windows file attributes".to_string());
            }
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn restrict_key_file(_key_file: &Path) -> Result<(), String> {
        Ok(())
    }

    /// Check whether a stored value carries the encrypted framing.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(TOKEN_PREFIX)
    }

    /// Encrypt a credential for storage
    /// Returns base64-encoded encrypted value with prefix
    pub fn encrypt_token(token: &str, app_data_dir: &Path) -> Result<String, String> {
        // Don't encrypt empty or already encrypted values
        if token.is_empty() || token.starts_with(TOKEN_PREFIX) {
            return Ok(token.to_string());
        }

        let machine_key = Self::get_or_create_machine_key(app_data_dir)?;

        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; NONCE_LEN] = rng.gen();

        let cipher = Aes256Gcm::new_from_slice(&*machine_key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|e| format!("Credential encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", TOKEN_PREFIX, BASE64.encode(combined)))
    }

    /// Decrypt a credential from storage
    /// Plaintext values pass through unchanged
    pub fn decrypt_token(encrypted: &str, app_data_dir: &Path) -> Result<String, String> {
        if !encrypted.starts_with(TOKEN_PREFIX) {
            return Ok(encrypted.to_string());
        }

        let machine_key = Self::get_or_create_machine_key(app_data_dir)?;

        let encoded = &encrypted[TOKEN_PREFIX.len()..];
        let mut combined = BASE64
            .decode(encoded)
            .map_err(|e| format!("Failed to decode encrypted credential: {e}"))?;

        if combined.len() < NONCE_LEN {
            combined.zeroize();
            return Err("Invalid encrypted credential".to_string());
        }

        let cipher = Aes256Gcm::new_from_slice(&*machine_key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(&combined[..NONCE_LEN]);

        let plaintext = cipher
            .decrypt(nonce, &combined[NONCE_LEN..])
            .map_err(|e| format!("Credential decryption failed: {e}"))?;

        combined.zeroize();

        String::from_utf8(plaintext).map_err(|e| format!("Decrypted credential not UTF-8: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let encrypted = Encryption::encrypt_token("s3cret-stream-key", dir.path()).unwrap();
        assert!(Encryption::is_encrypted(&encrypted));
        assert_ne!(encrypted, "s3cret-stream-key");

        let decrypted = Encryption::decrypt_token(&encrypted, dir.path()).unwrap();
        assert_eq!(decrypted, "s3cret-stream-key");
    }

    #[test]
    fn test_empty_and_encrypted_values_pass_through() {
        let dir = tempdir().unwrap();
        assert_eq!(Encryption::encrypt_token("", dir.path()).unwrap(), "");

        let once = Encryption::encrypt_token("value", dir.path()).unwrap();
        let twice = Encryption::encrypt_token(&once, dir.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_plaintext_decrypt_pass_through() {
        let dir = tempdir().unwrap();
        assert_eq!(
            Encryption::decrypt_token("plain", dir.path()).unwrap(),
            "plain"
        );
    }

    #[test]
    fn test_garbage_ciphertext_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Encryption::decrypt_token("ENC::not-base64!!", dir.path()).is_err());
    }
}
