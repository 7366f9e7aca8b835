//! Encrypted file credential store
//!
//! Fallback backend for hosts without a usable keyring. Credentials are
//! encrypted per account with a keyed SHA-256 stream and an integrity tag,
//! then kept in `vault.json` in the config directory. The key comes from an
//! operator passphrase, or from a generated machine key file when none is
//! configured.

use crate::auth::backend::{BackendKind, SecretBackend};
use crate::auth::types::Credential;
use crate::config::write_private;
use crate::error::AuthError;
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use fs2::FileExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const VAULT_SCHEMA_VERSION: u32 = 1;
const ENCRYPTED_PREFIX: &str = "enc:v1:";
const NONCE_BYTES: usize = 16;
const TAG_BYTES: usize = 32;
const TAG_DOMAIN: &[u8] = b"bellhop-vault-v1";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk vault document; values are encrypted credential JSON
#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    accounts: BTreeMap<String, String>,
}

impl Default for VaultFile {
    fn default() -> Self {
        Self {
            version: VAULT_SCHEMA_VERSION,
            accounts: BTreeMap::new(),
        }
    }
}

/// Credential store backed by an encrypted JSON file
pub struct EncryptedFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    key: [u8; 32],
}

impl EncryptedFileStore {
    /// Open (or initialize) the vault in the given config directory
    ///
    /// Without a passphrase a random machine key is generated next to the
    /// vault, so this backend stays usable as the last candidate in the
    /// selection chain.
    pub fn open(dir: &Path, passphrase: Option<String>) -> Result<Self, AuthError> {
        fs::create_dir_all(dir)
            .map_err(|e| AuthError::Storage(format!("failed to create config directory: {}", e)))?;

        let passphrase = match passphrase {
            Some(p) => p,
            None => load_or_create_machine_key(dir)?,
        };
        let key = derive_key(&passphrase)?;

        Ok(Self {
            path: dir.join("vault.json"),
            lock_path: dir.join("vault.lock"),
            key,
        })
    }

    /// Path of the vault file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<VaultFile, AuthError> {
        if !self.path.exists() {
            return Ok(VaultFile::default());
        }

        let raw = fs::read_to_string(&self.path)
            .map_err(|e| AuthError::Storage(format!("failed to read vault: {}", e)))?;
        let doc: VaultFile = serde_json::from_str(&raw)
            .map_err(|e| AuthError::Storage(format!("failed to parse vault: {}", e)))?;

        if doc.version != VAULT_SCHEMA_VERSION {
            return Err(AuthError::Storage(format!(
                "unsupported vault version {} (expected {})",
                doc.version, VAULT_SCHEMA_VERSION
            )));
        }

        Ok(doc)
    }

    /// Replace the vault file atomically: unique temp name, then rename
    fn write_document(&self, doc: &VaultFile) -> Result<(), AuthError> {
        let raw = serde_json::to_string_pretty(doc)
            .map_err(|e| AuthError::Storage(format!("failed to serialize vault: {}", e)))?;

        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .path
            .with_file_name(format!("vault.json.{}.{}.tmp", std::process::id(), seq));

        write_private(&tmp_path, raw.as_bytes())
            .map_err(|e| AuthError::Storage(format!("failed to write vault: {}", e)))?;

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(AuthError::Storage(format!("failed to replace vault: {}", e)));
        }

        Ok(())
    }

    /// Run a read-modify-write cycle under the vault lock
    fn with_lock<T>(
        &self,
        op: impl FnOnce(&mut VaultFile) -> Result<T, AuthError>,
    ) -> Result<T, AuthError> {
        let lock_file = fs::File::create(&self.lock_path)
            .map_err(|e| AuthError::Storage(format!("failed to create vault lock: {}", e)))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| AuthError::Storage(format!("failed to lock vault: {}", e)))?;

        let result = (|| {
            let mut doc = self.read_document()?;
            let value = op(&mut doc)?;
            self.write_document(&doc)?;
            Ok(value)
        })();

        let _ = lock_file.unlock();
        // The lock file stays in place; removing it would let a later
        // process lock a fresh inode while a current holder still runs.
        result
    }

    fn encrypt_entry(&self, plaintext: &str) -> String {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = xor_keyed_stream(plaintext.as_bytes(), &self.key, &nonce);
        let tag = entry_tag(&self.key, &nonce, &ciphertext);

        let mut payload = Vec::with_capacity(NONCE_BYTES + TAG_BYTES + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&tag);
        payload.extend_from_slice(&ciphertext);

        format!("{}{}", ENCRYPTED_PREFIX, BASE64_STANDARD.encode(payload))
    }

    fn decrypt_entry(&self, encoded: &str) -> Result<String, AuthError> {
        let payload = encoded.strip_prefix(ENCRYPTED_PREFIX).ok_or_else(|| {
            AuthError::Storage("vault entry prefix is invalid".to_string())
        })?;
        let raw = BASE64_STANDARD
            .decode(payload)
            .map_err(|_| AuthError::Storage("vault entry encoding is invalid".to_string()))?;

        if raw.len() < NONCE_BYTES + TAG_BYTES {
            return Err(AuthError::Storage("vault entry is truncated".to_string()));
        }

        let nonce = &raw[..NONCE_BYTES];
        let tag = &raw[NONCE_BYTES..NONCE_BYTES + TAG_BYTES];
        let ciphertext = &raw[NONCE_BYTES + TAG_BYTES..];

        let expected_tag = entry_tag(&self.key, nonce, ciphertext);
        if !timing_safe_equal(tag, &expected_tag) {
            return Err(AuthError::Storage(
                "vault entry integrity check failed (wrong vault key or corrupted data)".to_string(),
            ));
        }

        let plaintext = xor_keyed_stream(ciphertext, &self.key, nonce);
        String::from_utf8(plaintext)
            .map_err(|_| AuthError::Storage("vault entry is not valid UTF-8".to_string()))
    }
}

impl SecretBackend for EncryptedFileStore {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get(&self, account: &str) -> Result<Option<Credential>, AuthError> {
        let doc = self.read_document()?;

        let Some(encoded) = doc.accounts.get(account) else {
            return Ok(None);
        };

        let plaintext = self.decrypt_entry(encoded)?;
        let credential = serde_json::from_str(&plaintext)
            .map_err(|e| AuthError::Storage(format!("failed to parse stored credential: {}", e)))?;

        Ok(Some(credential))
    }

    fn set(&self, account: &str, credential: &Credential) -> Result<(), AuthError> {
        let plaintext = serde_json::to_string(credential)
            .map_err(|e| AuthError::Storage(format!("failed to serialize credential: {}", e)))?;
        let encoded = self.encrypt_entry(&plaintext);

        self.with_lock(|doc| {
            doc.accounts.insert(account.to_string(), encoded.clone());
            Ok(())
        })
    }

    fn delete(&self, account: &str) -> Result<bool, AuthError> {
        self.with_lock(|doc| Ok(doc.accounts.remove(account).is_some()))
    }

    fn list(&self) -> Result<Vec<String>, AuthError> {
        let doc = self.read_document()?;
        Ok(doc.accounts.keys().cloned().collect())
    }
}

fn derive_key(passphrase: &str) -> Result<[u8; 32], AuthError> {
    let passphrase = passphrase.trim();
    if passphrase.len() < 8 {
        return Err(AuthError::InvalidInput(
            "Vault key must be at least 8 characters".to_string(),
        ));
    }

    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(key)
}

fn load_or_create_machine_key(dir: &Path) -> Result<String, AuthError> {
    let path = dir.join("vault.key");

    if path.exists() {
        let raw = fs::read_to_string(&path)
            .map_err(|e| AuthError::Storage(format!("failed to read machine key: {}", e)))?;
        let key = raw.trim().to_string();
        if key.is_empty() {
            return Err(AuthError::Storage("machine key file is empty".to_string()));
        }
        return Ok(key);
    }

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = URL_SAFE_NO_PAD.encode(bytes);

    write_private(&path, key.as_bytes())
        .map_err(|e| AuthError::Storage(format!("failed to write machine key: {}", e)))?;

    Ok(key)
}

/// SHA-256 counter-block keystream XORed over the data
fn xor_keyed_stream(data: &[u8], key: &[u8; 32], nonce: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len());
    let mut offset = 0usize;
    let mut counter = 0u64;

    while offset < data.len() {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(nonce);
        hasher.update(counter.to_le_bytes());
        let block = hasher.finalize();

        for byte in block {
            if offset >= data.len() {
                break;
            }
            output.push(data[offset] ^ byte);
            offset += 1;
        }
        counter = counter.saturating_add(1);
    }

    output
}

fn entry_tag(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(nonce);
    hasher.update(ciphertext);
    hasher.update(TAG_DOMAIN);
    let digest = hasher.finalize();

    let mut tag = [0u8; 32];
    tag.copy_from_slice(&digest);
    tag
}

fn timing_safe_equal(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut diff = 0u8;
    for (lhs, rhs) in left.iter().zip(right) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}
