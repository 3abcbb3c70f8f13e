use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use armada_core::error::OrchestratorError;

use crate::ssh;

/// A generated keypair as returned to callers. The private key itself
/// stays on disk; only its path travels.
#[derive(Debug, Clone, Serialize)]
pub struct KeyPair {
    pub name: String,
    pub public_key: String,
    pub private_key_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub valid: bool,
}

/// Result of a keypair validation query. Never an error path: malformed
/// or missing keys come back as `valid: false` with a reason.
#[derive(Debug, Clone, Serialize)]
pub struct KeyCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl KeyCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn bad(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Metadata for a stored key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub valid: bool,
}

/// File-backed SSH key store.
///
/// Layout: `<dir>/<name>.pem` (mode 0600) and `<dir>/<name>.pub`
/// (mode 0644), plus `<dir>/backups/<timestamp>/` mirroring backed-up
/// pairs. Names are unique within the store; a pair's two files exist
/// together or not at all.
pub struct KeyManager {
    dir: PathBuf,
}

impl KeyManager {
    /// Open a key store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create key store at {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn private_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.pem", name))
    }

    fn public_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.pub", name))
    }

    /// Key names become file names, so restrict them to a safe charset.
    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > 64 {
            anyhow::bail!("Key name must be 1-64 characters");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!(
                "Key name '{}' may only contain alphanumerics, '-' and '_'",
                name
            );
        }
        Ok(())
    }

    /// Generate a new Ed25519 keypair and write both files.
    ///
    /// Fails with `DuplicateKey` if either file already exists.
    pub fn generate_key(&self, name: &str) -> Result<KeyPair> {
        Self::validate_name(name)?;
        let priv_path = self.private_path(name);
        let pub_path = self.public_path(name);
        if priv_path.exists() || pub_path.exists() {
            return Err(OrchestratorError::DuplicateKey(name.to_string()).into());
        }

        let key = ssh::generate_signing_key();
        let pem = ssh::encode_private_pem(&key);
        let pub_line = ssh::encode_public_openssh(&key.verifying_key(), &format!("armada-{}", name));

        // Any partial failure below removes what was already written, so
        // the two files exist together or not at all.
        fs::write(&priv_path, &pem)
            .with_context(|| format!("Failed to write {}", priv_path.display()))?;
        if let Err(e) = set_mode(&priv_path, 0o600) {
            let _ = fs::remove_file(&priv_path);
            return Err(e);
        }
        if let Err(e) = fs::write(&pub_path, &pub_line) {
            let _ = fs::remove_file(&priv_path);
            return Err(e).with_context(|| format!("Failed to write {}", pub_path.display()));
        }
        if let Err(e) = set_mode(&pub_path, 0o644) {
            let _ = fs::remove_file(&priv_path);
            let _ = fs::remove_file(&pub_path);
            return Err(e);
        }

        info!(key = name, "Generated keypair");
        Ok(KeyPair {
            name: name.to_string(),
            public_key: pub_line.trim_end().to_string(),
            private_key_path: priv_path,
            created_at: Utc::now(),
            valid: true,
        })
    }

    /// Check that both files exist, parse, and are mathematically paired.
    /// This is a query, not a failure path.
    pub fn validate_key_pair(&self, name: &str) -> KeyCheck {
        let priv_path = self.private_path(name);
        let pub_path = self.public_path(name);
        if !priv_path.exists() {
            return KeyCheck::bad(format!("private key file missing: {}", priv_path.display()));
        }
        if !pub_path.exists() {
            return KeyCheck::bad(format!("public key file missing: {}", pub_path.display()));
        }

        let pem = match fs::read_to_string(&priv_path) {
            Ok(s) => s,
            Err(e) => return KeyCheck::bad(format!("cannot read private key: {}", e)),
        };
        let private = match ssh::parse_private_pem(&pem) {
            Ok(k) => k,
            Err(e) => return KeyCheck::bad(format!("malformed private key: {}", e)),
        };

        let pub_line = match fs::read_to_string(&pub_path) {
            Ok(s) => s,
            Err(e) => return KeyCheck::bad(format!("cannot read public key: {}", e)),
        };
        let public = match ssh::parse_public_openssh(&pub_line) {
            Ok(k) => k,
            Err(e) => return KeyCheck::bad(format!("malformed public key: {}", e)),
        };

        if !ssh::keys_are_paired(&private, &public) {
            return KeyCheck::bad("public key does not match private key");
        }
        KeyCheck::ok()
    }

    /// The stored public key line, or None when the key does not exist.
    pub fn public_key(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.public_path(name))
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    /// The stored private key PEM, or None when the key does not exist.
    pub fn private_key(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.private_path(name)).ok()
    }

    /// All stored key names, sorted.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read key store {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("pem") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Metadata for every stored key.
    pub fn keys_info(&self) -> Result<Vec<KeyInfo>> {
        let mut infos = Vec::new();
        for name in self.list_keys()? {
            let created_at = fs::metadata(self.private_path(&name))
                .and_then(|m| m.created().or_else(|_| m.modified()))
                .ok()
                .map(DateTime::<Utc>::from);
            let valid = self.validate_key_pair(&name).valid;
            infos.push(KeyInfo {
                name,
                created_at,
                valid,
            });
        }
        Ok(infos)
    }

    /// Copy both files of a key into a timestamped backup directory.
    pub fn backup_keys(&self, name: &str) -> Result<PathBuf> {
        let priv_path = self.private_path(name);
        let pub_path = self.public_path(name);
        if !priv_path.exists() || !pub_path.exists() {
            return Err(OrchestratorError::KeyNotFound(name.to_string()).into());
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let backup_dir = self.dir.join("backups").join(stamp);
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed to create backup dir {}", backup_dir.display()))?;

        let backup_priv = backup_dir.join(format!("{}.pem", name));
        fs::copy(&priv_path, &backup_priv)
            .with_context(|| format!("Failed to back up {}", priv_path.display()))?;
        set_mode(&backup_priv, 0o600)?;
        fs::copy(&pub_path, backup_dir.join(format!("{}.pub", name)))
            .with_context(|| format!("Failed to back up {}", pub_path.display()))?;

        info!(key = name, dir = %backup_dir.display(), "Backed up keypair");
        Ok(backup_dir)
    }

    /// Remove both files of a key. No-op if the key does not exist.
    pub fn delete_key(&self, name: &str) -> Result<()> {
        for path in [self.private_path(name), self.public_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to delete {}", path.display()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {:o} {}", mode, path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, KeyManager) {
        let tmp = TempDir::new().unwrap();
        let km = KeyManager::open(tmp.path().join("keys")).unwrap();
        (tmp, km)
    }

    #[test]
    fn test_generate_then_validate() {
        let (_tmp, km) = store();
        let pair = km.generate_key("alpha").unwrap();
        assert_eq!(pair.name, "alpha");
        assert!(pair.public_key.starts_with("ssh-ed25519 "));
        assert!(pair.private_key_path.exists());

        let check = km.validate_key_pair("alpha");
        assert!(check.valid, "reason: {:?}", check.reason);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_modes() {
        use std::os::unix::fs::PermissionsExt;
        let (_tmp, km) = store();
        let pair = km.generate_key("alpha").unwrap();

        let priv_mode = fs::metadata(&pair.private_key_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(priv_mode & 0o777, 0o600);

        let pub_mode = fs::metadata(pair.private_key_path.with_extension("pub"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(pub_mode & 0o777, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn test_partial_generate_failure_leaves_no_files() {
        use std::os::unix::fs::symlink;
        let (_tmp, km) = store();
        // A dangling symlink at the public path makes that write fail
        // after the private key file already landed on disk.
        symlink(
            km.dir.join("missing").join("alpha.pub"),
            km.public_path("alpha"),
        )
        .unwrap();

        let err = km.generate_key("alpha").unwrap_err();
        assert!(err.to_string().contains("Failed to write"));
        // The half-written private key was cleaned up.
        assert!(!km.private_path("alpha").exists());

        // Clearing the obstruction frees the name again.
        fs::remove_file(km.public_path("alpha")).unwrap();
        km.generate_key("alpha").unwrap();
        assert!(km.validate_key_pair("alpha").valid);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (_tmp, km) = store();
        km.generate_key("alpha").unwrap();
        let err = km.generate_key("alpha").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::DuplicateKey(_))
        ));
        // Still exactly one entry
        assert_eq!(km.list_keys().unwrap(), vec!["alpha"]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_tmp, km) = store();
        assert!(km.generate_key("").is_err());
        assert!(km.generate_key("../escape").is_err());
        assert!(km.generate_key("has space").is_err());
        assert!(km.generate_key("ok-name_1").is_ok());
    }

    #[test]
    fn test_get_missing_key_returns_none() {
        let (_tmp, km) = store();
        assert!(km.public_key("ghost").is_none());
        assert!(km.private_key("ghost").is_none());
    }

    #[test]
    fn test_validate_missing_key() {
        let (_tmp, km) = store();
        let check = km.validate_key_pair("ghost");
        assert!(!check.valid);
        assert!(check.reason.unwrap().contains("missing"));
    }

    #[test]
    fn test_corrupting_private_key_invalidates() {
        let (_tmp, km) = store();
        let pair = km.generate_key("alpha").unwrap();
        fs::write(&pair.private_key_path, "not a pem").unwrap();
        let check = km.validate_key_pair("alpha");
        assert!(!check.valid);
        assert!(check.reason.unwrap().contains("malformed private key"));
    }

    #[test]
    fn test_mismatched_pair_invalidates() {
        let (_tmp, km) = store();
        km.generate_key("alpha").unwrap();
        km.generate_key("beta").unwrap();
        // Swap beta's public key under alpha's name
        let beta_pub = km.public_key("beta").unwrap();
        fs::write(km.public_path("alpha"), beta_pub).unwrap();
        let check = km.validate_key_pair("alpha");
        assert!(!check.valid);
        assert!(check.reason.unwrap().contains("does not match"));
    }

    #[test]
    fn test_list_and_info() {
        let (_tmp, km) = store();
        km.generate_key("beta").unwrap();
        km.generate_key("alpha").unwrap();
        assert_eq!(km.list_keys().unwrap(), vec!["alpha", "beta"]);

        let infos = km.keys_info().unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.valid));
    }

    #[test]
    fn test_backup_keys() {
        let (_tmp, km) = store();
        km.generate_key("alpha").unwrap();
        let dir = km.backup_keys("alpha").unwrap();
        assert!(dir.join("alpha.pem").exists());
        assert!(dir.join("alpha.pub").exists());
    }

    #[test]
    fn test_backup_missing_key_fails() {
        let (_tmp, km) = store();
        let err = km.backup_keys("ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_tmp, km) = store();
        km.generate_key("alpha").unwrap();
        km.delete_key("alpha").unwrap();
        assert!(km.public_key("alpha").is_none());
        // Deleting again is a no-op, not an error
        km.delete_key("alpha").unwrap();
        km.delete_key("never-existed").unwrap();
    }
}
