//! Device credentials and their persisted store

use std::fmt;
use std::io;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::store::StateDir;

/// File holding the permanent device credentials
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// File holding the provisioning identity used during bootstrap
pub const BOOTSTRAP_CREDENTIALS_FILE: &str = "bootstrap-credentials.json";

/// Well-known provisioning identity used when none is configured
const DEFAULT_BOOTSTRAP_TENANT: &str = "management";
const DEFAULT_BOOTSTRAP_USER: &str = "devicebootstrap";
const DEFAULT_BOOTSTRAP_PASSWORD: &str = "Fhdt1bb1f";

/// A tenant/user/password triple
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub tenant: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(tenant: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Whether every part is non-empty
    pub fn is_complete(&self) -> bool {
        !self.tenant.is_empty() && !self.user.is_empty() && !self.password.is_empty()
    }

    /// Login name used by both MQTT and HTTP (`tenant/user`)
    pub fn username(&self) -> String {
        format!("{}/{}", self.tenant, self.user)
    }

    /// Value for an HTTP `Authorization` header
    pub fn basic_auth_header(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username(), self.password));
        format!("Basic {}", token)
    }

    fn default_bootstrap() -> Self {
        Self::new(
            DEFAULT_BOOTSTRAP_TENANT,
            DEFAULT_BOOTSTRAP_USER,
            DEFAULT_BOOTSTRAP_PASSWORD,
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant", &self.tenant)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persists device and bootstrap credentials in the state directory
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: StateDir,
}

impl CredentialStore {
    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }

    /// Load stored device credentials
    ///
    /// Incomplete credentials are treated as absent.
    pub fn load(&self) -> Option<Credentials> {
        self.dir
            .read::<Credentials>(CREDENTIALS_FILE)
            .filter(Credentials::is_complete)
    }

    /// Replace stored device credentials
    pub fn save(&self, credentials: &Credentials) -> io::Result<()> {
        self.dir.write(CREDENTIALS_FILE, credentials)
    }

    /// Forget stored device credentials, forcing a new bootstrap
    pub fn clear(&self) -> io::Result<()> {
        self.dir.remove(CREDENTIALS_FILE)
    }

    /// Provisioning identity for the bootstrap handshake
    ///
    /// Falls back to the well-known default and persists it when nothing
    /// usable is stored.
    pub fn bootstrap_identity(&self) -> Credentials {
        if let Some(creds) = self
            .dir
            .read::<Credentials>(BOOTSTRAP_CREDENTIALS_FILE)
            .filter(Credentials::is_complete)
        {
            return creds;
        }

        let creds = Credentials::default_bootstrap();
        if let Err(e) = self.dir.write(BOOTSTRAP_CREDENTIALS_FILE, &creds) {
            tracing::warn!("Failed to persist bootstrap credentials: {}", e);
        }
        creds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(StateDir::new(dir.path()))
    }

    #[test]
    fn test_username_and_auth_header() {
        let creds = Credentials::new("t1", "device_x", "secret");
        assert_eq!(creds.username(), "t1/device_x");
        // base64("t1/device_x:secret")
        assert_eq!(creds.basic_auth_header(), "Basic dDEvZGV2aWNlX3g6c2VjcmV0");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("t1", "u", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("t1"));
    }

    #[test]
    fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.load().is_none());

        let creds = Credentials::new("t1", "u", "p");
        store.save(&creds).unwrap();
        assert_eq!(store.load(), Some(creds));

        store.clear().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_incomplete_credentials_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&Credentials::new("t1", "", "p")).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_bootstrap_identity_defaults_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let identity = store.bootstrap_identity();
        assert_eq!(identity.username(), "management/devicebootstrap");
        assert!(dir.path().join(BOOTSTRAP_CREDENTIALS_FILE).exists());
    }

    #[test]
    fn test_bootstrap_identity_prefers_stored() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::new(dir.path());
        let custom = Credentials::new("edge", "provisioner", "pw");
        state.write(BOOTSTRAP_CREDENTIALS_FILE, &custom).unwrap();

        assert_eq!(CredentialStore::new(state).bootstrap_identity(), custom);
    }
}
