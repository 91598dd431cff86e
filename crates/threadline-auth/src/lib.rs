use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use tokio::sync::watch;
use tracing::{error, info};

/// Storage key the captured credential lives under.
pub const CREDENTIAL_KEY: &str = "captured-token";

const BEARER_PREFIX: &str = "Bearer ";

/// A full `Authorization` header value, always of the `Bearer <token>` form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Accept a header value only if it carries a non-empty bearer token.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let token = value.strip_prefix(BEARER_PREFIX)?;
        if token.trim().is_empty() {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value safe to print: keeps the scheme and a few token characters.
    pub fn masked(&self) -> String {
        let token = &self.0[BEARER_PREFIX.len()..];
        let chars: Vec<char> = token.chars().collect();
        if chars.len() <= 12 {
            return format!("{BEARER_PREFIX}****");
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{BEARER_PREFIX}{head}…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

/// Where an observed credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    RequestHeaders,
    Manual,
    Storage,
}

impl CaptureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureSource::RequestHeaders => "request headers",
            CaptureSource::Manual => "manual entry",
            CaptureSource::Storage => "local storage",
        }
    }
}

/// String key/value storage persisted as a single JSON object.
///
/// Writes go straight to disk, so a value set here survives restarts the
/// way browser local storage survives reloads.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl KeyValueStore {
    pub fn load(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read storage file: {}", path.display()))?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse storage file: {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.save()
    }

    /// Returns whether the key was present.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write storage file: {}", self.path.display()))
    }
}

struct ProviderState {
    store: KeyValueStore,
    stored: Option<Credential>,
    announced: bool,
    match_logged: bool,
}

/// Watches outbound requests for a bearer credential and announces the first
/// one it sees.
///
/// The announcement happens at most once per provider. Later credentials
/// still replace the stored value and become visible through
/// [`CredentialProvider::current`].
pub struct CredentialProvider {
    state: Mutex<ProviderState>,
    latest: watch::Sender<Option<Credential>>,
}

impl CredentialProvider {
    /// Build a provider over `store`. A credential persisted by an earlier
    /// session is announced immediately.
    pub fn new(store: KeyValueStore) -> Self {
        let stored = store.get(CREDENTIAL_KEY).and_then(Credential::parse);
        let announced = stored.is_some();
        if announced {
            info!(source = CaptureSource::Storage.as_str(), "credential restored");
        } else {
            info!("waiting for credential");
        }
        let (latest, _) = watch::channel(stored.clone());

        Self {
            state: Mutex::new(ProviderState {
                store,
                stored,
                announced,
                match_logged: false,
            }),
            latest,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(KeyValueStore::load(path)?))
    }

    /// Inspect an outbound request's `Authorization` header.
    pub fn observe_request(&self, request: &reqwest::Request) -> Option<Credential> {
        let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
        self.observe_authorization(value, CaptureSource::RequestHeaders)
    }

    /// Record an `Authorization` value. Returns the credential when it
    /// replaced the stored one; non-bearer values are ignored.
    pub fn observe_authorization(&self, value: &str, source: CaptureSource) -> Option<Credential> {
        let credential = Credential::parse(value)?;
        let mut state = self.lock();

        if state.stored.as_ref() == Some(&credential) {
            if !state.match_logged {
                state.match_logged = true;
                info!(source = source.as_str(), "credential match confirmed");
            }
            return None;
        }

        if let Err(err) = state.store.set(CREDENTIAL_KEY, credential.as_str()) {
            error!("Failed to persist credential: {}", err);
        }
        state.stored = Some(credential.clone());
        self.latest.send_replace(Some(credential.clone()));

        if !state.announced {
            state.announced = true;
            info!(source = source.as_str(), "credential captured");
        }

        Some(credential)
    }

    /// The most recently observed credential, if any.
    pub fn current(&self) -> Option<Credential> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> CredentialWatch {
        CredentialWatch {
            rx: self.latest.subscribe(),
        }
    }

    /// Forget the stored credential. Returns whether one was stored.
    pub fn clear(&self) -> Result<bool> {
        let mut state = self.lock();
        let existed = state.store.remove(CREDENTIAL_KEY)?;
        state.stored = None;
        self.latest.send_replace(None);
        Ok(existed)
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One-shot handle on the "credential available" notification.
#[derive(Debug, Clone)]
pub struct CredentialWatch {
    rx: watch::Receiver<Option<Credential>>,
}

impl CredentialWatch {
    /// Resolve once a credential is available. Returns `None` only if the
    /// provider was dropped first.
    pub async fn wait(&mut self) -> Option<Credential> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        }
    }
}
