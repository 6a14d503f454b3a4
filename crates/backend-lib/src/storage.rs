// ============================
// authgate/src/storage.rs
// ============================
//! Bundled storage backends: flat JSON files and process memory.
use crate::confirm::{confirm_digest, ConfirmCreds, ConfirmCredsStore};
use crate::error::StorageError;
use crate::user::{StoredUser, Storer, User};
use async_trait::async_trait;
use authgate_common::Attributes;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::{mapref::entry::Entry, DashMap};
use std::io::ErrorKind;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

const USERS_DIR: &str = "users";
const CONFIRM_DIR: &str = "confirm";

fn missing_pid() -> StorageError {
    StorageError::Backend("attributes carry neither pid nor email".to_string())
}

/// One JSON file per user and per pending confirmation.
///
/// ```text
/// <root>/users/<base64url(pid)>.json
/// <root>/confirm/<digest>.json
/// ```
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
    next_id: Arc<AtomicI64>,
    /// Serializes read-modify-write cycles on user files
    write_lock: Arc<Mutex<()>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(USERS_DIR))?;
        fs::create_dir_all(root.join(CONFIRM_DIR))?;

        // continue numbering after the highest id on disk
        let mut max_id = 0;
        for entry in fs::read_dir(root.join(USERS_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let user: StoredUser = serde_json::from_slice(&fs::read(&path)?)?;
                max_id = max_id.max(user.id);
            }
        }

        Ok(Self {
            root,
            next_id: Arc::new(AtomicI64::new(max_id + 1)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn user_path(&self, pid: &str) -> PathBuf {
        self.root
            .join(USERS_DIR)
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(pid)))
    }

    fn confirm_path(&self, digest: &str) -> PathBuf {
        self.root.join(CONFIRM_DIR).join(format!("{digest}.json"))
    }

    async fn read_user(&self, pid: &str) -> Result<StoredUser, StorageError> {
        match tokio_fs::read(self.user_path(pid)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(pid.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a file through a temporary sibling so readers never see a
    /// partial write.
    async fn replace(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        tokio_fs::write(&tmp, bytes).await?;
        tokio_fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Write a new file, failing if it already exists
    async fn create_new(path: &Path, bytes: &[u8], name: &str) -> Result<(), StorageError> {
        let mut file = match tokio_fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(name.to_string()))
            },
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Storer for FlatFileStorage {
    async fn load(&self, pid: &str) -> Result<Arc<dyn User>, StorageError> {
        Ok(Arc::new(self.read_user(pid).await?))
    }

    async fn create(&self, attrs: &Attributes) -> Result<Arc<dyn User>, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = StoredUser::from_attributes(id, attrs).ok_or_else(missing_pid)?;
        let bytes = serde_json::to_vec_pretty(&user)?;
        Self::create_new(&self.user_path(&user.pid), &bytes, &user.pid).await?;
        debug!(pid = %user.pid, id, "created user file");
        Ok(Arc::new(user))
    }

    async fn save(&self, pid: &str, attrs: &Attributes) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut user = self.read_user(pid).await?;
        user.apply(attrs);
        Self::replace(&self.user_path(pid), &serde_json::to_vec_pretty(&user)?).await
    }
}

#[async_trait]
impl ConfirmCredsStore for FlatFileStorage {
    async fn create_confirm_creds(
        &self,
        key_material: &str,
        creds: ConfirmCreds,
    ) -> Result<ConfirmCreds, StorageError> {
        let digest = confirm_digest(key_material, &creds.code);
        let bytes = serde_json::to_vec_pretty(&creds)?;
        Self::create_new(&self.confirm_path(&digest), &bytes, "confirmation code").await?;
        Ok(creds)
    }

    async fn take_confirm_creds(
        &self,
        key_material: &str,
        code: &str,
    ) -> Result<Option<ConfirmCreds>, StorageError> {
        let path = self.confirm_path(&confirm_digest(key_material, code));
        let bytes = match tokio_fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // whoever removes the file owns the code
        match tokio_fs::remove_file(&path).await {
            Ok(()) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory backend for tests and embedded hosts
#[derive(Debug, Default)]
pub struct MemoryStorage {
    users: DashMap<String, StoredUser>,
    confirm: DashMap<String, ConfirmCreds>,
    last_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of confirmations not yet redeemed
    pub fn pending_confirmations(&self) -> usize {
        self.confirm.len()
    }
}

#[async_trait]
impl Storer for MemoryStorage {
    async fn load(&self, pid: &str) -> Result<Arc<dyn User>, StorageError> {
        self.users
            .get(pid)
            .map(|user| Arc::new(user.value().clone()) as Arc<dyn User>)
            .ok_or_else(|| StorageError::NotFound(pid.to_string()))
    }

    async fn create(&self, attrs: &Attributes) -> Result<Arc<dyn User>, StorageError> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = StoredUser::from_attributes(id, attrs).ok_or_else(missing_pid)?;
        match self.users.entry(user.pid.clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(user.pid)),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(Arc::new(user))
            },
        }
    }

    async fn save(&self, pid: &str, attrs: &Attributes) -> Result<(), StorageError> {
        let mut user = self
            .users
            .get_mut(pid)
            .ok_or_else(|| StorageError::NotFound(pid.to_string()))?;
        user.apply(attrs);
        Ok(())
    }
}

#[async_trait]
impl ConfirmCredsStore for MemoryStorage {
    async fn create_confirm_creds(
        &self,
        key_material: &str,
        creds: ConfirmCreds,
    ) -> Result<ConfirmCreds, StorageError> {
        let digest = confirm_digest(key_material, &creds.code);
        let mut stored = creds.clone();
        stored.code.clear();
        self.confirm.insert(digest, stored);
        Ok(creds)
    }

    async fn take_confirm_creds(
        &self,
        key_material: &str,
        code: &str,
    ) -> Result<Option<ConfirmCreds>, StorageError> {
        Ok(self
            .confirm
            .remove(&confirm_digest(key_material, code))
            .map(|(_, creds)| creds))
    }
}
