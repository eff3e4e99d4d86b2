use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use store_core::{Document, DocumentError, LeaderboardEntry, RankBy, UserId, UserRecord};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Per-user records kept in a single JSON file.
///
/// Every call re-reads the whole file, and every update rewrites it through a
/// temp file and a rename. Calls through clones of one store are serialized;
/// other processes writing the same file are not.
#[derive(Clone)]
pub struct RecordStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl RecordStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        };
        store.ensure_initialized().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file with an empty mapping when it is missing. Existing
    /// content is left alone, valid or not.
    async fn ensure_initialized(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let exists = tokio::fs::try_exists(self.path())
            .await
            .map_err(StoreError::io(self.path()))?;
        if exists {
            return Ok(());
        }

        if let Some(parent) = self.path().parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io(parent))?;
        }
        self.write(&Document::empty()).await?;
        info!(path = %self.path().display(), "created empty user store");
        Ok(())
    }

    pub async fn get(&self, user_id: impl Into<UserId>) -> Result<UserRecord, StoreError> {
        let user_id = user_id.into();
        let _guard = self.lock.lock().await;
        let document = self.load().await?;
        Ok(document.get(&user_id))
    }

    /// Replaces the user's record in full.
    pub async fn update(
        &self,
        user_id: impl Into<UserId>,
        record: UserRecord,
    ) -> Result<(), StoreError> {
        let user_id = user_id.into();
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        document.set(user_id.clone(), record);
        self.write(&document).await?;
        debug!(user_id = %user_id, users = document.len(), "user record written");
        Ok(())
    }

    pub async fn leaderboard(
        &self,
        order: RankBy,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let _guard = self.lock.lock().await;
        let document = self.load().await?;
        Ok(document.leaderboard(order, limit))
    }

    async fn load(&self) -> Result<Document, StoreError> {
        let bytes = tokio::fs::read(self.path())
            .await
            .map_err(StoreError::io(self.path()))?;
        Ok(Document::from_json(&bytes)?)
    }

    async fn write(&self, document: &Document) -> Result<(), StoreError> {
        let payload = document.to_json_pretty()?;
        atomic_write(self.path(), &payload).await
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `<path>.tmp` and renames it over `path`. The temp file is removed
/// again if either step fails.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let temp_path = temp_path_for(path);

    let result = match tokio::fs::write(&temp_path, bytes).await {
        Ok(()) => tokio::fs::rename(&temp_path, path)
            .await
            .map_err(StoreError::io(path)),
        Err(err) => Err(StoreError::io(&temp_path)(err)),
    };

    if result.is_err() {
        if let Err(err) = tokio::fs::remove_file(&temp_path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %err, "could not remove temp file");
            }
        }
    }
    result
}
