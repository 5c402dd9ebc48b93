//! Private scratch directory for temp blobs.
//! 临时 blob 的私有暂存目录。

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use cs_core::{StoreError, StoreResult};
use tokio::fs;
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const INCOMING_SUFFIX: &str = ".incoming";

/// Directory holding temp blob files that have not reached the backend yet.
/// 存放尚未上传到后端的临时 blob 文件的目录。
#[derive(Debug)]
pub struct IncomingArea {
    dir: PathBuf,
}

/// Temp file metadata with modified time.
/// 包含修改时间的临时文件元数据。
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_ms: i64,
}

impl IncomingArea {
    /// Create the area and ensure the directory exists with private permissions.
    /// 创建暂存区并确保目录存在且权限私有。
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();

        std::fs::create_dir_all(&dir)?;
        let metadata = std::fs::metadata(&dir)?;
        if !metadata.is_dir() {
            return Err(StoreError::Configuration(format!(
                "incoming path is not a directory: {}",
                dir.display()
            )));
        }

        #[cfg(unix)]
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh, unused path for a new temp blob.
    pub fn allocate_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{INCOMING_SUFFIX}", Uuid::new_v4().simple()))
    }

    /// All regular files in the area, oldest first.
    /// 按修改时间升序列出暂存区内的全部文件。
    pub async fn list_files(&self) -> StoreResult<Vec<IncomingFile>> {
        let mut files = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // Removed by its owner between listing and stat.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if !meta.is_file() {
                continue;
            }
            let modified_ms = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map_err(io::Error::other)?
                .as_millis() as i64;
            files.push(IncomingFile {
                path: entry.path(),
                size: meta.len(),
                modified_ms,
            });
        }
        files.sort_by_key(|file| file.modified_ms);
        Ok(files)
    }

    /// Files whose age is strictly greater than `max_age`.
    /// 枚举存在时间严格超过 `max_age` 的文件。
    pub async fn list_expired(
        &self,
        now_ms: i64,
        max_age: Duration,
    ) -> StoreResult<Vec<IncomingFile>> {
        let max_age_ms = max_age.as_millis() as i64;
        Ok(self
            .list_files()
            .await?
            .into_iter()
            .filter(|file| now_ms - file.modified_ms > max_age_ms)
            .collect())
    }
}
