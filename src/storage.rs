//! The shared upload directory: claiming names, writing artifacts, reporting on them.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::constants::{
    AUDIO_EXTENSION, AUDIO_PREFIX, IMAGE_PREFIX, RECENT_FILE_LIMIT, TEST_UPLOAD_PREFIX,
    UPLOADS_ROUTE,
};
use crate::error::PixtaleError;

/// How many ids we try before giving up on a name that another writer keeps taking.
const CLAIM_ATTEMPTS: usize = 16;

static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// Identifies one upload and everything generated from it.
///
/// A millisecond timestamp, bumped past the last id issued in this process so
/// two uploads in the same millisecond never share one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(u64);

impl RequestId {
    /// Claims the next id.
    pub fn next() -> Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let previous = LAST_ISSUED
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        Self(now.max(previous.saturating_add(1)))
    }

    /// `image-<id><extension>`, extension including its dot.
    pub fn image_file_name(self, extension: &str) -> String {
        format!("{IMAGE_PREFIX}{}{extension}", self.0)
    }

    /// `story-<id>.mp3`
    pub fn audio_file_name(self) -> String {
        format!("{AUDIO_PREFIX}{}.{AUDIO_EXTENSION}", self.0)
    }

    /// Recovers the id from a generated file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let rest = name
            .strip_prefix(IMAGE_PREFIX)
            .or_else(|| name.strip_prefix(AUDIO_PREFIX))
            .or_else(|| name.strip_prefix(TEST_UPLOAD_PREFIX))?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok().map(Self)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file received from a multipart request.
#[derive(Clone, Debug)]
pub struct UploadedImage {
    /// Raw file contents
    pub bytes: Vec<u8>,
    /// Filename as the client sent it
    pub original_name: Option<String>,
    /// Declared content type
    pub content_type: String,
}

impl UploadedImage {
    /// Extension (with dot) for the stored copy. Taken from the client's
    /// filename when it looks sane, otherwise from the content type.
    pub fn extension(&self) -> String {
        let from_name = self
            .original_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| {
                !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            });
        match from_name {
            Some(ext) => format!(".{ext}"),
            None if self.content_type == "image/png" => ".png".to_string(),
            None => ".jpg".to_string(),
        }
    }
}

/// An upload once it is on disk.
#[derive(Clone, Debug)]
pub struct StoredImage {
    /// The id claimed for this upload
    pub id: RequestId,
    /// Where it was written
    pub path: PathBuf,
    /// Bytes written
    pub size: usize,
}

/// Counts and most-recent names of the artifacts in the upload directory.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UploadStats {
    /// Number of stored uploads
    pub image_count: usize,
    /// Number of generated narrations
    pub audio_count: usize,
    /// Newest uploads first
    pub recent_images: Vec<String>,
    /// Newest narrations first
    pub recent_audio: Vec<String>,
}

/// Public URL of a file in the upload directory.
pub fn public_url(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{UPLOADS_ROUTE}/{name}")
}

/// The shared directory holding uploads and narrations.
#[derive(Clone, Debug)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// A store rooted at `dir`; nothing is created until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory if it isn't there yet.
    pub async fn ensure_dir(&self) -> Result<(), PixtaleError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Writes an upload as `image-<id><ext>` under a freshly claimed id.
    pub async fn save_image(&self, upload: &UploadedImage) -> Result<StoredImage, PixtaleError> {
        self.claim_and_write(&upload.bytes, |id| id.image_file_name(&upload.extension()))
            .await
    }

    /// Writes a debug upload as `test-<id><ext>`.
    pub async fn save_test_upload(
        &self,
        upload: &UploadedImage,
    ) -> Result<StoredImage, PixtaleError> {
        self.claim_and_write(&upload.bytes, |id| {
            format!("{TEST_UPLOAD_PREFIX}{id}{}", upload.extension())
        })
        .await
    }

    /// Writes narration for `id`. Never overwrites.
    pub async fn write_audio(&self, id: RequestId, bytes: &[u8]) -> Result<PathBuf, PixtaleError> {
        self.ensure_dir().await?;
        let path = self.dir.join(id.audio_file_name());
        match write_new(&path, bytes).await {
            Ok(()) => {
                info!("Audio file saved: {}", path.display());
                Ok(path)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(PixtaleError::Internal(
                format!("refusing to overwrite {}", path.display()),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn claim_and_write(
        &self,
        bytes: &[u8],
        file_name: impl Fn(RequestId) -> String,
    ) -> Result<StoredImage, PixtaleError> {
        self.ensure_dir().await?;
        for _ in 0..CLAIM_ATTEMPTS {
            let id = RequestId::next();
            let path = self.dir.join(file_name(id));
            match write_new(&path, bytes).await {
                Ok(()) => {
                    info!("Image saved to {}", path.display());
                    return Ok(StoredImage {
                        id,
                        path,
                        size: bytes.len(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already taken, claiming another id", path.display());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(PixtaleError::Internal(format!(
            "could not claim a free file name in {}",
            self.dir.display()
        )))
    }

    /// Reads the directory fresh and summarises what is in it.
    pub async fn stats(&self) -> Result<UploadStats, PixtaleError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(UploadStats::default()),
            Err(err) => return Err(err.into()),
        };

        let mut images = Vec::new();
        let mut audio = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if RequestId::from_file_name(&name).is_none() {
                continue;
            }
            let Some(modified) = listed_mtime(&name, entry.metadata().await)? else {
                continue;
            };
            if name.starts_with(IMAGE_PREFIX) {
                images.push((modified, name));
            } else if name.starts_with(AUDIO_PREFIX)
                && name.ends_with(&format!(".{AUDIO_EXTENSION}"))
            {
                audio.push((modified, name));
            }
        }

        Ok(UploadStats {
            image_count: images.len(),
            audio_count: audio.len(),
            recent_images: newest_first(images),
            recent_audio: newest_first(audio),
        })
    }
}

/// Modification time of a listed upload, or `None` when it is not a regular
/// file or was removed after the directory was read.
fn listed_mtime(
    name: &str,
    metadata: std::io::Result<Metadata>,
) -> Result<Option<SystemTime>, PixtaleError> {
    match metadata {
        Ok(metadata) if metadata.is_file() => {
            Ok(Some(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)))
        }
        Ok(_) => Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("{name} was removed while listing uploads");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn newest_first(mut files: Vec<(SystemTime, String)>) -> Vec<String> {
    files.sort_by(|a, b| b.cmp(a));
    files
        .into_iter()
        .take(RECENT_FILE_LIMIT)
        .map(|(_, name)| name)
        .collect()
}

async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}
