use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{is_precompressed, StorageBackend, StoredObject};
use crate::core::config::LocalStorageConfig;
use crate::core::error::{AppError, Result};
use crate::shared::paths::{file_extension, file_stem, join_location, normalize_location};

const RECYCLE_DIR: &str = ".recycle";
const THUMBNAIL_DIR: &str = ".thumbnails";
const GZIP_SUFFIX: &str = "gz";
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Filesystem storage rooted at a single directory
pub struct LocalStorage {
    root: PathBuf,
    root_location: String,
    compress: bool,
}

impl LocalStorage {
    pub fn new(config: &LocalStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.root).map_err(|e| {
            storage_error(&format!("create storage root {}", config.root.display()), e)
        })?;
        let root = config.root.canonicalize().map_err(|e| {
            storage_error(&format!("resolve storage root {}", config.root.display()), e)
        })?;
        let root_location = to_location(&root);

        info!(
            "Local storage initialized at {} (compression: {})",
            root_location, config.compress
        );

        Ok(Self {
            root,
            root_location,
            compress: config.compress,
        })
    }

    #[allow(dead_code)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a location, refusing anything outside the storage root
    fn resolve(&self, location: &str) -> Result<PathBuf> {
        let normalized = normalize_location(location);
        let inside = normalized == self.root_location
            || normalized
                .strip_prefix(&self.root_location)
                .is_some_and(|rest| rest.starts_with('/'));

        if !inside || normalized.split('/').any(|part| part == "..") {
            return Err(AppError::Security(format!(
                "Location '{}' is outside the storage root",
                location
            )));
        }
        Ok(PathBuf::from(normalized))
    }

    fn split_destination(&self, destination: &str) -> Result<(PathBuf, String)> {
        let path = self.resolve(destination)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::BadRequest(format!("'{}' has no file name", destination)))?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        Ok((dir, name))
    }
}

fn to_location(path: &Path) -> String {
    normalize_location(&path.to_string_lossy())
}

fn storage_error(action: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Storage(format!("Failed to {}: {}", action, e))
}

/// `name`, then `stem (1).ext`, `stem (2).ext`, ... with an optional `.gz`
fn candidate_name(name: &str, attempt: u32, gzip: bool) -> String {
    let mut candidate = if attempt == 0 {
        name.to_string()
    } else {
        match file_extension(name) {
            Some(ext) => format!("{} ({}).{}", file_stem(name), attempt, ext),
            None => format!("{} ({})", name, attempt),
        }
    };
    if gzip {
        candidate.push('.');
        candidate.push_str(GZIP_SUFFIX);
    }
    candidate
}

/// Create a new file in `dir` whose name does not clash with anything there
fn create_unique(dir: &Path, name: &str, gzip: bool) -> io::Result<(PathBuf, File)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(candidate_name(name, attempt, gzip));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for '{}' in {}", name, dir.display()),
    ))
}

fn copy_into(source: &Path, target: File, gzip: bool) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let output = if gzip {
        let mut encoder = GzEncoder::new(target, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?
    } else {
        let mut target = target;
        io::copy(&mut input, &mut target)?;
        target
    };
    output.sync_all()?;
    Ok(output.metadata()?.len())
}

/// Move `source` into `dir` under a fresh name
fn move_unique(source: &Path, dir: &Path, name: &str, gzip: bool) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let (target, placeholder) = create_unique(dir, name, gzip)?;
    drop(placeholder);

    let moved = fs::rename(source, &target).or_else(|_| {
        // Cross-device moves fall back to copy and remove
        fs::copy(source, &target)?;
        fs::remove_file(source)
    });
    if let Err(e) = moved {
        let _ = fs::remove_file(&target);
        return Err(e);
    }
    Ok(target)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Storage task failed: {}", e)))?
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn folder_location(&self, relative: &str) -> String {
        join_location(&self.root_location, relative.trim_matches('/'))
    }

    async fn ensure_folder(&self, location: &str) -> Result<()> {
        let dir = self.resolve(location)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error(&format!("create folder {}", dir.display()), e))
    }

    async fn save(
        &self,
        source: &Path,
        destination: &str,
        mime_type: &str,
    ) -> Result<StoredObject> {
        let (dir, name) = self.split_destination(destination)?;
        let gzip = self.compress && !is_precompressed(mime_type);
        let source = source.to_path_buf();

        run_blocking(move || {
            fs::create_dir_all(&dir)
                .map_err(|e| storage_error(&format!("create folder {}", dir.display()), e))?;
            let (path, target) = create_unique(&dir, &name, gzip)
                .map_err(|e| storage_error(&format!("reserve '{}' in {}", name, dir.display()), e))?;

            match copy_into(&source, target, gzip) {
                Ok(size) => {
                    debug!("Stored {} as {} ({} bytes)", source.display(), path.display(), size);
                    Ok(StoredObject {
                        location: to_location(&path),
                        size_bytes: size as i64,
                        compressed: gzip,
                    })
                }
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    Err(storage_error(
                        &format!("copy {} to {}", source.display(), path.display()),
                        e,
                    ))
                }
            }
        })
        .await
    }

    async fn read(&self, location: &str, compressed: bool) -> Result<Vec<u8>> {
        let path = self.resolve(location)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                AppError::NotFound(format!("Stored content at '{}' is missing", location))
            } else {
                storage_error(&format!("read {}", path.display()), e)
            }
        })?;

        if !compressed {
            return Ok(bytes);
        }

        let mut decoded = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| storage_error(&format!("decompress {}", path.display()), e))?;
        Ok(decoded)
    }

    async fn delete(&self, location: &str, recycle: bool) -> Result<bool> {
        let path = self.resolve(location)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Nothing to delete at {}", path.display());
            return Ok(false);
        }

        if recycle {
            let recycle_dir = self.root.join(RECYCLE_DIR);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = run_blocking(move || {
                move_unique(&path, &recycle_dir, &name, false)
                    .map_err(|e| storage_error(&format!("recycle {}", path.display()), e))
            })
            .await?;
            debug!("Recycled {} to {}", location, target.display());
            return Ok(true);
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error(&format!("delete {}", path.display()), e)),
        }
    }

    async fn relocate(
        &self,
        location: &str,
        destination: &str,
        compressed: bool,
    ) -> Result<StoredObject> {
        let source = self.resolve(location)?;
        let (dir, name) = self.split_destination(destination)?;

        run_blocking(move || {
            let target = move_unique(&source, &dir, &name, compressed).map_err(|e| {
                storage_error(&format!("move {} to {}", source.display(), dir.display()), e)
            })?;
            let size = fs::metadata(&target)
                .map_err(|e| storage_error(&format!("stat {}", target.display()), e))?
                .len();
            Ok(StoredObject {
                location: to_location(&target),
                size_bytes: size as i64,
                compressed,
            })
        })
        .await
    }

    async fn rename_folder(&self, old_location: &str, new_location: &str) -> Result<()> {
        let old_path = self.resolve(old_location)?;
        let new_path = self.resolve(new_location)?;

        if !tokio::fs::try_exists(&old_path).await.unwrap_or(false) {
            debug!("Folder {} does not exist on disk, nothing to rename", old_path.display());
            return Ok(());
        }
        if tokio::fs::try_exists(&new_path).await.unwrap_or(false) {
            return Err(AppError::Storage(format!(
                "Cannot rename {}: {} already exists",
                old_path.display(),
                new_path.display()
            )));
        }

        tokio::fs::rename(&old_path, &new_path).await.map_err(|e| {
            storage_error(
                &format!("rename {} to {}", old_path.display(), new_path.display()),
                e,
            )
        })
    }

    async fn remove_folder(&self, location: &str) -> Result<()> {
        let path = self.resolve(location)?;
        if path == self.root {
            return Ok(());
        }

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_error(&format!("list {}", path.display()), e)),
        };
        let has_entries = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&format!("list {}", path.display()), e))?
            .is_some();
        if has_entries {
            debug!("Keeping non-empty folder {}", path.display());
            return Ok(());
        }

        tokio::fs::remove_dir(&path)
            .await
            .map_err(|e| storage_error(&format!("remove folder {}", path.display()), e))
    }

    async fn thumbnail_reference(
        &self,
        location: &str,
        compressed: bool,
        max_width: u32,
        max_height: u32,
    ) -> Result<String> {
        let digest = hex::encode(Sha256::digest(location.as_bytes()));
        let thumbnail_dir = self.root.join(THUMBNAIL_DIR);
        let thumbnail = thumbnail_dir.join(format!(
            "{}_{}x{}.jpg",
            &digest[..32],
            max_width,
            max_height
        ));

        if tokio::fs::try_exists(&thumbnail).await.unwrap_or(false) {
            return Ok(to_location(&thumbnail));
        }

        // Stored names carry no reliable extension, so the format is sniffed
        let bytes = self.read(location, compressed).await?;
        let source = location.to_string();

        run_blocking(move || {
            fs::create_dir_all(&thumbnail_dir).map_err(|e| {
                storage_error(&format!("create folder {}", thumbnail_dir.display()), e)
            })?;
            let image = ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()?
                .decode()
                .map_err(|e| {
                    AppError::UnsupportedFormat(format!("Cannot decode image {}: {}", source, e))
                })?;
            image
                .thumbnail(max_width, max_height)
                .to_rgb8()
                .save_with_format(&thumbnail, ImageFormat::Jpeg)
                .map_err(|e| storage_error(&format!("write {}", thumbnail.display()), e))?;
            debug!("Generated thumbnail {}", thumbnail.display());
            Ok(to_location(&thumbnail))
        })
        .await
    }
}
