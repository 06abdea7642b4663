//! Size/age rotated append-only file.
//!
//! Files are named `{prefix}_{YYYYmmdd_HHMMSS}_{n}.{ext}` inside the output
//! directory and opened lazily on the first write. When the current file
//! grows past the size limit or outlives the age limit it is closed and,
//! if enabled, compressed to `{name}.zst` with the original removed.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::application::ports::SinkError;

/// zstd level used for rotated files.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Rotation limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the file holds at least this many bytes.
    pub max_bytes: u64,
    /// Rotate once the file is at least this old.
    pub max_age: Duration,
    /// Compress rotated files.
    pub compress: bool,
}

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
    opened_at: Instant,
}

/// Append-only file with rotation.
pub struct RotatingFile {
    directory: PathBuf,
    prefix: String,
    extension: &'static str,
    policy: RotationPolicy,
    current: Option<OpenFile>,
    serial: u64,
    rotations: u64,
    last_rotated: Option<PathBuf>,
}

impl std::fmt::Debug for RotatingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFile")
            .field("directory", &self.directory)
            .field("prefix", &self.prefix)
            .field("extension", &self.extension)
            .field("current", &self.current_path())
            .finish_non_exhaustive()
    }
}

impl RotatingFile {
    /// Prepare a rotating file; creates `directory` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory cannot be created.
    pub fn new(
        directory: impl AsRef<Path>,
        prefix: impl Into<String>,
        extension: &'static str,
        policy: RotationPolicy,
    ) -> Result<Self, SinkError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            prefix: prefix.into(),
            extension,
            policy,
            current: None,
            serial: 0,
            rotations: 0,
            last_rotated: None,
        })
    }

    /// Whether the next append starts a new file.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.current.is_none()
    }

    /// Path of the file currently open, if any.
    #[must_use]
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    /// Number of files closed by rotation so far.
    #[must_use]
    pub const fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Most recently rotated file (after compression, if enabled).
    #[must_use]
    pub fn last_rotated(&self) -> Option<&Path> {
        self.last_rotated.as_deref()
    }

    /// Rotate first if the current file is over a limit.
    ///
    /// Call before writing a record so headers land in the new file.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if closing or compressing fails.
    pub fn rotate_if_needed(&mut self) -> Result<(), SinkError> {
        let due = self.current.as_ref().is_some_and(|c| {
            c.bytes >= self.policy.max_bytes || c.opened_at.elapsed() >= self.policy.max_age
        });
        if due {
            self.rotate()?;
        }
        Ok(())
    }

    /// Append `bytes`, opening a new file if none is open.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be opened or written.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        if self.current.is_none() {
            self.current = Some(self.open_next()?);
        }
        if let Some(current) = self.current.as_mut() {
            current.writer.write_all(bytes)?;
            current.bytes += bytes.len() as u64;
        }
        Ok(())
    }

    /// Flush buffered bytes of the current file.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if flushing fails.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(current) = self.current.as_mut() {
            current.writer.flush()?;
        }
        Ok(())
    }

    /// Close the current file and compress it if enabled.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if closing or compressing fails.
    pub fn rotate(&mut self) -> Result<(), SinkError> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        current.writer.flush()?;
        drop(current.writer);

        let closed = if self.policy.compress {
            compress(&current.path)?
        } else {
            current.path
        };
        tracing::info!(file = %closed.display(), bytes = current.bytes, "Export file rotated");
        self.rotations += 1;
        self.last_rotated = Some(closed);
        Ok(())
    }

    fn open_next(&mut self) -> Result<OpenFile, SinkError> {
        self.serial += 1;
        let name = format!(
            "{}_{}_{}.{}",
            self.prefix,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.serial,
            self.extension
        );
        let path = self.directory.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes = file.metadata()?.len();
        tracing::debug!(file = %path.display(), "Export file opened");
        Ok(OpenFile {
            path,
            writer: BufWriter::new(file),
            bytes,
            opened_at: Instant::now(),
        })
    }
}

/// Compress `path` to `path.zst` and remove the original.
fn compress(path: &Path) -> Result<PathBuf, SinkError> {
    let mut target = path.as_os_str().to_owned();
    target.push(".zst");
    let target = PathBuf::from(target);

    let source = BufReader::new(File::open(path)?);
    let destination = BufWriter::new(File::create(&target)?);
    zstd::stream::copy_encode(source, destination, COMPRESSION_LEVEL)?;
    std::fs::remove_file(path)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn policy(max_bytes: u64, compress: bool) -> RotationPolicy {
        RotationPolicy {
            max_bytes,
            max_age: Duration::from_secs(3600),
            compress,
        }
    }

    #[test]
    fn opens_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let file = RotatingFile::new(dir.path(), "events", "jsonl", policy(1024, false)).unwrap();
        assert!(file.is_fresh());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn rotates_on_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RotatingFile::new(dir.path(), "events", "jsonl", policy(10, false)).unwrap();

        for _ in 0..3 {
            file.rotate_if_needed().unwrap();
            file.append(b"0123456789\n").unwrap();
        }
        file.flush().unwrap();

        assert_eq!(file.rotations(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
        assert!(file.last_rotated().unwrap().exists());
        assert_ne!(file.last_rotated(), file.current_path());
    }

    #[test]
    fn rotates_on_age() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RotatingFile::new(
            dir.path(),
            "events",
            "csv",
            RotationPolicy {
                max_bytes: u64::MAX,
                max_age: Duration::ZERO,
                compress: false,
            },
        )
        .unwrap();

        file.append(b"a\n").unwrap();
        file.rotate_if_needed().unwrap();

        assert!(file.is_fresh());
        assert_eq!(file.rotations(), 1);
    }

    #[test]
    fn compressed_rotation_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RotatingFile::new(dir.path(), "events", "jsonl", policy(1, true)).unwrap();

        file.append(b"hello\n").unwrap();
        let original = file.current_path().unwrap().to_path_buf();
        file.rotate().unwrap();

        let rotated = file.last_rotated().unwrap();
        assert!(!original.exists());
        assert_eq!(rotated.extension().and_then(|e| e.to_str()), Some("zst"));

        let mut decoded = String::new();
        zstd::stream::read::Decoder::new(File::open(rotated).unwrap())
            .unwrap()
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "hello\n");
    }
}
