//! Local placement: write the picture's PNG to the image directory.
//!
//! File names are deterministic (`image_{index:06}_{hash}.png`), so
//! re-running a job over the same document overwrites each file with
//! identical content instead of accumulating duplicates.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes picture files under `image_dir` and produces the link paths used
/// inside the Markdown output (under `link_prefix`).
#[derive(Debug, Clone)]
pub struct LocalStore {
    image_dir: PathBuf,
    link_prefix: PathBuf,
}

impl LocalStore {
    pub fn new(image_dir: impl Into<PathBuf>, link_prefix: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            link_prefix: link_prefix.into(),
        }
    }

    /// Where a file with `file_name` lands on disk.
    pub fn disk_path(&self, file_name: &str) -> PathBuf {
        self.image_dir.join(file_name)
    }

    /// The path used inside the Markdown output, relative to the eventual
    /// document location.
    pub fn link_path(&self, file_name: &str) -> PathBuf {
        self.link_prefix.join(file_name)
    }

    /// Write `png` under `file_name`, creating the image directory if
    /// needed, and return the link path for the Markdown reference.
    pub fn save(&self, file_name: &str, png: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.image_dir)?;
        let path = self.disk_path(file_name);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(png)?;
        debug!("Saved picture to {}", path.display());
        Ok(self.link_path(file_name))
    }
}

impl LocalStore {
    /// The configured image directory (used for logging and tests).
    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_creates_directory_and_returns_link_path() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("out/images"), "images");

        let link = store.save("image_000000_ab.png", b"png-bytes").unwrap();

        assert_eq!(link, PathBuf::from("images/image_000000_ab.png"));
        let on_disk = tmp.path().join("out/images/image_000000_ab.png");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"png-bytes");
    }

    #[test]
    fn save_twice_overwrites_same_file() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), "images");

        store.save("image_000001_cd.png", b"one").unwrap();
        store.save("image_000001_cd.png", b"two").unwrap();

        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "re-run must not accumulate files");
        assert_eq!(
            std::fs::read(store.disk_path("image_000001_cd.png")).unwrap(),
            b"two"
        );
    }
}
