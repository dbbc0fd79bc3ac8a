//! Local file storage for book files and cover images.
//!
//! Book files are stored under `files_dir` as `<item_id>.<ext>` and covers
//! under `covers_dir` as `<item_id>.jpg`. Names are derived from the item
//! ID, never from client-supplied paths.

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// File storage adapter.
#[derive(Clone)]
pub struct Storage {
    files_dir: PathBuf,
    covers_dir: PathBuf,
    thumbnail_size: u32,
}

impl Storage {
    /// Create a storage adapter from configuration.
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            files_dir: config.files_dir.clone(),
            covers_dir: config.covers_dir.clone(),
            thumbnail_size: config.thumbnail_size,
        }
    }

    /// Store an uploaded book file. Returns the relative path and size.
    pub fn store_file(&self, item_id: &str, original_name: &str, data: &[u8]) -> Result<(String, i64)> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
            .to_lowercase();

        let name = format!("{}.{}", item_id, ext);
        std::fs::create_dir_all(&self.files_dir)?;
        std::fs::write(self.files_dir.join(&name), data)?;

        Ok((name, data.len() as i64))
    }

    /// Absolute path for a stored file.
    pub fn file_path(&self, relative: &str) -> PathBuf {
        self.files_dir.join(relative)
    }

    /// Remove a stored file. Missing files are not an error.
    pub fn delete_file(&self, relative: &str) {
        let _ = std::fs::remove_file(self.files_dir.join(relative));
    }

    /// Store a cover image, re-encoded to JPEG.
    ///
    /// Returns an error when the bytes do not decode as an image; callers
    /// creating items treat that as best-effort and continue without a cover.
    pub fn store_cover(&self, item_id: &str, data: &[u8]) -> Result<()> {
        let img = image::load_from_memory(data)?;

        let mut jpeg = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut jpeg),
            image::ImageFormat::Jpeg,
        )?;

        std::fs::create_dir_all(&self.covers_dir)?;
        std::fs::write(self.cover_path(item_id), jpeg)?;
        Ok(())
    }

    /// Read a stored cover, if any.
    pub fn get_cover(&self, item_id: &str) -> Option<Vec<u8>> {
        std::fs::read(self.cover_path(item_id)).ok()
    }

    /// Generate a PNG thumbnail from the stored cover.
    pub fn thumbnail(&self, item_id: &str) -> Result<Vec<u8>> {
        let cover = self
            .get_cover(item_id)
            .ok_or_else(|| AppError::NotFound(format!("No cover for item: {}", item_id)))?;

        let img = image::load_from_memory(&cover)?;
        let thumb = img.thumbnail(self.thumbnail_size, self.thumbnail_size * 2);

        let mut png = Vec::new();
        thumb.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;

        Ok(png)
    }

    /// Remove a stored cover. Missing files are not an error.
    pub fn delete_cover(&self, item_id: &str) {
        let _ = std::fs::remove_file(self.cover_path(item_id));
    }

    fn cover_path(&self, item_id: &str) -> PathBuf {
        self.covers_dir.join(format!("{}.jpg", item_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage(dir: &Path) -> Storage {
        Storage {
            files_dir: dir.join("files"),
            covers_dir: dir.join("covers"),
            thumbnail_size: 64,
        }
    }

    #[test]
    fn store_and_delete_file() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = test_storage(tmp.path());

        let (name, size) = storage
            .store_file("item-1", "My Book.EPUB", b"content")
            .unwrap();
        assert_eq!(name, "item-1.epub");
        assert_eq!(size, 7);
        assert!(storage.file_path(&name).exists());

        storage.delete_file(&name);
        assert!(!storage.file_path(&name).exists());
    }

    #[test]
    fn weird_extension_falls_back_to_bin() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = test_storage(tmp.path());

        let (name, _) = storage
            .store_file("item-2", "../../etc/passwd", b"x")
            .unwrap();
        assert_eq!(name, "item-2.bin");
    }

    #[test]
    fn cover_roundtrip_and_thumbnail() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = test_storage(tmp.path());

        // 4x4 solid image encoded as PNG
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            4,
            image::Rgb([120, 40, 40]),
        ));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        storage.store_cover("item-3", &png).unwrap();
        assert!(storage.get_cover("item-3").is_some());

        let thumb = storage.thumbnail("item-3").unwrap();
        assert!(image::load_from_memory(&thumb).is_ok());

        storage.delete_cover("item-3");
        assert!(storage.get_cover("item-3").is_none());
    }

    #[test]
    fn invalid_cover_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = test_storage(tmp.path());

        assert!(storage.store_cover("item-4", b"not an image").is_err());
    }
}
