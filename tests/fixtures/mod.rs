//! Source images and scratch directories for pipeline tests

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Temporary directory removed on drop.
pub struct ScratchDir(PathBuf);

impl ScratchDir {
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("thumbnail-worker-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create scratch dir");
        Self(dir)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }

    pub fn path_str(&self, name: &str) -> String {
        self.path(name).to_string_lossy().into_owned()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Write a gradient JPEG of the given size.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8])
    })
    .save(path)
    .expect("write fixture jpeg");
}

/// Task payload in the producer's wire format.
pub fn task_json(image_id: serde_json::Value, original: &str, thumbnail: &str) -> Vec<u8> {
    let thumbnail_filename = Path::new(thumbnail)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let original_filename = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    serde_json::to_vec(&serde_json::json!({
        "imageId": image_id,
        "originalPath": original,
        "originalFilename": original_filename,
        "thumbnailPath": thumbnail,
        "thumbnailFilename": thumbnail_filename,
    }))
    .expect("serialize task")
}
