use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, ImageReader};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// JPEG quality used for thumbnails (0-100).
pub const JPEG_QUALITY: u8 = 85;

/// Scale `input_path` to fit within `max_width` x `max_height`, write it to
/// `output_path`, and return the size in bytes of the written file.
///
/// The aspect ratio is preserved and images already inside the bounds are
/// written at their original size. Output goes to a sibling temp file that is
/// renamed into place, so `output_path` never holds a partial image.
pub fn resize(
    input_path: &Path,
    output_path: &Path,
    max_width: u32,
    max_height: u32,
) -> Result<u64, ThumbnailError> {
    let img = ImageReader::open(input_path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| ThumbnailError::Io {
            path: input_path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|source| ThumbnailError::Decode {
            path: input_path.to_path_buf(),
            source,
        })?;

    let format = ImageFormat::from_path(output_path).map_err(|source| ThumbnailError::Encode {
        path: output_path.to_path_buf(),
        source,
    })?;

    let thumb = fit_within(img, max_width, max_height);

    let parent = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|source| ThumbnailError::Io {
        path: parent.clone(),
        source,
    })?;

    write_atomically(output_path, &parent, |writer| encode(&thumb, format, writer))?;

    let size = fs::metadata(output_path)
        .map_err(|source| ThumbnailError::Io {
            path: output_path.to_path_buf(),
            source,
        })?
        .len();

    Ok(size)
}

/// Runs [`resize`] on the blocking thread pool.
pub async fn resize_blocking(
    input_path: PathBuf,
    output_path: PathBuf,
    max_width: u32,
    max_height: u32,
) -> Result<u64, ThumbnailError> {
    tokio::task::spawn_blocking(move || resize(&input_path, &output_path, max_width, max_height))
        .await
        .map_err(|e| ThumbnailError::Interrupted(e.to_string()))?
}

fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max_width && h <= max_height {
        return img;
    }
    img.resize(max_width, max_height, FilterType::CatmullRom)
}

fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    writer: &mut BufWriter<File>,
) -> Result<(), ImageError> {
    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(writer, JPEG_QUALITY))
        }
        ImageFormat::Png => img.write_with_encoder(PngEncoder::new_with_quality(
            writer,
            CompressionType::Best,
            PngFilter::Adaptive,
        )),
        other => to_eight_bit(img).write_to(writer, other),
    }
}

/// GIF, BMP and WebP encoders only accept 8-bit RGB or RGBA.
fn to_eight_bit(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

fn write_atomically<F>(output_path: &Path, dir: &Path, write: F) -> Result<(), ThumbnailError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), ImageError>,
{
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "thumbnail".to_string());
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let result = write_and_rename(&tmp_path, output_path, write);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_rename<F>(tmp_path: &Path, output_path: &Path, write: F) -> Result<(), ThumbnailError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), ImageError>,
{
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ThumbnailError::Io { path, source }
    };

    let file = File::create(tmp_path).map_err(io_err(tmp_path))?;
    let mut writer = BufWriter::new(file);

    write(&mut writer).map_err(|source| ThumbnailError::Encode {
        path: output_path.to_path_buf(),
        source,
    })?;

    writer.flush().map_err(io_err(tmp_path))?;
    let file = writer
        .into_inner()
        .map_err(|e| ThumbnailError::Io {
            path: tmp_path.to_path_buf(),
            source: e.into_error(),
        })?;
    file.sync_all().map_err(io_err(tmp_path))?;
    drop(file);

    fs::rename(tmp_path, output_path).map_err(io_err(output_path))
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode thumbnail {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("Thumbnail task interrupted: {0}")]
    Interrupted(String),
}
