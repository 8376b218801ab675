use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rocket::fs::TempFile;
use rocket::tokio::fs;
use rocket::tokio::io::AsyncReadExt;
use tracing::{info, instrument, warn};

use crate::error::AppError;

const MAX_STEM_LEN: usize = 50;
const SNIFF_LEN: usize = 8;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

/// Subdirectory of the upload root a resource's files live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadArea {
    Students,
    Workers,
    SessionPhotos,
    MealPhotos,
    Trainings,
}

impl UploadArea {
    pub fn dir(&self) -> &'static str {
        match self {
            UploadArea::Students => "students",
            UploadArea::Workers => "workers",
            UploadArea::SessionPhotos => "session_photos",
            UploadArea::MealPhotos => "meal_photos",
            UploadArea::Trainings => "trainings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Png,
    Jpeg,
    Gif,
    Pdf,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Png => "png",
            FileFormat::Jpeg => "jpg",
            FileFormat::Gif => "gif",
            FileFormat::Pdf => "pdf",
        }
    }

    fn accepts_extension(&self, ext: &str) -> bool {
        match self {
            FileFormat::Jpeg => matches!(ext, "jpg" | "jpeg"),
            other => other.extension() == ext,
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, FileFormat::Pdf)
    }
}

/// What a file-bound field is willing to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Image,
    Pdf,
    ImageOrPdf,
}

impl Accept {
    fn allows(&self, format: FileFormat) -> bool {
        match self {
            Accept::Image => format.is_image(),
            Accept::Pdf => format == FileFormat::Pdf,
            Accept::ImageOrPdf => true,
        }
    }
}

pub fn detect_format(head: &[u8]) -> Option<FileFormat> {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(FileFormat::Png)
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(FileFormat::Jpeg)
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        Some(FileFormat::Gif)
    } else if head.starts_with(b"%PDF-") {
        Some(FileFormat::Pdf)
    } else {
        None
    }
}

/// Filesystem-safe stem of a client-supplied filename.
pub fn sanitize_stem(raw_name: &str) -> String {
    let base = raw_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    };

    let cleaned = UNSAFE_CHARS.replace_all(stem, "_");
    let cleaned: String = cleaned
        .trim_matches('_')
        .chars()
        .take(MAX_STEM_LEN)
        .collect();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// `{stem}_{timestamp}_{random}.{ext}`, unique per write.
pub fn unique_filename(stem: &str, format: FileFormat) -> String {
    format!(
        "{}_{}_{:08x}.{}",
        stem,
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        rand::random::<u32>(),
        format.extension()
    )
}

/// Checks that the declared extension and the leading bytes agree and that
/// the detected format is one the field accepts.
pub fn check_upload(
    field: &str,
    raw_name: Option<&str>,
    head: &[u8],
    accept: Accept,
) -> Result<FileFormat, AppError> {
    let format = detect_format(head).ok_or_else(|| {
        AppError::Validation(format!("{}: unsupported or unrecognised file content", field))
    })?;

    if !accept.allows(format) {
        return Err(AppError::Validation(format!(
            "{}: {} files are not accepted here",
            field,
            format.extension()
        )));
    }

    let extension = raw_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension {
        Some(ext) if format.accepts_extension(&ext) => Ok(format),
        Some(ext) => Err(AppError::Validation(format!(
            "{}: extension '.{}' does not match file content",
            field, ext
        ))),
        None => Err(AppError::Validation(format!(
            "{}: filename must carry an extension",
            field
        ))),
    }
}

/// Validates and copies a multipart file into `root/{area}`, returning the
/// path relative to `root` that is stored on the record.
#[instrument(skip(root, file), fields(area = area.dir(), size = file.len()))]
pub async fn store_upload(
    root: &Path,
    area: UploadArea,
    field: &str,
    file: &mut TempFile<'_>,
    accept: Accept,
) -> Result<String, AppError> {
    if file.len() == 0 {
        return Err(AppError::Validation(format!("{}: file is empty", field)));
    }

    let mut head = Vec::with_capacity(SNIFF_LEN);
    {
        let mut reader = Box::pin(file.open().await?.take(SNIFF_LEN as u64));
        reader.read_to_end(&mut head).await?;
    }

    let raw_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string());

    let format = check_upload(field, raw_name.as_deref(), &head, accept)?;
    let stem = sanitize_stem(raw_name.as_deref().unwrap_or_default());
    let filename = unique_filename(&stem, format);

    let dir = root.join(area.dir());
    fs::create_dir_all(&dir).await?;
    file.copy_to(dir.join(&filename)).await?;

    info!(filename = %filename, "Stored upload");
    Ok(format!("{}/{}", area.dir(), filename))
}

fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let safe = relative
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    safe.then(|| root.join(relative))
}

/// Removes a previously stored file; a missing file is not an error.
#[instrument(skip(root))]
pub async fn remove_upload(root: &Path, relative: &str) {
    let Some(path) = resolve(root, relative) else {
        warn!("Refusing to remove a path outside the upload root");
        return;
    };

    if let Err(err) = fs::remove_file(&path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %err, "Failed to remove replaced upload");
        }
    }
}

#[instrument(skip(root))]
pub async fn read_upload(root: &Path, relative: &str) -> Result<Vec<u8>, AppError> {
    let path = resolve(root, relative)
        .ok_or_else(|| AppError::Validation(format!("Invalid stored path: {}", relative)))?;

    match fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
            format!("Stored file {} is missing", relative),
        )),
        Err(err) => Err(err.into()),
    }
}
