use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use image::ImageFormat;
use thumbsmith_contracts::images::{
    is_supported_mime, mime_for_path, ImageCategory, ImageSet, InlineImage, MAX_IMAGES_PER_CATEGORY,
    MAX_IMAGE_BYTES,
};

/// A file the user picked, before it is read.
pub trait SelectedFile: Sync {
    /// Size reported by the file system, if known without reading.
    fn size(&self) -> Option<u64>;
    /// MIME type implied by the file name.
    fn declared_mime(&self) -> Option<&'static str>;
    fn read(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SelectedFile for LocalFile {
    fn size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|meta| meta.len())
    }

    fn declared_mime(&self) -> Option<&'static str> {
        mime_for_path(&self.path)
    }

    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).with_context(|| format!("failed reading {}", self.path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeWarning {
    TooManyFiles { max: usize },
    FileTooLarge,
    UnsupportedType,
    ReadFailed { failed: usize },
}

impl fmt::Display for IntakeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyFiles { max } => write!(
                f,
                "You can only upload up to {max} images in total for one category."
            ),
            Self::FileTooLarge => f.write_str("Image size should not exceed 4MB."),
            Self::UnsupportedType => {
                f.write_str("Only PNG, JPEG, and WEBP images are supported.")
            }
            Self::ReadFailed { failed: 1 } => f.write_str("Failed to read an image file."),
            Self::ReadFailed { failed } => write!(f, "Failed to read {failed} image files."),
        }
    }
}

impl IntakeWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooManyFiles { .. } => "too_many_files",
            Self::FileTooLarge => "file_too_large",
            Self::UnsupportedType => "unsupported_type",
            Self::ReadFailed { .. } => "read_failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub appended: usize,
    pub warnings: Vec<IntakeWarning>,
}

enum DecodeFailure {
    TooLarge,
    Unsupported,
    Unreadable,
}

/// Validates and decodes a selection into `set`.
///
/// Only the first `remaining_capacity` files are considered. Oversized,
/// unsupported and unreadable files are skipped with one warning per kind.
/// Reads run concurrently; the set is extended once, after every read has
/// settled, in selection order.
pub fn intake_files<F: SelectedFile>(set: &mut ImageSet, files: &[F]) -> IntakeReport {
    let mut report = IntakeReport::default();
    let take = files.len().min(set.remaining_capacity());
    if files.len() > take {
        report.warnings.push(IntakeWarning::TooManyFiles {
            max: MAX_IMAGES_PER_CATEGORY,
        });
    }

    let mut oversized = false;
    let accepted = files[..take]
        .iter()
        .filter(|file| match file.size() {
            Some(size) if size > MAX_IMAGE_BYTES => {
                oversized = true;
                false
            }
            _ => true,
        })
        .collect::<Vec<&F>>();

    let decoded = thread::scope(|scope| {
        let handles = accepted
            .iter()
            .map(|file| scope.spawn(move || decode_file(*file)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(Err(DecodeFailure::Unreadable)))
            .collect::<Vec<_>>()
    });

    let mut unsupported = false;
    let mut unreadable = 0usize;
    let mut batch = Vec::new();
    for result in decoded {
        match result {
            Ok(image) => batch.push(image),
            Err(DecodeFailure::TooLarge) => oversized = true,
            Err(DecodeFailure::Unsupported) => unsupported = true,
            Err(DecodeFailure::Unreadable) => unreadable += 1,
        }
    }

    if oversized {
        report.warnings.push(IntakeWarning::FileTooLarge);
    }
    if unsupported {
        report.warnings.push(IntakeWarning::UnsupportedType);
    }
    if unreadable > 0 {
        report
            .warnings
            .push(IntakeWarning::ReadFailed { failed: unreadable });
    }
    report.appended = set.append_batch(batch);
    report
}

fn decode_file<F: SelectedFile>(file: &F) -> Result<InlineImage, DecodeFailure> {
    let bytes = file.read().map_err(|_| DecodeFailure::Unreadable)?;
    if bytes.len() as u64 > MAX_IMAGE_BYTES {
        return Err(DecodeFailure::TooLarge);
    }
    let mime_type = match image::guess_format(&bytes) {
        Ok(format) => mime_for_format(format).ok_or(DecodeFailure::Unsupported)?,
        Err(_) => file.declared_mime().ok_or(DecodeFailure::Unsupported)?,
    };
    if !is_supported_mime(mime_type) {
        return Err(DecodeFailure::Unsupported);
    }
    InlineImage::from_bytes(mime_type, &bytes).map_err(|_| DecodeFailure::Unreadable)
}

fn mime_for_format(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// The two image categories one tool submission carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInputs {
    references: ImageSet,
    elements: ImageSet,
}

impl Default for ImageInputs {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageInputs {
    pub fn new() -> Self {
        Self {
            references: ImageSet::new(ImageCategory::StyleReference),
            elements: ImageSet::new(ImageCategory::CustomElement),
        }
    }

    pub fn references(&self) -> &[InlineImage] {
        self.references.images()
    }

    pub fn elements(&self) -> &[InlineImage] {
        self.elements.images()
    }

    fn set_mut(&mut self, category: ImageCategory) -> &mut ImageSet {
        match category {
            ImageCategory::StyleReference => &mut self.references,
            ImageCategory::CustomElement => &mut self.elements,
        }
    }

    pub fn add_files<F: SelectedFile>(
        &mut self,
        category: ImageCategory,
        files: &[F],
    ) -> IntakeReport {
        intake_files(self.set_mut(category), files)
    }

    pub fn remove(&mut self, category: ImageCategory, index: usize) -> Option<InlineImage> {
        self.set_mut(category).remove(index)
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.elements.is_empty()
    }
}
