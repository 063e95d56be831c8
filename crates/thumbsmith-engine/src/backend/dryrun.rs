use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use thumbsmith_contracts::images::InlineImage;

use super::GenerativeBackend;
use crate::request::{CompositeRequest, OutputModality};
use crate::response::BackendReply;

const DRYRUN_WIDTH: u32 = 320;
const DRYRUN_HEIGHT: u32 = 180;

/// Offline backend. Answers deterministically from the request text, so the
/// whole pipeline can run without credentials.
pub struct DryrunBackend;

impl GenerativeBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, _model: &str, request: &CompositeRequest) -> Result<BackendReply> {
        let instruction = request.instruction().unwrap_or_default();
        match request.modality {
            OutputModality::Text => Ok(BackendReply::text(&format!(
                "Dry-run thumbnail prompt {} built from {} image(s).",
                short_id(instruction),
                request.image_count()
            ))),
            OutputModality::Image => {
                let image = render_placeholder(instruction, request.image_count() as u64)?;
                Ok(BackendReply::image(&image))
            }
        }
    }
}

fn render_placeholder(prompt: &str, seed: u64) -> Result<InlineImage> {
    let (r, g, b) = color_from_prompt(prompt, seed);
    let mut image = RgbImage::new(DRYRUN_WIDTH, DRYRUN_HEIGHT);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .context("failed to encode dry-run image")?;
    InlineImage::from_bytes("image/png", &encoded.into_inner())
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}
