//! Avatar image processing.
//!
//! Avatars are stored inline on the persona as `data:image/png;base64,...`
//! URLs. Any format the `image` crate can decode is accepted; the result is
//! always a PNG thumbnail that fits inside [`AVATAR_SIZE`] square.

use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, ImageReader};

/// Maximum avatar edge length in pixels.
pub const AVATAR_SIZE: u32 = 128;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Supported image extensions (lowercase)
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Check if a file path points to a supported image format
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load an image file and turn it into an avatar data URL.
pub fn avatar_from_path(path: &Path) -> anyhow::Result<String> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    encode_avatar(&img)
}

/// Turn raw image bytes into an avatar data URL.
#[cfg(test)]
pub(crate) fn avatar_from_bytes(data: &[u8]) -> anyhow::Result<String> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    encode_avatar(&img)
}

/// Decode an avatar data URL back into PNG bytes.
#[cfg(test)]
pub(crate) fn decode_avatar(data_url: &str) -> Option<Vec<u8>> {
    let payload = data_url.strip_prefix(DATA_URL_PREFIX)?;
    STANDARD.decode(payload).ok()
}

/// Shrink to fit inside [`AVATAR_SIZE`]; smaller images are left as is.
fn resize_to_fit(img: &DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w <= AVATAR_SIZE && h <= AVATAR_SIZE {
        return img.clone();
    }
    img.thumbnail(AVATAR_SIZE, AVATAR_SIZE)
}

fn encode_avatar(img: &DynamicImage) -> anyhow::Result<String> {
    let thumbnail = resize_to_fit(img);

    let mut buffer = Vec::new();
    thumbnail.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;

    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(buffer)))
}
