//! Small image files written to disk for image documents.

use std::path::{Path, PathBuf};

use image::{ImageResult, Rgb, RgbImage};

/// Writes a `4x4` PNG filled with `color` to `dir/name` and returns its path.
pub fn solid_png(dir: &Path, name: &str, color: [u8; 3]) -> ImageResult<PathBuf> {
    let path = dir.join(name);
    RgbImage::from_pixel(4, 4, Rgb(color)).save(&path)?;
    Ok(path)
}

/// Writes a `4x4` PNG whose left half is `left` and right half is `right`.
pub fn split_png(dir: &Path, name: &str, left: [u8; 3], right: [u8; 3]) -> ImageResult<PathBuf> {
    let path = dir.join(name);
    RgbImage::from_fn(4, 4, |x, _| Rgb(if x < 2 { left } else { right })).save(&path)?;
    Ok(path)
}
