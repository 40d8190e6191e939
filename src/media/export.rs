// SPDX-License-Identifier: GPL-3.0-only

//! Writing captured frames to disk

use super::{Encoding, Image, ImageConverter, ImageFormat};
use crate::errors::{AppError, AppResult};
use std::path::Path;
use tracing::debug;

/// Write the image bytes verbatim
pub fn write_raw(image: &Image, path: &Path) -> AppResult<()> {
    std::fs::write(path, image.as_bytes())?;
    debug!(path = %path.display(), bytes = image.as_bytes().len(), "Wrote raw frame");
    Ok(())
}

/// Convert to RGB24 and encode; the container follows the file extension
pub fn write_rgb(image: &Image, path: &Path) -> AppResult<()> {
    let format = image.format();
    let mut converter = ImageConverter::new(format.with_encoding(Encoding::Rgb24));
    converter.convert(image)?;

    let rgb = image::RgbImage::from_raw(
        format.width(),
        format.height(),
        converter.into_image().as_bytes().to_vec(),
    )
    .ok_or_else(|| AppError::Export("RGB buffer does not match image size".to_string()))?;

    rgb.save(path)?;
    debug!(path = %path.display(), "Wrote RGB frame");
    Ok(())
}

/// File name stem for a frame: `<name>_<index>_<w>x<h>.<ENC>`
pub fn frame_file_stem(device_name: &str, settings_index: usize, format: &ImageFormat) -> String {
    format!(
        "{}_{}_{}x{}.{}",
        sanitize_name(device_name),
        settings_index,
        format.width(),
        format.height(),
        format.encoding()
    )
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "camera".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PixelBuffer;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("framegrab-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_file_stem() {
        let format = ImageFormat::new(640, 480, Encoding::Yuyv).unwrap();
        assert_eq!(
            frame_file_stem("HD Webcam: C270", 3, &format),
            "HD_Webcam__C270_3_640x480.YUYV"
        );
        assert_eq!(frame_file_stem("  ", 0, &format), "camera_0_640x480.YUYV");
    }

    #[test]
    fn test_write_raw_and_ppm() {
        let dir = temp_dir("export");
        let format = ImageFormat::new(2, 2, Encoding::Bgr24).unwrap();
        let bytes: Vec<u8> = (0..12).collect();
        let image = Image::from_buffer(format, PixelBuffer::from(bytes.clone())).unwrap();

        let raw = dir.join("frame.raw");
        write_raw(&image, &raw).unwrap();
        assert_eq!(std::fs::read(&raw).unwrap(), bytes);

        let ppm = dir.join("frame.ppm");
        write_rgb(&image, &ppm).unwrap();
        let decoded = image::open(&ppm).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        // BGR -> RGB swap
        assert_eq!(decoded.get_pixel(0, 0).0, [2, 1, 0]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
