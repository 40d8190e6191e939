// SPDX-License-Identifier: GPL-3.0-only

//! Orientation correction for bottom-up native frames

use super::Image;
use crate::errors::ImageError;

/// Mirror `source` top-to-bottom into `destination`
///
/// Row `y` of the source lands on row `height - 1 - y` of the destination.
/// Both images must share the same format.
pub fn flip_vertically(source: &Image, destination: &mut Image) -> Result<(), ImageError> {
    if source.format() != destination.format() {
        return Err(ImageError::FormatMismatch);
    }

    let line = source.format().bytes_per_line();
    let src_lines = source.as_bytes().chunks_exact(line);
    let dst_lines = destination
        .buffer_mut()
        .as_mut_slice()
        .chunks_exact_mut(line)
        .rev();

    for (src, dst) in src_lines.zip(dst_lines) {
        dst.copy_from_slice(src);
    }

    Ok(())
}
