//! Image -> flat `RGBRGB...` byte buffer, the layout the device kernel reads.

use rayon::prelude::*;

use super::{Image, Pixel};

/// Bytes per pixel in the flat layout.
pub const BYTES_PER_PIXEL: usize = 3;

/// Flatten `image` into `3 * W * H` bytes, row-major, no padding.
///
/// Rows are copied in parallel; every row owns a disjoint slice of the
/// output, so no synchronization is needed beyond the final join.
pub fn flatten(image: &Image) -> Vec<u8> {
    let mut out = vec![0u8; image.pixels().len() * BYTES_PER_PIXEL];
    flatten_into(image, &mut out);
    out
}

/// Like [`flatten`] but writes into a caller-owned buffer of exactly
/// `3 * W * H` bytes.
///
/// # Panics
///
/// Panics if `out` has the wrong length.
pub fn flatten_into(image: &Image, out: &mut [u8]) {
    assert_eq!(
        out.len(),
        image.pixels().len() * BYTES_PER_PIXEL,
        "flat buffer length must be 3 * W * H"
    );
    if image.is_empty() {
        return;
    }

    let row_bytes = image.width() as usize * BYTES_PER_PIXEL;
    out.par_chunks_mut(row_bytes)
        .zip(image.pixels().par_chunks(image.width() as usize))
        .for_each(|(dst, src)| write_row(dst, src));
}

fn write_row(dst: &mut [u8], src: &[Pixel]) {
    for (bytes, px) in dst.chunks_exact_mut(BYTES_PER_PIXEL).zip(src) {
        bytes[0] = px.r;
        bytes[1] = px.g;
        bytes[2] = px.b;
    }
}
