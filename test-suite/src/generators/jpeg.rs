//! JPEG payloads for image stream tests

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Encode a small RGB gradient as a baseline JPEG
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.push((x * 255 / width.max(1)) as u8);
            pixels.push((y * 255 / height.max(1)) as u8);
            pixels.push(128);
        }
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, 85);
    encoder
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .expect("in-memory JPEG encoding");
    out
}

/// Drop the trailing EOI marker
pub fn strip_eoi(jpeg: &[u8]) -> Vec<u8> {
    let mut data = jpeg.to_vec();
    if data.ends_with(&[0xFF, 0xD9]) {
        data.truncate(data.len() - 2);
    }
    data
}

/// Prefix the stream with bytes that are not part of any marker segment
pub fn with_leading_garbage(jpeg: &[u8]) -> Vec<u8> {
    let mut data = b"\r\n\0\0junk".to_vec();
    data.extend_from_slice(jpeg);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_jpeg_framing() {
        let jpeg = sample_jpeg(8, 8);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(jpeg.ends_with(&[0xFF, 0xD9]));
        assert!(!strip_eoi(&jpeg).ends_with(&[0xFF, 0xD9]));
    }
}
