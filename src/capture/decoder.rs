use bytes::Bytes;
use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::frame::{Frame, PixelFormat};
use super::CaptureError;

/// Decode one JPEG image into an RGB frame
pub fn decode_jpeg(data: &[u8], sequence: u64) -> Result<Frame, CaptureError> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(data, options);
    let pixels = decoder
        .decode()
        .map_err(|e| CaptureError::Decode(e.to_string()))?;

    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| CaptureError::Decode("missing JPEG dimensions".into()))?;

    Ok(Frame::new(
        sequence,
        width as u32,
        height as u32,
        PixelFormat::Rgb24,
        Bytes::from(pixels),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fixtures::jpeg_fixture;

    #[test]
    fn decodes_rgb_frame() {
        let frame = decode_jpeg(&jpeg_fixture(8, 6), 42).unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
        assert_eq!(frame.sequence(), 42);
        assert_eq!(frame.meta.format, PixelFormat::Rgb24);
        assert_eq!(frame.data.len(), 8 * 6 * 3);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_jpeg(&[0xFF, 0xD8, 0x00, 0x01], 0).unwrap_err();
        assert!(matches!(err, CaptureError::Decode(_)));
    }
}
