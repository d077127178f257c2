use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::time::Instant;
use uuid::Uuid;

use crate::error::CameraError;

/// Which acquisition path produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedMode {
    Stream,
    Polled,
}

/// An encoded camera frame. Cloning is cheap, the JPEG payload is reference counted.
#[derive(Debug, Clone)]
pub struct Frame {
    id: Uuid,
    mode: FeedMode,
    captured_at: Instant,
    jpeg: Bytes,
}

impl Frame {
    pub fn new(mode: FeedMode, jpeg: Bytes, captured_at: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            captured_at,
            jpeg,
        }
    }

    /// Encodes a decoded image as JPEG, used by sources that hand back raw pixels.
    pub fn from_image(
        mode: FeedMode,
        image: &DynamicImage,
        captured_at: Instant,
    ) -> Result<Self, CameraError> {
        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut encoded, ImageFormat::Jpeg)?;
        Ok(Self::new(mode, Bytes::from(encoded.into_inner()), captured_at))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> FeedMode {
        self.mode
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn jpeg(&self) -> &Bytes {
        &self.jpeg
    }

    pub fn decode(&self) -> Result<DynamicImage, CameraError> {
        Ok(image::load_from_memory(&self.jpeg)?)
    }

    pub fn decode_rgb(&self) -> Result<RgbImage, CameraError> {
        Ok(self.decode()?.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(
            width,
            height,
            Rgb(color),
        ))
    }

    #[test]
    fn cloning_frame_shares_jpeg_payload() {
        let f1 = Frame::from_image(FeedMode::Polled, &solid(16, 16, [1, 2, 3]), Instant::now())
            .unwrap();
        let f2 = f1.clone();
        assert_eq!(f1.jpeg().as_ptr(), f2.jpeg().as_ptr());
        assert_eq!(f1.id(), f2.id());
    }

    #[test]
    fn decodes_back_to_original_dimensions() {
        let frame = Frame::from_image(FeedMode::Stream, &solid(32, 18, [200, 10, 10]), Instant::now())
            .unwrap();
        let rgb = frame.decode_rgb().unwrap();
        assert_eq!(rgb.dimensions(), (32, 18));
        assert_eq!(frame.mode(), FeedMode::Stream);
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let frame = Frame::new(FeedMode::Polled, Bytes::from_static(b"not a jpeg"), Instant::now());
        assert!(matches!(frame.decode(), Err(CameraError::Decode(_))));
    }
}
