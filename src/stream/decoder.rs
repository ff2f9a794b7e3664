//! Seams between the stream logic and the actual video decoding.

use crate::error::StreamFault;
use image::imageops::{self, FilterType};
use std::time::Duration;

/// A decoded video frame.
pub type Image = image::RgbImage;

/// One live decode session.
pub trait FrameDecoder {
    /// Decode the next frame. `Ok(None)` means the stream ended.
    fn next_frame(&mut self) -> Result<Option<Image>, StreamFault>;
}

/// Opens decode sessions for source URLs.
pub trait DecoderFactory {
    type Decoder: FrameDecoder;

    /// Open `url`, giving up on connection after `timeout`.
    fn open(&mut self, url: &str, timeout: Duration) -> Result<Self::Decoder, StreamFault>;
}

/// Scale `image` to exactly `width` x `height`.
pub fn resize_to(image: Image, width: u32, height: u32) -> Image {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Triangle)
}
