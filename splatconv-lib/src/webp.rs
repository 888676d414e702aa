//! Lossless RGBA WebP encode/decode behind a minimal adapter surface, so
//! the image codec stays replaceable without touching the SOG logic.

use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageFormat};

pub(crate) struct Texture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Texture {
    pub(crate) fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

pub(crate) fn encode_lossless(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out)
        .encode(rgba, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| format!("webp encode error: {}", e))?;
    Ok(out)
}

pub(crate) fn decode(data: &[u8]) -> Result<Texture, String> {
    let img = image::load_from_memory_with_format(data, ImageFormat::WebP)
        .map_err(|e| format!("webp decode error: {}", e))?;
    let rgba = img.to_rgba8();
    Ok(Texture {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}
