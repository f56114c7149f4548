use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::Frame;

pub const INPUT_SIZE: u32 = 224;
pub const NUM_LANDMARKS: usize = 21;

/// Maps model-input coordinates back into the source frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl Letterbox {
    pub fn for_frame(width: u32, height: u32, target_size: u32) -> Self {
        let scale = target_size as f32 / (width.max(height).max(1) as f32);
        let new_w = (width as f32 * scale).round().max(1.0) as u32;
        let new_h = (height as f32 * scale).round().max(1.0) as u32;
        Self {
            scale,
            pad_x: ((target_size as i64 - new_w as i64) / 2).max(0) as f32,
            pad_y: ((target_size as i64 - new_h as i64) / 2).max(0) as f32,
            orig_w: width,
            orig_h: height,
        }
    }

    fn resized(&self) -> (u32, u32) {
        (
            (self.orig_w as f32 * self.scale).round().max(1.0) as u32,
            (self.orig_h as f32 * self.scale).round().max(1.0) as u32,
        )
    }

    pub fn project(&self, landmarks: &[[f32; 3]]) -> Vec<(f32, f32)> {
        let max_x = self.orig_w.saturating_sub(1) as f32;
        let max_y = self.orig_h.saturating_sub(1) as f32;
        landmarks
            .iter()
            .map(|[x, y, _z]| {
                (
                    ((x - self.pad_x) / self.scale).clamp(0.0, max_x),
                    ((y - self.pad_y) / self.scale).clamp(0.0, max_y),
                )
            })
            .collect()
    }
}

/// Resizes the frame into a black square canvas and normalizes RGB to [0, 1]
/// in NHWC layout.
pub fn letterbox_input(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, Letterbox)> {
    if !frame.has_valid_dimensions() {
        return Err(anyhow!(
            "frame buffer size mismatch: {} bytes for {}x{}",
            frame.rgba.len(),
            frame.width,
            frame.height
        ));
    }

    let letterbox = Letterbox::for_frame(frame.width, frame.height, target_size);
    let (new_w, new_h) = letterbox.resized();

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let side = target_size as usize;
    let mut canvas = vec![0u8; side * side * 4];
    let src_stride = new_w as usize * 4;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (row, src) in resized.chunks_exact(src_stride).enumerate() {
        let offset = (pad_y + row) * side * 4 + pad_x * 4;
        canvas[offset..offset + src_stride].copy_from_slice(src);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec((1, side, side, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((input, letterbox))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}
