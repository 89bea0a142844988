// Image Preprocessing
// Shorter-side resize, center crop and CLIP normalization into a CHW tensor

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Returns `3 * size * size` floats in channel-major order.
pub fn clip_tensor(image: &DynamicImage, size: u32) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let shorter = width.min(height).max(1) as f64;
    let scale = size as f64 / shorter;
    let new_w = ((width as f64 * scale).round() as u32).max(size);
    let new_h = ((height as f64 * scale).round() as u32).max(size);

    let resized = image.resize_exact(new_w, new_h, FilterType::CatmullRom);
    let left = (new_w - size) / 2;
    let top = (new_h - size) / 2;
    let rgb = resized.crop_imm(left, top, size, size).to_rgb8();

    let plane = (size * size) as usize;
    let mut tensor = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[c * plane + offset] = (value - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }
    tensor
}
