// 该文件是 Pop Finder 项目的一部分。
// src/normalize.rs - 图像归一化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 将任意尺寸的位图转换为模型所需的固定尺寸 RGB 张量。
//!
//! 缩放为单次拉伸，两个轴独立缩放，不保持宽高比。

use image::{RgbImage, imageops::FilterType};
use tracing::debug;

use crate::{
  bitmap::{Bitmap, DecodeError},
  tensor::{NormalizedTensor, RGB_CHANNELS, RgbNhwcTensor},
};

const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// 归一化为 224x224x3 的模型输入
pub fn normalize(bitmap: &Bitmap) -> Result<NormalizedTensor, DecodeError> {
  normalize_to(bitmap)
}

pub fn normalize_to<const W: u32, const H: u32>(
  bitmap: &Bitmap,
) -> Result<RgbNhwcTensor<W, H>, DecodeError> {
  debug!(
    "归一化位图: {}x{} {:?}",
    bitmap.width(),
    bitmap.height(),
    bitmap.format()
  );

  let rgba = bitmap.to_rgba8()?;

  // alpha 在缩放之前丢弃，避免滤波时参与加权
  let rgb = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
    let [r, g, b, _] = rgba.get_pixel(x, y).0;
    image::Rgb([r, g, b])
  });

  let resized = if rgb.dimensions() == (W, H) {
    rgb
  } else {
    image::imageops::resize(&rgb, W, H, RESIZE_FILTER)
  };

  let mut tensor = RgbNhwcTensor::<W, H>::default();
  let slice = tensor.as_mut();
  for (index, pixel) in resized.pixels().enumerate() {
    let base = index * RGB_CHANNELS;
    for c in 0..RGB_CHANNELS {
      slice[base + c] = f32::from(pixel[c]) / 255.0;
    }
  }

  Ok(tensor)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{bitmap::PixelFormat, tensor::AsNhwcTensor};

  fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Bitmap {
    let data = rgba
      .iter()
      .copied()
      .cycle()
      .take((width * height * 4) as usize)
      .collect();
    Bitmap::new(width, height, PixelFormat::Rgba8, data)
  }

  #[test]
  fn output_has_fixed_length_for_any_size() {
    for (w, h) in [(1, 1), (3, 500), (640, 480), (224, 224), (1000, 7)] {
      let tensor = normalize(&solid(w, h, [12, 200, 99, 255])).unwrap();
      assert_eq!(tensor.len(), 224 * 224 * 3, "{w}x{h}");
      assert!(tensor.as_nhwc().iter().all(|v| (0.0..=1.0).contains(v)));
    }
  }

  #[test]
  fn alpha_does_not_reach_the_tensor() {
    let transparent = normalize(&solid(31, 17, [255, 0, 0, 0])).unwrap();
    let opaque = normalize(&solid(31, 17, [255, 0, 0, 255])).unwrap();
    assert_eq!(transparent, opaque);
    let first = &transparent.as_nhwc()[..3];
    assert!(first[0] > 0.99);
    assert!(first[1] < 0.01 && first[2] < 0.01);
  }

  #[test]
  fn channels_are_interleaved_row_major() {
    // 左列红色，右列蓝色，尺寸一致时不做缩放
    let mut data = Vec::new();
    for _ in 0..2 {
      data.extend_from_slice(&[255, 0, 0, 255]);
      data.extend_from_slice(&[0, 0, 255, 255]);
    }
    let bitmap = Bitmap::new(2, 2, PixelFormat::Rgba8, data);
    let tensor: RgbNhwcTensor<2, 2> = normalize_to(&bitmap).unwrap();
    assert_eq!(
      tensor.as_nhwc(),
      &[
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, //
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
      ]
    );
  }

  #[test]
  fn samples_are_divided_by_255() {
    let bitmap = Bitmap::new(1, 1, PixelFormat::Rgb8, vec![0, 51, 255]);
    let tensor: RgbNhwcTensor<1, 1> = normalize_to(&bitmap).unwrap();
    assert_eq!(tensor.as_nhwc(), &[0.0, 51.0 / 255.0, 1.0]);
  }

  #[test]
  fn stretch_ignores_aspect_ratio() {
    // 上半黑、下半白的宽图，拉伸后上下两端仍分别为黑和白
    let (w, h) = (400u32, 20u32);
    let mut data = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
      for _ in 0..w {
        data.push(if y < h / 2 { 0 } else { 255 });
      }
    }
    let tensor = normalize(&Bitmap::new(w, h, PixelFormat::Luma8, data)).unwrap();
    let values = tensor.as_nhwc();
    assert!(values[0] < 0.01);
    assert!(values[values.len() - 1] > 0.99);
  }

  #[test]
  fn identical_input_gives_identical_output() {
    let bitmap = Bitmap::new(
      5,
      3,
      PixelFormat::Rgb8,
      (0..45).map(|v| (v * 5) as u8).collect(),
    );
    assert_eq!(normalize(&bitmap).unwrap(), normalize(&bitmap).unwrap());
  }

  #[test]
  fn undecodable_bitmap_fails() {
    let bitmap = Bitmap::new(4, 4, PixelFormat::Rgba8, vec![0; 3]);
    assert!(matches!(
      normalize(&bitmap),
      Err(DecodeError::BufferLength { .. })
    ));
  }
}
