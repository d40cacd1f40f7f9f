// 该文件是 Pop Finder 项目的一部分。
// src/bitmap.rs - 已解码位图定义
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

use image::{DynamicImage, RgbaImage};
use thiserror::Error;

/// 源像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  /// 32 位 RGBA，直通 alpha
  Rgba8,
  /// 32 位 RGBA，预乘 alpha
  Rgba8Premultiplied,
  /// 32 位 BGRA，直通 alpha
  Bgra8,
  /// 24 位 RGB
  Rgb8,
  /// 8 位灰度
  Luma8,
}

impl PixelFormat {
  pub fn bytes_per_pixel(self) -> usize {
    match self {
      PixelFormat::Rgba8 | PixelFormat::Rgba8Premultiplied | PixelFormat::Bgra8 => 4,
      PixelFormat::Rgb8 => 3,
      PixelFormat::Luma8 => 1,
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("位图尺寸无效: {width}x{height}")]
  EmptyDimensions { width: u32, height: u32 },
  #[error("位图尺寸过大: {width}x{height}")]
  TooLarge { width: u32, height: u32 },
  #[error("像素缓冲区长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  BufferLength { expected: usize, actual: usize },
}

/// 调用方持有的已解码位图，核心流程只读不写
#[derive(Debug, Clone)]
pub struct Bitmap {
  width: u32,
  height: u32,
  format: PixelFormat,
  data: Box<[u8]>,
}

impl Bitmap {
  /// 不做校验，缓冲区是否合法在光栅化时检查
  pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
    Self {
      width,
      height,
      format,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  fn expected_len(&self) -> Result<usize, DecodeError> {
    (self.width as usize)
      .checked_mul(self.height as usize)
      .and_then(|n| n.checked_mul(self.format.bytes_per_pixel()))
      .ok_or(DecodeError::TooLarge {
        width: self.width,
        height: self.height,
      })
  }

  /// 光栅化为 8 位 RGBA 缓冲区
  ///
  /// 预乘 alpha 的像素按存储值原样输出，不做反预乘。
  pub fn to_rgba8(&self) -> Result<RgbaImage, DecodeError> {
    if self.width == 0 || self.height == 0 {
      return Err(DecodeError::EmptyDimensions {
        width: self.width,
        height: self.height,
      });
    }

    let expected = self.expected_len()?;
    if self.data.len() != expected {
      return Err(DecodeError::BufferLength {
        expected,
        actual: self.data.len(),
      });
    }

    let rgba: Vec<u8> = match self.format {
      PixelFormat::Rgba8 | PixelFormat::Rgba8Premultiplied => self.data.to_vec(),
      PixelFormat::Bgra8 => self
        .data
        .chunks_exact(4)
        .flat_map(|p| [p[2], p[1], p[0], p[3]])
        .collect(),
      PixelFormat::Rgb8 => self
        .data
        .chunks_exact(3)
        .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
        .collect(),
      PixelFormat::Luma8 => self
        .data
        .iter()
        .flat_map(|&l| [l, l, l, u8::MAX])
        .collect(),
    };

    RgbaImage::from_raw(self.width, self.height, rgba).ok_or(DecodeError::BufferLength {
      expected,
      actual: self.data.len(),
    })
  }
}

impl From<DynamicImage> for Bitmap {
  fn from(image: DynamicImage) -> Self {
    let (width, height) = (image.width(), image.height());
    match image {
      DynamicImage::ImageRgba8(buffer) => {
        Bitmap::new(width, height, PixelFormat::Rgba8, buffer.into_raw())
      }
      DynamicImage::ImageRgb8(buffer) => {
        Bitmap::new(width, height, PixelFormat::Rgb8, buffer.into_raw())
      }
      DynamicImage::ImageLuma8(buffer) => {
        Bitmap::new(width, height, PixelFormat::Luma8, buffer.into_raw())
      }
      // 16 位及浮点格式统一降到 8 位 RGBA
      other => Bitmap::new(width, height, PixelFormat::Rgba8, other.to_rgba8().into_raw()),
    }
  }
}

impl From<RgbaImage> for Bitmap {
  fn from(image: RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    Bitmap::new(width, height, PixelFormat::Rgba8, image.into_raw())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_sized_bitmap_is_rejected() {
    let bitmap = Bitmap::new(0, 4, PixelFormat::Rgba8, Vec::new());
    assert_eq!(
      bitmap.to_rgba8().unwrap_err(),
      DecodeError::EmptyDimensions {
        width: 0,
        height: 4
      }
    );
  }

  #[test]
  fn short_buffer_is_rejected() {
    let bitmap = Bitmap::new(2, 2, PixelFormat::Rgba8, vec![0; 15]);
    assert_eq!(
      bitmap.to_rgba8().unwrap_err(),
      DecodeError::BufferLength {
        expected: 16,
        actual: 15
      }
    );
  }

  #[test]
  fn bgra_is_swizzled() {
    let bitmap = Bitmap::new(1, 1, PixelFormat::Bgra8, vec![10, 20, 30, 40]);
    let rgba = bitmap.to_rgba8().unwrap();
    assert_eq!(rgba.get_pixel(0, 0).0, [30, 20, 10, 40]);
  }

  #[test]
  fn rgb_and_luma_become_opaque() {
    let rgb = Bitmap::new(1, 1, PixelFormat::Rgb8, vec![1, 2, 3]);
    assert_eq!(rgb.to_rgba8().unwrap().get_pixel(0, 0).0, [1, 2, 3, 255]);

    let luma = Bitmap::new(1, 1, PixelFormat::Luma8, vec![77]);
    assert_eq!(luma.to_rgba8().unwrap().get_pixel(0, 0).0, [77, 77, 77, 255]);
  }

  #[test]
  fn premultiplied_samples_are_kept_as_stored() {
    let bitmap = Bitmap::new(1, 1, PixelFormat::Rgba8Premultiplied, vec![64, 0, 0, 128]);
    assert_eq!(bitmap.to_rgba8().unwrap().get_pixel(0, 0).0, [64, 0, 0, 128]);
  }

  #[test]
  fn dynamic_image_keeps_native_layout() {
    let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(3, 2, image::Rgb([9, 8, 7])));
    let bitmap = Bitmap::from(image);
    assert_eq!(bitmap.format(), PixelFormat::Rgb8);
    assert_eq!((bitmap.width(), bitmap.height()), (3, 2));
    assert_eq!(bitmap.as_bytes().len(), 18);
  }
}
