// 该文件是 Pop Finder 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, bitmap::Bitmap, input::Capture, url_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

pub(crate) fn read_bitmap(path: &Path) -> Result<Bitmap, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  debug!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(Bitmap::from(image))
}

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
      .unwrap_or(false)
}

/// 单张图像文件
pub struct ImageFileInput {
  capture: Option<Capture>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url_path(url))
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let bitmap = read_bitmap(path)?;
    Ok(Self {
      capture: Some(Capture {
        bitmap,
        source: path.display().to_string(),
        index: 0,
      }),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = Capture;

  fn next(&mut self) -> Option<Self::Item> {
    self.capture.take()
  }
}

/// 目录下的全部图像文件，按文件名排序逐张读取
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
  index: u64,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url_path(url))
  }
}

impl DirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory.as_ref())? {
      let path = entry?.path();
      if is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();
    debug!(
      "目录 {} 中共有 {} 张图像",
      directory.as_ref().display(),
      files.len()
    );

    Ok(Self {
      files: files.into_iter(),
      index: 0,
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = Capture;

  /// 无法读取的文件记录日志后跳过
  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match read_bitmap(&path) {
        Ok(bitmap) => {
          let capture = Capture {
            bitmap,
            source: path.display().to_string(),
            index: self.index,
          };
          self.index += 1;
          return Some(capture);
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
