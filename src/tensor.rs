// 该文件是 Pop Finder 项目的一部分。
// src/tensor.rs - NHWC 归一化张量定义
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

pub const RGB_CHANNELS: usize = 3;
pub const MODEL_INPUT_W: u32 = 224;
pub const MODEL_INPUT_H: u32 = 224;

/// 分类模型的输入张量：224x224x3
pub type NormalizedTensor = RgbNhwcTensor<MODEL_INPUT_W, MODEL_INPUT_H>;

pub trait AsNhwcTensor<const W: u32, const H: u32> {
  fn as_nhwc(&self) -> &[f32];
}

pub trait TensorLayout {
  /// [N, H, W, C]
  fn shape(&self) -> [i64; 4];
}

/// 行优先、通道交错（R, G, B）的浮点张量
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> RgbNhwcTensor<W, H> {
  pub const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcTensor<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0f32; Self::LEN].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for RgbNhwcTensor<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNhwcTensor<W, H> for RgbNhwcTensor<W, H> {
  fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

impl<const W: u32, const H: u32> TensorLayout for RgbNhwcTensor<W, H> {
  fn shape(&self) -> [i64; 4] {
    [1, H as i64, W as i64, RGB_CHANNELS as i64]
  }
}
