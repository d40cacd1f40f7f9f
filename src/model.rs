// 该文件是 Pop Finder 项目的一部分。
// src/model.rs - 模型
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

use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;
use tracing::info;

pub trait Model {
  type Input;
  type Error;

  /// 绑定唯一输入，执行一次前向推理，返回唯一输出的原始字节
  fn infer(&mut self, input: &Self::Input) -> Result<RawOutput, Self::Error>;
}

/// 模型输出张量的原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
  bytes: Box<[u8]>,
}

impl RawOutput {
  pub fn from_f32(values: &[f32]) -> Self {
    values
      .iter()
      .flat_map(|v| v.to_ne_bytes())
      .collect::<Vec<_>>()
      .into()
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl From<Vec<u8>> for RawOutput {
  fn from(bytes: Vec<u8>) -> Self {
    Self {
      bytes: bytes.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum InvokeError<E> {
  #[error("模型推理失败: {0}")]
  Model(E),
  #[error("模型锁已损坏，之前的推理发生了 panic")]
  Poisoned,
}

/// 已加载的模型，可在多处共享；同一时刻只允许一次推理
pub struct ModelHandle<M> {
  inner: Arc<Mutex<M>>,
}

impl<M> Clone for ModelHandle<M> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<M: Model> ModelHandle<M> {
  pub fn new(model: M) -> Self {
    Self {
      inner: Arc::new(Mutex::new(model)),
    }
  }

  pub fn infer(&self, input: &M::Input) -> Result<RawOutput, InvokeError<M::Error>> {
    let mut model = self.inner.lock().map_err(|_| InvokeError::Poisoned)?;
    model.infer(input).map_err(InvokeError::Model)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
  Unloaded,
  Ready,
}

/// 模型槽：启动时创建，由加载器转换一次到就绪状态，之后不再卸载
pub struct ModelSlot<M> {
  handle: OnceLock<ModelHandle<M>>,
}

impl<M> Default for ModelSlot<M> {
  fn default() -> Self {
    Self {
      handle: OnceLock::new(),
    }
  }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("模型槽已就绪，不能重复装入")]
pub struct SlotOccupied;

impl<M: Model> ModelSlot<M> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn ready(model: M) -> Self {
    Self {
      handle: OnceLock::from(ModelHandle::new(model)),
    }
  }

  pub fn state(&self) -> ModelState {
    if self.handle.get().is_some() {
      ModelState::Ready
    } else {
      ModelState::Unloaded
    }
  }

  pub fn handle(&self) -> Option<&ModelHandle<M>> {
    self.handle.get()
  }

  /// Unloaded -> Ready，只能发生一次
  pub fn install(&self, model: M) -> Result<&ModelHandle<M>, SlotOccupied> {
    self
      .handle
      .set(ModelHandle::new(model))
      .map_err(|_| SlotOccupied)?;
    info!("模型已就绪");
    self.handle.get().ok_or(SlotOccupied)
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};
