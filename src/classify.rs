// 该文件是 Pop Finder 项目的一部分。
// src/classify.rs - 分类调用
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

use std::error::Error as StdError;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  bitmap::{Bitmap, DecodeError},
  interpret::{ClassificationResult, ConfidenceVector, WithLabel, interpret},
  model::{Model, ModelSlot},
  normalize::normalize,
  tensor::NormalizedTensor,
};

/// 三类错误都以返回值交给调用方，任何失败都不会被转换成 NoMatch
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型尚未就绪")]
  ModelNotReady,
  #[error("模型推理失败: {0}")]
  Inference(#[source] Box<dyn StdError + Send + Sync>),
}

impl PipelineError {
  fn inference(err: impl StdError + Send + Sync + 'static) -> Self {
    PipelineError::Inference(Box::new(err))
  }
}

/// 执行一次前向推理，读出每个类别的原始得分
pub fn infer_scores<M>(
  tensor: &NormalizedTensor,
  slot: &ModelSlot<M>,
) -> Result<ConfidenceVector, PipelineError>
where
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
{
  let Some(handle) = slot.handle() else {
    warn!("模型尚未加载，跳过推理");
    return Err(PipelineError::ModelNotReady);
  };

  let output = handle.infer(tensor).map_err(PipelineError::inference)?;
  let scores = ConfidenceVector::from_ne_bytes(output.as_bytes()).map_err(PipelineError::inference)?;
  debug!("模型输出 {} 个类别得分", scores.len());
  Ok(scores)
}

pub fn classify<T, M>(
  tensor: &NormalizedTensor,
  slot: &ModelSlot<M>,
) -> Result<ClassificationResult<T>, PipelineError>
where
  T: WithLabel,
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
{
  let scores = infer_scores(tensor, slot)?;
  Ok(interpret(&scores))
}

/// 归一化、推理、解读一次完成
pub fn classify_bitmap<T, M>(
  bitmap: &Bitmap,
  slot: &ModelSlot<M>,
) -> Result<ClassificationResult<T>, PipelineError>
where
  T: WithLabel,
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
{
  if slot.handle().is_none() {
    return Err(PipelineError::ModelNotReady);
  }
  let tensor = normalize(bitmap)?;
  classify(&tensor, slot)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    bitmap::PixelFormat,
    interpret::FigurineLabel,
    model::RawOutput,
  };

  #[derive(Debug, Error)]
  #[error("runtime fault")]
  struct Fault;

  enum Scripted {
    Scores(Vec<f32>),
    Bytes(Vec<u8>),
    Fail,
  }

  struct ScriptedModel {
    script: Scripted,
  }

  impl ScriptedModel {
    fn new(script: Scripted) -> Self {
      Self { script }
    }
  }

  impl Model for ScriptedModel {
    type Input = NormalizedTensor;
    type Error = Fault;

    fn infer(&mut self, _input: &NormalizedTensor) -> Result<RawOutput, Fault> {
      match &self.script {
        Scripted::Scores(scores) => Ok(RawOutput::from_f32(scores)),
        Scripted::Bytes(bytes) => Ok(RawOutput::from(bytes.clone())),
        Scripted::Fail => Err(Fault),
      }
    }
  }

  #[test]
  fn unloaded_slot_is_not_ready() {
    let slot: ModelSlot<ScriptedModel> = ModelSlot::new();
    let result = classify::<FigurineLabel, _>(&NormalizedTensor::default(), &slot);
    assert!(matches!(result, Err(PipelineError::ModelNotReady)));
  }

  #[test]
  fn unloaded_slot_is_checked_before_decoding() {
    let slot: ModelSlot<ScriptedModel> = ModelSlot::new();
    let broken = Bitmap::new(0, 0, PixelFormat::Rgba8, Vec::new());
    let result = classify_bitmap::<FigurineLabel, _>(&broken, &slot);
    assert!(matches!(result, Err(PipelineError::ModelNotReady)));
  }

  #[test]
  fn scores_flow_into_the_interpreter() {
    let slot = ModelSlot::ready(ScriptedModel::new(Scripted::Scores(vec![
      0.1, 0.95, 0.2, 0.05,
    ])));
    let result = classify::<FigurineLabel, _>(&NormalizedTensor::default(), &slot).unwrap();
    assert_eq!(result.label_str(), Some("The Philosophy"));
    assert_eq!(result.confidence_percent(), Some(95));
  }

  #[test]
  fn runtime_fault_is_an_inference_error() {
    let slot = ModelSlot::ready(ScriptedModel::new(Scripted::Fail));
    let result = classify::<FigurineLabel, _>(&NormalizedTensor::default(), &slot);
    assert!(matches!(result, Err(PipelineError::Inference(_))));
  }

  #[test]
  fn malformed_output_is_an_inference_error() {
    for bytes in [vec![0u8; 6], Vec::new()] {
      let slot = ModelSlot::ready(ScriptedModel::new(Scripted::Bytes(bytes)));
      let result = classify::<FigurineLabel, _>(&NormalizedTensor::default(), &slot);
      assert!(matches!(result, Err(PipelineError::Inference(_))));
    }
  }

  #[test]
  fn decode_failure_is_reported() {
    let slot = ModelSlot::ready(ScriptedModel::new(Scripted::Scores(vec![1.0])));
    let broken = Bitmap::new(3, 3, PixelFormat::Rgb8, vec![0; 5]);
    let result = classify_bitmap::<FigurineLabel, _>(&broken, &slot);
    assert!(matches!(result, Err(PipelineError::Decode(_))));
  }
}
