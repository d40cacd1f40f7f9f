// 该文件是 Pop Finder 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 分类模型
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

use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, RawOutput},
  tensor::{AsNhwcTensor, NormalizedTensor, TensorLayout},
  url_path,
};

const CLASSIFIER_NUM_INPUTS: usize = 1;
const CLASSIFIER_NUM_OUTPUTS: usize = 1;

pub struct OnnxModel {
  session: Session,
}

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

fn ort_error(err: impl std::fmt::Display) -> OnnxModelError {
  OnnxModelError::OrtError(err.to_string())
}

pub struct OnnxModelBuilder {
  model_path: PathBuf,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(Self::from_path(url_path(url)))
  }
}

impl OnnxModelBuilder {
  pub fn from_path(path: impl AsRef<Path>) -> Self {
    Self {
      model_path: path.as_ref().to_path_buf(),
      intra_threads: None,
    }
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let metadata = std::fs::metadata(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let mut builder = Session::builder().map_err(ort_error)?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads).map_err(ort_error)?;
    }
    let session = builder
      .commit_from_file(&self.model_path)
      .map_err(ort_error)?;

    let num_inputs = session.inputs().len();
    let num_outputs = session.outputs().len();

    if num_inputs != CLASSIFIER_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        CLASSIFIER_NUM_INPUTS, num_inputs
      );
      return Err(OnnxModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        CLASSIFIER_NUM_INPUTS, num_inputs
      )));
    }

    if num_outputs != CLASSIFIER_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        CLASSIFIER_NUM_OUTPUTS, num_outputs
      );
      return Err(OnnxModelError::ModelInvalid(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        CLASSIFIER_NUM_OUTPUTS, num_outputs
      )));
    }

    info!("模型加载完成");
    Ok(OnnxModel { session })
  }
}

impl Model for OnnxModel {
  type Input = NormalizedTensor;
  type Error = OnnxModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<RawOutput, Self::Error> {
    debug!("设置模型输入: {:?}, {} 个元素", input.shape(), input.len());
    let tensor = Tensor::from_array((input.shape(), input.as_nhwc().to_vec().into_boxed_slice()))
      .map_err(ort_error)?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![tensor])
      .map_err(ort_error)?;

    debug!("获取模型输出");
    let (shape, scores) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(ort_error)?;
    let dims: &[i64] = shape;
    debug!("模型输出形状: {:?}, 结果: {:?}", dims, scores);

    Ok(RawOutput::from_f32(scores))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_accepts_onnx_scheme() {
    let url = Url::parse("onnx:///models/PopDetecter.onnx").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/PopDetecter.onnx"));
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("image:///models/PopDetecter.onnx").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = OnnxModelBuilder::from_path(dir.path().join("absent.onnx")).build();
    assert!(matches!(result, Err(OnnxModelError::ModelLoadError(_))));
  }
}
