// 该文件是 Pop Finder 项目的一部分。
// src/provider.rs - 模型获取与加载
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

use std::{error::Error as StdError, future::Future, path::PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::ModelSlot};

mod local;
pub use self::local::LocalModelProvider;

#[cfg(feature = "http_provider")]
mod http;
#[cfg(feature = "http_provider")]
pub use self::http::HttpModelProvider;

pub const DEFAULT_MODEL_ID: &str = "PopDetecter";
pub const MODEL_FILE_EXTENSION: &str = "onnx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
  /// 下载进度，0 到 100
  Downloading(u8),
  /// 命中本地缓存
  Cached,
  Finished,
}

/// 进度发送端；接收端被丢弃后静默停止上报，不影响下载本身
#[derive(Clone, Default)]
pub struct ProgressSender {
  tx: Option<mpsc::UnboundedSender<LoadProgress>>,
}

impl ProgressSender {
  /// 不上报进度
  pub fn silent() -> Self {
    Self::default()
  }

  pub fn report(&self, progress: LoadProgress) {
    if let Some(tx) = &self.tx {
      let _ = tx.send(progress);
    }
  }
}

pub struct ProgressStream {
  rx: mpsc::UnboundedReceiver<LoadProgress>,
}

impl ProgressStream {
  pub async fn next(&mut self) -> Option<LoadProgress> {
    self.rx.recv().await
  }
}

pub fn progress_channel() -> (ProgressSender, ProgressStream) {
  let (tx, rx) = mpsc::unbounded_channel();
  (ProgressSender { tx: Some(tx) }, ProgressStream { rx })
}

#[derive(Error, Debug)]
pub enum ProviderError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("模型标识无效: '{0}'")]
  InvalidIdentifier(String),
  #[error("找不到模型: {0}")]
  NotFound(String),
  #[cfg(feature = "http_provider")]
  #[error("HTTP 请求失败: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("服务器返回 {status}: {url}")]
  ServerError { status: u16, url: String },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 根据模型标识取得本地模型文件路径，必要时下载并缓存
pub trait ModelProvider {
  fn fetch(
    &self,
    identifier: &str,
    progress: &ProgressSender,
  ) -> impl Future<Output = Result<PathBuf, ProviderError>> + Send;
}

/// 标识只允许作为单个文件名使用
pub(crate) fn model_file_name(identifier: &str) -> Result<String, ProviderError> {
  let valid = !identifier.is_empty()
    && identifier != "."
    && identifier != ".."
    && !identifier.contains(['/', '\\']);
  if !valid {
    return Err(ProviderError::InvalidIdentifier(identifier.to_string()));
  }
  Ok(format!("{}.{}", identifier, MODEL_FILE_EXTENSION))
}

pub enum ProviderWrapper {
  Local(LocalModelProvider),
  #[cfg(feature = "http_provider")]
  Http(HttpModelProvider),
}

impl FromUrl for ProviderWrapper {
  type Error = ProviderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == LocalModelProvider::SCHEME {
      return Ok(ProviderWrapper::Local(LocalModelProvider::from_url(url)?));
    }
    #[cfg(feature = "http_provider")]
    {
      if url.scheme() == "http" || url.scheme() == "https" {
        return Ok(ProviderWrapper::Http(HttpModelProvider::from_url(url)?));
      }
    }
    Err(ProviderError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl ModelProvider for ProviderWrapper {
  async fn fetch(
    &self,
    identifier: &str,
    progress: &ProgressSender,
  ) -> Result<PathBuf, ProviderError> {
    match self {
      ProviderWrapper::Local(provider) => provider.fetch(identifier, progress).await,
      #[cfg(feature = "http_provider")]
      ProviderWrapper::Http(provider) => provider.fetch(identifier, progress).await,
    }
  }
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("获取模型失败: {0}")]
  Provider(#[from] ProviderError),
  #[error("初始化模型失败: {0}")]
  Build(#[source] Box<dyn StdError + Send + Sync>),
  #[error("加载任务异常退出: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// 获取模型文件并在阻塞线程中构建模型，成功后装入模型槽
///
/// 槽已就绪时直接返回，不会重复获取。
pub async fn load_model<P, M, F, E>(
  slot: &ModelSlot<M>,
  provider: &P,
  identifier: &str,
  progress: &ProgressSender,
  build: F,
) -> Result<(), LoadError>
where
  P: ModelProvider,
  M: crate::model::Model + Send + 'static,
  F: FnOnce(PathBuf) -> Result<M, E> + Send + 'static,
  E: StdError + Send + Sync + 'static,
{
  if slot.handle().is_some() {
    info!("模型已就绪，跳过加载");
    return Ok(());
  }

  info!("获取模型: {}", identifier);
  let path = provider.fetch(identifier, progress).await?;
  info!("模型文件位于: {}", path.display());

  let model = tokio::task::spawn_blocking(move || build(path))
    .await?
    .map_err(|e| LoadError::Build(Box::new(e)))?;

  if slot.install(model).is_err() {
    warn!("模型槽已被其他加载任务填充，丢弃本次加载结果");
  }
  progress.report(LoadProgress::Finished);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Model, ModelState, RawOutput};

  struct FileSizeModel {
    size: usize,
  }

  impl Model for FileSizeModel {
    type Input = ();
    type Error = std::io::Error;

    fn infer(&mut self, _input: &()) -> Result<RawOutput, Self::Error> {
      Ok(RawOutput::from_f32(&[self.size as f32]))
    }
  }

  fn build_from(path: PathBuf) -> Result<FileSizeModel, std::io::Error> {
    let size = std::fs::read(path)?.len();
    Ok(FileSizeModel { size })
  }

  #[test]
  fn identifiers_must_be_plain_names() {
    assert_eq!(model_file_name("PopDetecter").unwrap(), "PopDetecter.onnx");
    for bad in ["", ".", "..", "a/b", "..\\x"] {
      assert!(matches!(
        model_file_name(bad),
        Err(ProviderError::InvalidIdentifier(_))
      ));
    }
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("ftp://example.com/models").unwrap();
    assert!(matches!(
      ProviderWrapper::from_url(&url),
      Err(ProviderError::SchemeMismatch(_))
    ));
  }

  #[tokio::test]
  async fn load_fills_the_slot_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PopDetecter.onnx"), b"weights").unwrap();
    let provider = LocalModelProvider::new(dir.path());

    let slot = ModelSlot::new();
    let (progress, mut events) = progress_channel();
    load_model(&slot, &provider, DEFAULT_MODEL_ID, &progress, build_from)
      .await
      .unwrap();
    assert_eq!(slot.state(), ModelState::Ready);
    let output = slot.handle().unwrap().infer(&()).unwrap();
    assert_eq!(output, RawOutput::from_f32(&[7.0]));

    drop(progress);
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
      seen.push(event);
    }
    assert_eq!(seen.last(), Some(&LoadProgress::Finished));

    // 再次加载时不再访问提供方
    std::fs::remove_file(dir.path().join("PopDetecter.onnx")).unwrap();
    load_model(
      &slot,
      &provider,
      DEFAULT_MODEL_ID,
      &ProgressSender::silent(),
      build_from,
    )
    .await
    .unwrap();
  }

  #[tokio::test]
  async fn failed_fetch_leaves_slot_unloaded() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalModelProvider::new(dir.path());
    let slot: ModelSlot<FileSizeModel> = ModelSlot::new();
    let result = load_model(
      &slot,
      &provider,
      DEFAULT_MODEL_ID,
      &ProgressSender::silent(),
      build_from,
    )
    .await;
    assert!(matches!(
      result,
      Err(LoadError::Provider(ProviderError::NotFound(_)))
    ));
    assert_eq!(slot.state(), ModelState::Unloaded);
  }

  #[tokio::test]
  async fn dropped_progress_stream_does_not_fail_loading() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PopDetecter.onnx"), b"abc").unwrap();
    let provider = LocalModelProvider::new(dir.path());
    let slot = ModelSlot::new();
    let (progress, events) = progress_channel();
    drop(events);
    load_model(&slot, &provider, DEFAULT_MODEL_ID, &progress, build_from)
      .await
      .unwrap();
    assert_eq!(slot.state(), ModelState::Ready);
  }
}
