// 该文件是 Pop Finder 项目的一部分。
// src/provider/local.rs - 本地目录模型提供方
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

use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  provider::{LoadProgress, ModelProvider, ProgressSender, ProviderError, model_file_name},
  url_path,
};

/// 从目录中按 `<标识>.onnx` 查找模型
pub struct LocalModelProvider {
  directory: PathBuf,
}

impl LocalModelProvider {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }
}

impl FromUrlWithScheme for LocalModelProvider {
  const SCHEME: &'static str = "file";
}

impl FromUrl for LocalModelProvider {
  type Error = ProviderError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ProviderError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(Self::new(url_path(url)))
  }
}

impl ModelProvider for LocalModelProvider {
  async fn fetch(
    &self,
    identifier: &str,
    progress: &ProgressSender,
  ) -> Result<PathBuf, ProviderError> {
    let path = self.directory.join(model_file_name(identifier)?);
    debug!("查找本地模型: {}", path.display());

    match tokio::fs::metadata(&path).await {
      Ok(metadata) if metadata.is_file() => {
        progress.report(LoadProgress::Cached);
        Ok(path)
      }
      Ok(_) => Err(ProviderError::NotFound(path.display().to_string())),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        Err(ProviderError::NotFound(path.display().to_string()))
      }
      Err(err) => Err(ProviderError::IoError(err)),
    }
  }
}
