// 该文件是 Pop Finder 项目的一部分。
// src/provider/http.rs - HTTP 模型下载
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

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  provider::{LoadProgress, ModelProvider, ProgressSender, ProviderError, model_file_name},
};

const DEFAULT_CACHE_DIR: &str = "pop-finder";

/// 从 `<base>/<标识>.onnx` 下载模型，首次成功后缓存到本地目录
pub struct HttpModelProvider {
  client: reqwest::Client,
  base_url: Url,
  cache_dir: PathBuf,
}

impl HttpModelProvider {
  pub fn new(base_url: Url, cache_dir: impl AsRef<Path>) -> Self {
    let mut base_url = base_url;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }
    Self {
      client: reqwest::Client::new(),
      base_url,
      cache_dir: cache_dir.as_ref().to_path_buf(),
    }
  }

  fn model_url(&self, file_name: &str) -> Result<Url, ProviderError> {
    self
      .base_url
      .join(file_name)
      .map_err(|_| ProviderError::InvalidIdentifier(file_name.to_string()))
  }
}

impl FromUrl for HttpModelProvider {
  type Error = ProviderError;

  /// 支持 `?cache=/path` 指定缓存目录，默认使用系统临时目录
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(ProviderError::SchemeMismatch(url.scheme().to_string()));
    }

    let cache_dir = url
      .query_pairs()
      .find(|(k, _)| k == "cache")
      .map(|(_, v)| PathBuf::from(v.into_owned()))
      .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR));

    let mut base_url = url.clone();
    base_url.set_query(None);
    Ok(Self::new(base_url, cache_dir))
  }
}

/// 返回已写入的字节数和最后上报的百分比
async fn stream_to_file(
  response: &mut reqwest::Response,
  partial: &Path,
  progress: &ProgressSender,
) -> Result<(u64, Option<u8>), ProviderError> {
  let total = response.content_length().filter(|len| *len > 0);
  let mut file = tokio::fs::File::create(partial).await?;

  let mut downloaded = 0u64;
  let mut last_percent = None;
  progress.report(LoadProgress::Downloading(0));
  while let Some(chunk) = response.chunk().await? {
    file.write_all(&chunk).await?;
    downloaded += chunk.len() as u64;
    if let Some(total) = total {
      let percent = (downloaded.saturating_mul(100) / total).min(100) as u8;
      if last_percent != Some(percent) {
        progress.report(LoadProgress::Downloading(percent));
        last_percent = Some(percent);
      }
    }
  }
  file.flush().await?;
  Ok((downloaded, last_percent))
}

impl ModelProvider for HttpModelProvider {
  async fn fetch(
    &self,
    identifier: &str,
    progress: &ProgressSender,
  ) -> Result<PathBuf, ProviderError> {
    let file_name = model_file_name(identifier)?;
    let cached = self.cache_dir.join(&file_name);
    if tokio::fs::try_exists(&cached).await? {
      debug!("使用缓存模型: {}", cached.display());
      progress.report(LoadProgress::Cached);
      return Ok(cached);
    }

    tokio::fs::create_dir_all(&self.cache_dir).await?;
    let url = self.model_url(&file_name)?;
    info!("下载模型: {}", url);

    let mut response = self.client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(ProviderError::ServerError {
        status: status.as_u16(),
        url: url.to_string(),
      });
    }

    let partial = self.cache_dir.join(format!("{}.part", file_name));
    let streamed = stream_to_file(&mut response, &partial, progress).await;
    let (downloaded, last_percent) = match streamed {
      Ok(done) => done,
      Err(e) => {
        warn!("下载中断，删除未完成的文件: {}", partial.display());
        if let Err(remove) = tokio::fs::remove_file(&partial).await {
          debug!("删除 {} 失败: {}", partial.display(), remove);
        }
        return Err(e);
      }
    };

    tokio::fs::rename(&partial, &cached).await?;
    if last_percent != Some(100) {
      progress.report(LoadProgress::Downloading(100));
    }
    info!(
      "模型下载完成: {} ({:.2} MB)",
      cached.display(),
      downloaded as f64 / (1024.0 * 1024.0)
    );
    Ok(cached)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_dir_comes_from_query() {
    let url = Url::parse("https://models.example.com/pop?cache=/tmp/models").unwrap();
    let provider = HttpModelProvider::from_url(&url).unwrap();
    assert_eq!(provider.cache_dir, PathBuf::from("/tmp/models"));
    assert_eq!(
      provider.model_url("PopDetecter.onnx").unwrap().as_str(),
      "https://models.example.com/pop/PopDetecter.onnx"
    );
  }

  #[tokio::test]
  async fn cached_file_skips_download() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PopDetecter.onnx"), b"cached").unwrap();
    // 不可达地址，若发起请求则会失败
    let base = Url::parse("http://127.0.0.1:9/models").unwrap();
    let provider = HttpModelProvider::new(base, dir.path());
    let (progress, mut events) = crate::provider::progress_channel();
    let path = provider.fetch("PopDetecter", &progress).await.unwrap();
    assert_eq!(path, dir.path().join("PopDetecter.onnx"));
    assert_eq!(events.next().await, Some(LoadProgress::Cached));
  }

  /// 在本地端口上应答一次请求，返回指向该端口的基础地址
  async fn serve_once(status_line: &str, content_length: usize, body: Vec<u8>) -> Url {
    use tokio::io::AsyncReadExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = format!(
      "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
      status_line, content_length
    );
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut request = Vec::new();
      let mut buf = [0u8; 1024];
      while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        request.extend_from_slice(&buf[..n]);
      }
      socket.write_all(head.as_bytes()).await.unwrap();
      socket.write_all(&body).await.unwrap();
      socket.shutdown().await.ok();
    });
    Url::parse(&format!("http://{}/models", addr)).unwrap()
  }

  fn cache_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
      .unwrap()
      .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  async fn collect(mut events: crate::provider::ProgressStream) -> Vec<LoadProgress> {
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
      seen.push(event);
    }
    seen
  }

  #[tokio::test]
  async fn download_reports_progress_and_lands_in_cache() {
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let base = serve_once("200 OK", body.len(), body.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let provider = HttpModelProvider::new(base, dir.path());

    let (progress, events) = crate::provider::progress_channel();
    let path = provider.fetch("PopDetecter", &progress).await.unwrap();
    drop(progress);

    assert_eq!(path, dir.path().join("PopDetecter.onnx"));
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(cache_entries(dir.path()), vec!["PopDetecter.onnx"]);

    let seen = collect(events).await;
    assert_eq!(seen.first(), Some(&LoadProgress::Downloading(0)));
    assert_eq!(seen.last(), Some(&LoadProgress::Downloading(100)));
    let percents: Vec<u8> = seen
      .iter()
      .map(|event| match event {
        LoadProgress::Downloading(p) => *p,
        other => panic!("unexpected event {:?}", other),
      })
      .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
  }

  #[tokio::test]
  async fn missing_model_is_a_server_error() {
    let base = serve_once("404 Not Found", 0, Vec::new()).await;
    let dir = tempfile::tempdir().unwrap();
    let provider = HttpModelProvider::new(base, dir.path());

    let result = provider
      .fetch("PopDetecter", &ProgressSender::silent())
      .await;
    assert!(matches!(
      result,
      Err(ProviderError::ServerError { status: 404, .. })
    ));
    assert!(cache_entries(dir.path()).is_empty());
  }

  #[tokio::test]
  async fn truncated_body_leaves_no_partial_file() {
    let body = vec![7u8; 4096];
    let base = serve_once("200 OK", body.len() * 2, body).await;
    let dir = tempfile::tempdir().unwrap();
    let provider = HttpModelProvider::new(base, dir.path());

    let result = provider
      .fetch("PopDetecter", &ProgressSender::silent())
      .await;
    assert!(matches!(result, Err(ProviderError::HttpError(_))));
    assert!(cache_entries(dir.path()).is_empty());
  }
}
