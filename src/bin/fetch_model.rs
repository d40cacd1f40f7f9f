// 该文件是 Pop Finder 项目的一部分。
// src/bin/fetch_model.rs - 预先下载模型
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use pop_finder::{
  FromUrl,
  provider::{DEFAULT_MODEL_ID, LoadProgress, ModelProvider, ProviderWrapper, progress_channel},
};

/// 获取模型文件并放入本地缓存
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型提供方，file:///dir 或 https://host/base?cache=/var/cache/pop-finder
  #[arg(long, value_name = "PROVIDER", env = "POP_FINDER_PROVIDER")]
  pub provider: Url,
  /// 模型标识
  #[arg(long, default_value = DEFAULT_MODEL_ID, env = "POP_FINDER_MODEL_ID")]
  pub model_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("模型提供方: {}", args.provider);
  info!("模型标识: {}", args.model_id);

  let provider = ProviderWrapper::from_url(&args.provider)?;
  let (progress, mut events) = progress_channel();
  let reporter = tokio::spawn(async move {
    let mut last = None;
    while let Some(event) = events.next().await {
      match event {
        // 同一百分比只记录一次
        LoadProgress::Downloading(percent) if last != Some(percent) => {
          last = Some(percent);
          info!("下载进度: {}%", percent);
        }
        LoadProgress::Downloading(_) => {}
        LoadProgress::Cached => info!("本地缓存已存在"),
        LoadProgress::Finished => info!("完成"),
      }
    }
  });

  let path = provider.fetch(&args.model_id, &progress).await?;
  drop(progress);
  reporter.await?;

  info!("模型文件: {}", path.display());
  println!("{}", path.display());
  Ok(())
}
