// 该文件是 Pop Finder 项目的一部分。
// src/main.rs - 项目主程序
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

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use url::Url;

use pop_finder::{
  FromUrl,
  input::InputWrapper,
  model::{ModelSlot, OnnxModel, OnnxModelBuilder, OnnxModelError},
  output::OutputWrapper,
  provider::{self, DEFAULT_MODEL_ID, LoadProgress, ProviderWrapper},
  task::{ContinuousTask, OneShotTask, RepeatShotTask, Task},
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
  /// 只处理第一张图像
  Oneshot,
  /// 对第一张图像重复推理并统计耗时
  Repeatshot,
  /// 逐张处理全部输入
  Continuous,
}

/// Pop Finder 手办识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件，例如 onnx:///models/PopDetecter.onnx；未指定时通过 --provider 获取
  #[arg(long, value_name = "MODEL", env = "POP_FINDER_MODEL")]
  pub model: Option<Url>,
  /// 模型提供方，file:///dir 或 https://host/base
  #[arg(long, value_name = "PROVIDER", env = "POP_FINDER_PROVIDER")]
  pub provider: Option<Url>,
  /// 模型标识
  #[arg(long, default_value = DEFAULT_MODEL_ID, env = "POP_FINDER_MODEL_ID")]
  pub model_id: String,
  /// 输入来源，image:///a.jpg 或 folder:///dir
  #[arg(long, value_name = "SOURCE", env = "POP_FINDER_INPUT")]
  pub input: Url,
  /// 输出，console: 或 json:///results.jsonl
  #[arg(long, value_name = "OUTPUT", default_value = "console:", env = "POP_FINDER_OUTPUT")]
  pub output: Url,
  #[arg(long, value_enum, default_value = "continuous")]
  mode: Mode,
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  #[arg(long, default_value = "100")]
  pub repeat_times: usize,
  /// ONNX Runtime 线程数
  #[arg(long, env = "POP_FINDER_THREADS")]
  pub threads: Option<usize>,
}

fn build_model(builder: OnnxModelBuilder, threads: Option<usize>) -> Result<OnnxModel, OnnxModelError> {
  match threads {
    Some(threads) => builder.intra_threads(threads).build(),
    None => builder.build(),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let slot: Arc<ModelSlot<OnnxModel>> = Arc::new(ModelSlot::new());

  if let Some(model) = &args.model {
    info!("模型文件路径: {}", model);
    let builder = OnnxModelBuilder::from_url(model)?;
    let threads = args.threads;
    let model = tokio::task::spawn_blocking(move || build_model(builder, threads)).await??;
    slot.install(model)?;
  }

  if slot.handle().is_none() {
    match &args.provider {
      Some(url) => {
        info!("模型提供方: {}", url);
        let provider = ProviderWrapper::from_url(url)?;
        let (progress, mut events) = provider::progress_channel();
        let reporter = tokio::spawn(async move {
          while let Some(event) = events.next().await {
            match event {
              LoadProgress::Downloading(percent) => info!("下载进度: {}%", percent),
              LoadProgress::Cached => info!("使用本地缓存"),
              LoadProgress::Finished => info!("模型加载完成"),
            }
          }
        });
        let threads = args.threads;
        provider::load_model(&*slot, &provider, &args.model_id, &progress, move |path| {
          build_model(OnnxModelBuilder::from_path(path), threads)
        })
        .await?;
        drop(progress);
        reporter.await?;
      }
      None => warn!("未指定模型或模型提供方，推理将返回模型未就绪"),
    }
  }

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let mode = args.mode;
  let frame_number = args.frame_number;
  let repeat_times = args.repeat_times;
  tokio::task::spawn_blocking(move || match mode {
    Mode::Oneshot => OneShotTask.run_task(input, &*slot, output),
    Mode::Repeatshot => RepeatShotTask::default()
      .with_repeat_times(repeat_times)
      .run_task(input, &*slot, output),
    Mode::Continuous => ContinuousTask::default()
      .with_frame_number(frame_number)
      .run_task(input, &*slot, output),
  })
  .await??;

  Ok(())
}
