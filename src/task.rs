// 该文件是 Pop Finder 项目的一部分。
// src/task.rs - 分类任务
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

use std::{
  error::Error as StdError,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
  classify::{PipelineError, classify_bitmap},
  input::Capture,
  interpret::{ClassificationResult, FigurineLabel},
  model::{Model, ModelSlot},
  output::Render,
  tensor::NormalizedTensor,
};

pub type FigurineResult = ClassificationResult<FigurineLabel>;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: &ModelSlot<M>, output: O) -> Result<(), Self::Error>;
}

fn run_once<M>(frame: &Capture, model: &ModelSlot<M>) -> Result<FigurineResult, PipelineError>
where
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
{
  let now = Instant::now();
  let result = classify_bitmap(&frame.bitmap, model)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());
  Ok(result)
}

pub struct OneShotTask;

impl<I, M, O, RE> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Capture>,
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
  O: Render<Capture, FigurineResult, Error = RE>,
  RE: StdError + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &ModelSlot<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功: {}，开始推理...", frame.source);
    let result = run_once(&frame, model)?;
    output.render_result(&frame, &result)?;
    info!("任务完成");

    Ok(())
  }
}

/// 对同一张图像重复推理，统计耗时并检查结果是否一致
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 100 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times.max(1);
    self
  }
}

impl<I, M, O, RE> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = Capture>,
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
  O: Render<Capture, FigurineResult, Error = RE>,
  RE: StdError + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &ModelSlot<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功: {}，开始推理...", frame.source);

    let mut times = Vec::with_capacity(self.repeat_times);
    let mut first: Option<FigurineResult> = None;
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let result: FigurineResult = classify_bitmap(&frame.bitmap, model)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);

      match &first {
        None => {
          output.render_result(&frame, &result)?;
          first = Some(result);
        }
        Some(expected) if *expected != result => {
          anyhow::bail!("第 {} 次推理结果不一致: {} / {}", i, expected, result);
        }
        Some(_) => {}
      }
    }

    // 前两次视为预热
    let measured: Vec<Duration> = if times.len() > 2 {
      times[2..].to_vec()
    } else {
      times
    };
    warn!(
      "平均推理时间: {:.2?}",
      measured.iter().sum::<Duration>() / measured.len() as u32
    );

    Ok(())
  }
}

/// 逐张处理全部输入，直到输入耗尽、达到帧数上限或收到中断信号
///
/// 解码失败只跳过当前图像；推理连续失败达到上限时视为模型持续故障并退出。
pub struct ContinuousTask {
  frame_number: Option<usize>,
  max_consecutive_failures: usize,
  stop: Arc<AtomicBool>,
  install_ctrlc: bool,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      max_consecutive_failures: 3,
      stop: Arc::new(AtomicBool::new(false)),
      install_ctrlc: true,
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_max_consecutive_failures(mut self, limit: usize) -> Self {
    self.max_consecutive_failures = limit.max(1);
    self
  }

  /// 使用外部停止标志代替 Ctrl-C 处理
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self.install_ctrlc = false;
    self
  }
}

impl<I, M, O, RE> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = Capture>,
  M: Model<Input = NormalizedTensor>,
  M::Error: StdError + Send + Sync + 'static,
  O: Render<Capture, FigurineResult, Error = RE>,
  RE: StdError + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: &ModelSlot<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");

    if self.install_ctrlc {
      let stop = Arc::clone(&self.stop);
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        stop.store(true, Ordering::SeqCst);
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;
    }

    let mut processed = 0usize;
    let mut consecutive_failures = 0usize;
    for frame in input {
      if self.stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      info!("处理第 {} 张图像: {}", frame.index, frame.source);
      match run_once(&frame, model) {
        Ok(result) => {
          consecutive_failures = 0;
          output.render_result(&frame, &result)?;
        }
        Err(PipelineError::Decode(e)) => {
          warn!("图像 {} 无法解码，跳过: {}", frame.source, e);
        }
        Err(PipelineError::ModelNotReady) => {
          return Err(PipelineError::ModelNotReady.into());
        }
        Err(PipelineError::Inference(e)) => {
          consecutive_failures += 1;
          error!(
            "图像 {} 推理失败 ({}/{}): {}",
            frame.source, consecutive_failures, self.max_consecutive_failures, e
          );
          if consecutive_failures >= self.max_consecutive_failures {
            anyhow::bail!(
              "连续 {} 次推理失败，模型可能已损坏或不兼容",
              consecutive_failures
            );
          }
        }
      }

      processed += 1;
      if self.frame_number.map(|n| processed >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", processed);
        break;
      }
    }

    info!("任务完成，共处理 {} 张图像", processed);
    Ok(())
  }
}
