// 该文件是 Pop Finder 项目的一部分。
// src/output/console.rs - 终端输出
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

use std::convert::Infallible;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::Capture,
  interpret::{ClassificationResult, WithLabel},
  output::Render,
};

/// 将结果逐行打印到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(ConsoleOutput)
  }
}

impl ConsoleOutput {
  pub fn format_line<T: WithLabel>(frame: &Capture, result: &ClassificationResult<T>) -> String {
    format!("[{}] {}: {}", frame.index, frame.source, result)
  }
}

impl<T: WithLabel> Render<Capture, ClassificationResult<T>> for ConsoleOutput {
  type Error = Infallible;

  fn render_result(
    &self,
    frame: &Capture,
    result: &ClassificationResult<T>,
  ) -> Result<(), Self::Error> {
    println!("{}", Self::format_line(frame, result));
    Ok(())
  }
}
