// 该文件是 Pop Finder 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::Capture,
  interpret::{ClassificationResult, WithLabel},
};

/// 结果接收方
pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod console;
pub use self::console::ConsoleOutput;

#[cfg(feature = "json_output")]
mod json_record;
#[cfg(feature = "json_output")]
pub use self::json_record::{JsonRecordOutput, JsonRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "json_output")]
  #[error("JSON 记录输出错误: {0}")]
  JsonRecordOutputError(#[from] JsonRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  #[cfg(feature = "json_output")]
  JsonRecord(JsonRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput)),
      #[cfg(feature = "json_output")]
      JsonRecordOutput::SCHEME => {
        let output = JsonRecordOutput::from_url(url)?;
        Ok(OutputWrapper::JsonRecord(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<T: WithLabel> Render<Capture, ClassificationResult<T>> for OutputWrapper {
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &Capture,
    result: &ClassificationResult<T>,
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => match output.render_result(frame, result) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      },
      #[cfg(feature = "json_output")]
      OutputWrapper::JsonRecord(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
