// 该文件是 Pop Finder 项目的一部分。
// src/output/json_record.rs - JSON Lines 结果记录
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
  fs::{File, OpenOptions},
  io::Write,
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::Capture,
  interpret::{ClassificationResult, WithLabel},
  output::Render,
  url_path,
};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("记录文件锁已损坏")]
  Poisoned,
}

#[derive(Serialize)]
struct Record<'a> {
  time: String,
  source: &'a str,
  index: u64,
  matched: bool,
  label: Option<&'a str>,
  label_id: Option<usize>,
  confidence_percent: Option<u32>,
  message: String,
}

/// 每个结果追加一行 JSON
pub struct JsonRecordOutput {
  path: PathBuf,
  file: Mutex<File>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordOutputError::SchemeMismatch);
    }

    Self::open(url_path(uri))
  }
}

impl JsonRecordOutput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, JsonRecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    debug!("结果记录文件: {}", path.display());
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl<T: WithLabel> Render<Capture, ClassificationResult<T>> for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn render_result(
    &self,
    frame: &Capture,
    result: &ClassificationResult<T>,
  ) -> Result<(), Self::Error> {
    let label_id = match result {
      ClassificationResult::Matched { label, .. } => Some(label.to_label_id()),
      ClassificationResult::NoMatch => None,
    };
    let record = Record {
      time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      source: &frame.source,
      index: frame.index,
      matched: result.is_match(),
      label: result.label_str(),
      label_id,
      confidence_percent: result.confidence_percent(),
      message: result.to_string(),
    };

    let mut line = serde_json::to_string(&record)?;
    line.push('\n');

    let mut file = self
      .file
      .lock()
      .map_err(|_| JsonRecordOutputError::Poisoned)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
  }
}
