// 该文件是 Pop Finder 项目的一部分。
// src/interpret.rs - 分类结果解读
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

use std::fmt;

use thiserror::Error;
use tracing::debug;

/// 置信度百分比达到该值即视为匹配
pub const MATCH_THRESHOLD_PERCENT: f32 = 50.0;

pub trait WithLabel: Sized + Copy + fmt::Debug {
  fn to_label_str(&self) -> &'static str;
  fn to_label_id(&self) -> usize;
  fn from_label_id(id: usize) -> Option<Self>;
}

/// 已知手办类别，顺序必须与模型训练时的标签顺序一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FigurineLabel {
  Serenity,
  Philosophy,
  Trust,
  Timelapse,
}

const FIGURINE_LABELS: [(FigurineLabel, &str); 4] = [
  (FigurineLabel::Serenity, "The Serenity"),
  (FigurineLabel::Philosophy, "The Philosophy"),
  (FigurineLabel::Trust, "The Trust"),
  (FigurineLabel::Timelapse, "The Timelapse"),
];

impl WithLabel for FigurineLabel {
  fn to_label_str(&self) -> &'static str {
    FIGURINE_LABELS[self.to_label_id()].1
  }

  fn to_label_id(&self) -> usize {
    match self {
      FigurineLabel::Serenity => 0,
      FigurineLabel::Philosophy => 1,
      FigurineLabel::Trust => 2,
      FigurineLabel::Timelapse => 3,
    }
  }

  fn from_label_id(id: usize) -> Option<Self> {
    FIGURINE_LABELS.get(id).map(|(label, _)| *label)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RawScoresError {
  #[error("输出字节数 {0} 不是 f32 大小的整数倍")]
  Misaligned(usize),
  #[error("模型输出为空")]
  Empty,
}

/// 每个类别一个原始得分，按类别编号排列，不保证和为 1
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceVector {
  scores: Box<[f32]>,
}

impl ConfidenceVector {
  /// 空向量返回 `None`
  pub fn new(scores: Vec<f32>) -> Option<Self> {
    if scores.is_empty() {
      return None;
    }
    Some(Self {
      scores: scores.into_boxed_slice(),
    })
  }

  /// 将模型输出的原始字节按本机字节序解释为 f32 序列
  pub fn from_ne_bytes(bytes: &[u8]) -> Result<Self, RawScoresError> {
    const F32_SIZE: usize = std::mem::size_of::<f32>();
    if bytes.len() % F32_SIZE != 0 {
      return Err(RawScoresError::Misaligned(bytes.len()));
    }

    let scores = bytes
      .chunks_exact(F32_SIZE)
      .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect();
    Self::new(scores).ok_or(RawScoresError::Empty)
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  /// 最大得分及其下标，相同最大值取第一个
  pub fn argmax(&self) -> (usize, f32) {
    let mut max_index = 0usize;
    let mut max_value = self.scores[0];
    for (index, &value) in self.scores.iter().enumerate().skip(1) {
      if value > max_value {
        max_value = value;
        max_index = index;
      }
    }
    (max_index, max_value)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationResult<T> {
  Matched { label: T, confidence_percent: u32 },
  NoMatch,
}

impl<T: WithLabel> ClassificationResult<T> {
  pub fn is_match(&self) -> bool {
    matches!(self, ClassificationResult::Matched { .. })
  }

  pub fn label_str(&self) -> Option<&'static str> {
    match self {
      ClassificationResult::Matched { label, .. } => Some(label.to_label_str()),
      ClassificationResult::NoMatch => None,
    }
  }

  pub fn confidence_percent(&self) -> Option<u32> {
    match self {
      ClassificationResult::Matched {
        confidence_percent, ..
      } => Some(*confidence_percent),
      ClassificationResult::NoMatch => None,
    }
  }
}

impl<T: WithLabel> fmt::Display for ClassificationResult<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ClassificationResult::Matched {
        label,
        confidence_percent,
      } => write!(
        f,
        "Detected: {} ({}%)",
        label.to_label_str(),
        confidence_percent
      ),
      ClassificationResult::NoMatch => write!(f, "No clear match found."),
    }
  }
}

// 四舍五入（0.5 进位），上限 100
fn round_percent(percent: f32) -> u32 {
  ((percent + 0.5).floor() as u32).min(100)
}

/// 取最高分类别，得分直接乘 100 作为百分比，不做 softmax
pub fn interpret<T: WithLabel>(confidences: &ConfidenceVector) -> ClassificationResult<T> {
  let (index, score) = confidences.argmax();
  let percent = score * 100.0;
  debug!("最高得分类别: {}, 置信度: {:.2}%", index, percent);

  if percent < MATCH_THRESHOLD_PERCENT || percent.is_nan() {
    return ClassificationResult::NoMatch;
  }

  match T::from_label_id(index) {
    Some(label) => ClassificationResult::Matched {
      label,
      confidence_percent: round_percent(percent),
    },
    None => {
      debug!("类别 {} 没有对应的标签", index);
      ClassificationResult::NoMatch
    }
  }
}
