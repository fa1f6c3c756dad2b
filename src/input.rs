// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/input.rs - 检测快照输入
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

use std::time::Duration;

use thiserror::Error;

use crate::detection::DetectionSnapshot;

mod channel;
pub use self::channel::{SnapshotError, SnapshotPublisher, SnapshotReceiver, snapshot_channel};

mod json_lines;
pub use self::json_lines::{JsonLinesInput, JsonLinesSource, parse_line, pump_lines};

/// 一次轮询的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Polled {
  /// 自上次轮询以来最新的一份快照
  Fresh(DetectionSnapshot),
  /// 超时内没有新快照
  Idle,
  /// 检测端已经退出
  Closed,
}

/// 控制端读取检测结果的入口
pub trait SnapshotSource {
  fn poll(&mut self, timeout: Duration) -> Polled;
}

impl<S: SnapshotSource + ?Sized> SnapshotSource for &mut S {
  fn poll(&mut self, timeout: Duration) -> Polled {
    (**self).poll(timeout)
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON decode error at line {line}: {source}")]
  Json {
    line: usize,
    #[source]
    source: serde_json::Error,
  },
  #[error("无效的输入参数 {key}: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("快照通道错误: {0}")]
  Snapshot(#[from] SnapshotError),
}
