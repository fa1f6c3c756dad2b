// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/link/heartbeat.rs - 心跳定时
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

use std::time::{Duration, Instant};

use super::{Delivery, Link, LinkError};

/// 心跳间隔，须短于下位机看门狗超时
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct Heartbeat {
  interval: Duration,
  last: Option<Instant>,
}

impl Default for Heartbeat {
  fn default() -> Self {
    Self::new(HEARTBEAT_INTERVAL)
  }
}

impl Heartbeat {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      last: None,
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn is_due(&self, now: Instant) -> bool {
    self
      .last
      .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
  }

  /// 到期时发送心跳；未到期返回 `None`。
  ///
  /// 发送失败也算一次心跳，避免断线时每轮都去撞退避。
  pub fn tick<L: Link + ?Sized>(
    &mut self,
    now: Instant,
    link: &mut L,
  ) -> Option<Result<Delivery, LinkError>> {
    if !self.is_due(now) {
      return None;
    }
    self.last = Some(now);
    Some(link.send_heartbeat())
  }
}
