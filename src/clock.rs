// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/clock.rs - 时钟与阻塞等待
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
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use parking_lot::Mutex;

/// 时间来源；`sleep` 必须是真正的阻塞等待，不能忙等
pub trait Clock {
  fn now(&self) -> Instant;
  fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }

  fn sleep(&self, duration: Duration) {
    thread::sleep(duration);
  }
}

/// 手动推进的时钟，`sleep` 立即返回并把时间向前拨。
///
/// 克隆共享同一时间线，可以在外部推进后观察链路的退避与限流。
#[derive(Debug, Clone)]
pub struct ManualClock {
  inner: Arc<Mutex<ManualClockInner>>,
}

#[derive(Debug)]
struct ManualClockInner {
  now: Instant,
  slept: Vec<Duration>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(ManualClockInner {
        now: Instant::now(),
        slept: Vec::new(),
      })),
    }
  }

  pub fn advance(&self, duration: Duration) {
    self.inner.lock().now += duration;
  }

  /// 迄今所有 `sleep` 调用的时长
  pub fn slept(&self) -> Vec<Duration> {
    self.inner.lock().slept.clone()
  }

  pub fn total_slept(&self) -> Duration {
    self.inner.lock().slept.iter().sum()
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.inner.lock().now
  }

  fn sleep(&self, duration: Duration) {
    let mut inner = self.inner.lock();
    inner.now += duration;
    inner.slept.push(duration);
  }
}

impl<C: Clock + ?Sized> Clock for &C {
  fn now(&self) -> Instant {
    (**self).now()
  }

  fn sleep(&self, duration: Duration) {
    (**self).sleep(duration)
  }
}
