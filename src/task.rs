// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/task.rs - 逐帧驱动循环
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

use std::{thread, time::Duration};

use crossbeam_channel as cc;
use tracing::{debug, info, warn};

use crate::{
  clock::{Clock, SystemClock},
  controller::{Controller, ControllerState, StepReport},
  input::{Polled, SnapshotSource},
  link::{HEARTBEAT_INTERVAL, Heartbeat, Link, LinkError},
};

pub trait Task<S, L: Link>: Sized {
  type Error;
  fn run_task(self, source: S, controller: Controller<L>) -> Result<TaskSummary, Self::Error>;
}

/// 一次会话的统计
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaskSummary {
  /// 实际处理的快照数
  pub frames: usize,
  /// 停止运行或时间戳重复而跳过的快照数
  pub skipped: usize,
  pub aimed: usize,
  pub fired: usize,
  pub link_failures: usize,
  pub heartbeat_failures: usize,
  pub final_state: ControllerState,
}

/// 轮询最新快照、驱动控制器并维持心跳，直到输入关闭、达到帧数或收到中断
#[derive(Debug)]
pub struct ContinuousTask<K: Clock = SystemClock> {
  clock: K,
  frame_number: Option<usize>,
  heartbeat: Heartbeat,
  poll_interval: Duration,
  shutdown: Option<cc::Receiver<()>>,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self::new(SystemClock)
  }
}

impl<K: Clock> ContinuousTask<K> {
  pub fn new(clock: K) -> Self {
    Self {
      clock,
      frame_number: None,
      heartbeat: Heartbeat::new(HEARTBEAT_INTERVAL),
      poll_interval: Duration::from_millis(50),
      shutdown: None,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
    self.heartbeat = Heartbeat::new(interval);
    self
  }

  /// 轮询超时，须短于心跳间隔
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn with_shutdown(mut self, shutdown: cc::Receiver<()>) -> Self {
    self.shutdown = Some(shutdown);
    self
  }

  /// 安装 Ctrl-C 处理：第一次在帧间退出，30 秒内未退出则强制结束进程
  pub fn with_ctrlc_handler(self) -> Result<Self, ctrlc::Error> {
    let (tx, rx) = cc::bounded(1);
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.try_send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(self.with_shutdown(rx))
  }

  fn shutdown_requested(&self) -> bool {
    self
      .shutdown
      .as_ref()
      .is_some_and(|rx| rx.try_recv().is_ok())
  }
}

impl<K: Clock, S: SnapshotSource, L: Link> Task<S, L> for ContinuousTask<K> {
  type Error = anyhow::Error;

  fn run_task(
    mut self,
    mut source: S,
    mut controller: Controller<L>,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let mut summary = TaskSummary::default();
    let mut last_timestamp = None;

    loop {
      if self.shutdown_requested() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }

      if let Some(Err(err)) = self.heartbeat.tick(self.clock.now(), controller.link_mut()) {
        summary.heartbeat_failures += 1;
        warn!("心跳发送失败（链路状态: {}）: {}", controller.link().state(), err);
      }

      let snapshot = match source.poll(self.poll_interval) {
        Polled::Fresh(snapshot) => snapshot,
        Polled::Idle => continue,
        Polled::Closed => {
          info!("检测端已退出，结束任务");
          break;
        }
      };

      if !snapshot.is_running || last_timestamp == Some(snapshot.timestamp_ms) {
        debug!(
          "跳过快照 ts={} is_running={}",
          snapshot.timestamp_ms, snapshot.is_running
        );
        summary.skipped += 1;
        continue;
      }
      last_timestamp = Some(snapshot.timestamp_ms);
      summary.frames += 1;

      match controller.step_snapshot(&snapshot) {
        Ok(StepReport::Aimed(aim)) => {
          summary.aimed += 1;
          if aim.command.fire {
            summary.fired += 1;
          }
        }
        Ok(StepReport::Idle) => {}
        Err(err) => {
          if matches!(err.link_error(), LinkError::Closed) {
            return Err(err.into());
          }
          summary.link_failures += 1;
          warn!("第 {} 帧: {}", summary.frames, err);
        }
      }
    }

    summary.final_state = controller.close();
    info!("任务完成，退出: {:?}", summary);
    Ok(summary)
  }
}
