// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/input/channel.rs - 检测快照通道
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

//! 检测端（单写者）通过有界通道发布快照，控制端轮询最新的一份。
//! 所有发布端都被丢弃后，轮询得到 [`Polled::Closed`]。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use crossbeam_channel::{self as cc, RecvTimeoutError, SendTimeoutError, TrySendError};
use thiserror::Error;

use super::{Polled, SnapshotSource};
use crate::detection::{DetectionSnapshot, FaceBox};

/// 阻塞发布时检查接收端是否已退出的间隔
const CLOSE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SnapshotError {
  #[error("快照通道已关闭")]
  Closed,
}

/// 新建快照通道，`capacity` 至少为 1
pub fn snapshot_channel(capacity: usize) -> (SnapshotPublisher, SnapshotReceiver) {
  let (tx, rx) = cc::bounded(capacity.max(1));
  let closed = Arc::new(AtomicBool::new(false));
  (
    SnapshotPublisher {
      tx,
      evict: rx.clone(),
      closed: closed.clone(),
    },
    SnapshotReceiver { rx, closed },
  )
}

/// 快照发布端
#[derive(Debug)]
pub struct SnapshotPublisher {
  tx: cc::Sender<DetectionSnapshot>,
  // 只用于通道满时丢弃最旧的快照；接收端是否存活看 `closed`
  evict: cc::Receiver<DetectionSnapshot>,
  closed: Arc<AtomicBool>,
}

impl SnapshotPublisher {
  /// 控制端是否已经丢弃接收端
  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// 发布快照；通道满时丢弃最旧的一份，保证最新结果可见
  pub fn publish(&self, snapshot: DetectionSnapshot) -> Result<(), SnapshotError> {
    let mut snapshot = snapshot;
    loop {
      if self.is_closed() {
        return Err(SnapshotError::Closed);
      }
      match self.tx.try_send(snapshot) {
        Ok(()) => return Ok(()),
        Err(TrySendError::Full(returned)) => {
          let _ = self.evict.try_recv();
          snapshot = returned;
        }
        Err(TrySendError::Disconnected(_)) => return Err(SnapshotError::Closed),
      }
    }
  }

  /// 阻塞发布，通道满时等待消费端，不丢帧（回放用）；接收端退出后返回错误
  pub fn publish_blocking(&self, snapshot: DetectionSnapshot) -> Result<(), SnapshotError> {
    let mut snapshot = snapshot;
    loop {
      if self.is_closed() {
        return Err(SnapshotError::Closed);
      }
      match self.tx.send_timeout(snapshot, CLOSE_CHECK_INTERVAL) {
        Ok(()) => return Ok(()),
        Err(SendTimeoutError::Timeout(returned)) => snapshot = returned,
        Err(SendTimeoutError::Disconnected(_)) => return Err(SnapshotError::Closed),
      }
    }
  }

  /// 用当前时间戳打包一帧检测结果并发布
  pub fn publish_faces(
    &self,
    faces: Vec<FaceBox>,
    frame_width: u32,
    frame_height: u32,
    center_crop_fraction: Option<f64>,
  ) -> Result<(), SnapshotError> {
    self.publish(DetectionSnapshot {
      is_running: true,
      timestamp_ms: chrono::Utc::now().timestamp_millis(),
      num_faces: faces.len(),
      faces,
      frame_width,
      frame_height,
      center_crop_fraction,
    })
  }
}

/// 快照接收端，丢弃即通知发布端退出
#[derive(Debug)]
pub struct SnapshotReceiver {
  rx: cc::Receiver<DetectionSnapshot>,
  closed: Arc<AtomicBool>,
}

impl SnapshotReceiver {
  fn latest_after(&self, first: DetectionSnapshot) -> DetectionSnapshot {
    let mut latest = first;
    while let Ok(snapshot) = self.rx.try_recv() {
      latest = snapshot;
    }
    latest
  }
}

impl Drop for SnapshotReceiver {
  fn drop(&mut self) {
    self.closed.store(true, Ordering::Release);
  }
}

impl SnapshotSource for SnapshotReceiver {
  fn poll(&mut self, timeout: Duration) -> Polled {
    match self.rx.recv_timeout(timeout) {
      Ok(first) => Polled::Fresh(self.latest_after(first)),
      Err(RecvTimeoutError::Timeout) => Polled::Idle,
      Err(RecvTimeoutError::Disconnected) => Polled::Closed,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn snapshot(timestamp_ms: i64) -> DetectionSnapshot {
    DetectionSnapshot {
      is_running: true,
      timestamp_ms,
      ..Default::default()
    }
  }

  #[test]
  fn receiver_sees_only_latest() {
    let (tx, mut rx) = snapshot_channel(4);
    for t in 0..3 {
      tx.publish(snapshot(t)).unwrap();
    }
    assert_eq!(rx.poll(Duration::ZERO), Polled::Fresh(snapshot(2)));
    assert_eq!(rx.poll(Duration::ZERO), Polled::Idle);
  }

  #[test]
  fn full_channel_drops_oldest() {
    let (tx, mut rx) = snapshot_channel(1);
    tx.publish(snapshot(1)).unwrap();
    tx.publish(snapshot(2)).unwrap();
    assert_eq!(rx.poll(Duration::ZERO), Polled::Fresh(snapshot(2)));
  }

  #[test]
  fn dropped_publisher_closes_channel() {
    let (tx, mut rx) = snapshot_channel(2);
    tx.publish_faces(vec![FaceBox::new(0.0, 0.0, 1.0, 1.0)], 640, 480, None)
      .unwrap();
    drop(tx);
    match rx.poll(Duration::ZERO) {
      Polled::Fresh(s) => assert_eq!(s.num_faces, 1),
      other => panic!("unexpected poll result: {:?}", other),
    }
    assert_eq!(rx.poll(Duration::from_millis(10)), Polled::Closed);
  }

  #[test]
  fn publish_fails_once_receiver_is_dropped() {
    let (tx, rx) = snapshot_channel(1);
    assert!(!tx.is_closed());
    drop(rx);
    assert!(tx.is_closed());
    assert_eq!(tx.publish(snapshot(1)), Err(SnapshotError::Closed));
    assert_eq!(tx.publish_blocking(snapshot(2)), Err(SnapshotError::Closed));
  }

  #[test]
  fn blocked_publish_wakes_when_receiver_leaves() {
    let (tx, rx) = snapshot_channel(1);
    tx.publish_blocking(snapshot(1)).unwrap();
    let consumer = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(20));
      drop(rx);
    });
    assert_eq!(tx.publish_blocking(snapshot(2)), Err(SnapshotError::Closed));
    consumer.join().unwrap();
  }
}
