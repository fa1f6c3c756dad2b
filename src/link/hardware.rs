// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/link/hardware.rs - 带重连、限流与重试的串行链路
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

//! # 硬件链路状态机
//!
//! ```text
//! Disconnected --reconnect--> Connecting --open ok + settle--> Connected
//!      ^                          |                               |  send ok
//!      |                          +--open failed------------------+--+
//!      +-------------------- write retries exhausted -------------+
//! ```
//!
//! 关闭再打开串口通常会让下位机复位，所以每次（重新）连接之后都要等待
//! 一段固定的稳定时间。写入失败时先在原连接上重试，全部失败后才重新连接，
//! 并且只再写一次。

use std::{
  collections::HashMap,
  io,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{Delivery, Link, LinkError, LinkState, Message, query_value};
use crate::clock::{Clock, SystemClock};

/// 可写入消息的传输层
pub trait Transport {
  fn write_message(&mut self, data: &[u8]) -> io::Result<()>;
}

/// 打开传输层失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
  /// 端口被其它进程占用
  Busy(String),
  /// 其它打开失败（设备未插入等）
  Failed(String),
}

/// 负责（重新）打开传输层
pub trait Connector {
  type Port: Transport;

  fn port_name(&self) -> &str;

  fn open(&self) -> Result<Self::Port, OpenError>;
}

/// 链路的时间参数
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
  /// 两次限流发送之间的最小间隔
  pub rate_limit: Duration,
  /// 一次重连中打开端口的最大尝试次数
  pub reconnect_attempts: u32,
  /// 两次打开尝试之间的等待
  pub reconnect_retry_delay: Duration,
  /// 断开后再次尝试重连前的最短间隔
  pub reconnect_backoff: Duration,
  /// 连接后等待下位机初始化的时间
  pub settle_delay: Duration,
  /// 重连前在原连接上的写入次数
  pub write_retries: u32,
  pub write_retry_delay: Duration,
  /// 重连后最后一次写入前的等待
  pub post_reconnect_delay: Duration,
}

impl Default for LinkSettings {
  fn default() -> Self {
    Self {
      rate_limit: Duration::from_millis(100),
      reconnect_attempts: 5,
      reconnect_retry_delay: Duration::from_secs(2),
      reconnect_backoff: Duration::from_secs(5),
      settle_delay: Duration::from_millis(2500),
      write_retries: 10,
      write_retry_delay: Duration::from_millis(200),
      post_reconnect_delay: Duration::from_millis(300),
    }
  }
}

impl LinkSettings {
  /// 用 URL 查询参数覆盖默认值
  pub fn with_query(mut self, query: &HashMap<String, String>) -> Result<Self, LinkError> {
    if let Some(ms) = query_value::<u64>(query, "rate_limit_ms")? {
      self.rate_limit = Duration::from_millis(ms);
    }
    if let Some(ms) = query_value::<u64>(query, "settle_ms")? {
      self.settle_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = query_value::<u64>(query, "backoff_ms")? {
      self.reconnect_backoff = Duration::from_millis(ms);
    }
    if let Some(n) = query_value::<u32>(query, "write_retries")? {
      self.write_retries = n;
    }
    if let Some(n) = query_value::<u32>(query, "reconnect_attempts")? {
      self.reconnect_attempts = n;
    }
    Ok(self)
  }
}

/// 串行硬件链路
///
/// 链路状态只在本结构内部变更；所有失败都以 [`LinkError`] 返回给调用方。
pub struct HardwareLink<C: Connector, K: Clock = SystemClock> {
  connector: C,
  clock: K,
  settings: LinkSettings,
  port: Option<C::Port>,
  state: LinkState,
  last_send: Option<Instant>,
  last_reconnect_attempt: Option<Instant>,
  write_failures: u32,
  closed: bool,
}

impl<C: Connector, K: Clock> HardwareLink<C, K> {
  /// 打开链路并等待设备就绪
  pub fn open(connector: C, settings: LinkSettings, clock: K) -> Result<Self, LinkError> {
    let mut link = HardwareLink {
      connector,
      clock,
      settings,
      port: None,
      state: LinkState::Disconnected,
      last_send: None,
      last_reconnect_attempt: None,
      write_failures: 0,
      closed: false,
    };
    link.reconnect()?;
    Ok(link)
  }

  pub fn settings(&self) -> &LinkSettings {
    &self.settings
  }

  /// 当前连续写入失败次数
  pub fn write_failures(&self) -> u32 {
    self.write_failures
  }

  pub fn port_name(&self) -> &str {
    self.connector.port_name()
  }

  fn open_error(&self, err: OpenError) -> LinkError {
    let port = self.connector.port_name().to_string();
    match err {
      OpenError::Busy(message) => LinkError::PortBusy { port, message },
      OpenError::Failed(message) => LinkError::OpenFailed { port, message },
    }
  }

  fn reconnect(&mut self) -> Result<(), LinkError> {
    self.state = LinkState::Connecting;
    // 丢弃旧端口即关闭它，这一步可能让下位机复位
    self.port = None;

    let mut last_err = None;
    for attempt in 0..self.settings.reconnect_attempts.max(1) {
      if attempt > 0 {
        self.clock.sleep(self.settings.reconnect_retry_delay);
        info!("等待设备重新出现...");
      }
      match self.connector.open() {
        Ok(port) => {
          self.port = Some(port);
          break;
        }
        Err(err) => {
          debug!(
            "打开串口 {} 失败（第 {} 次）: {:?}",
            self.connector.port_name(),
            attempt + 1,
            err
          );
          last_err = Some(err);
        }
      }
    }

    let now = self.clock.now();
    self.last_reconnect_attempt = Some(now);

    if self.port.is_none() {
      self.state = LinkState::Disconnected;
      let err = last_err.unwrap_or_else(|| OpenError::Failed("没有进行任何打开尝试".to_string()));
      return Err(self.open_error(err));
    }

    self.last_send = Some(now);
    self.write_failures = 0;
    info!(
      "串口 {} 已连接，等待设备完成初始化",
      self.connector.port_name()
    );
    self.clock.sleep(self.settings.settle_delay);
    self.state = LinkState::Connected;
    info!("设备初始化完成（大概）");
    Ok(())
  }

  fn write(&mut self, data: &[u8]) -> io::Result<()> {
    match self.port.as_mut() {
      Some(port) => port.write_message(data),
      None => Err(io::Error::new(io::ErrorKind::NotConnected, "串口未打开")),
    }
  }
}

impl<C: Connector, K: Clock> Link for HardwareLink<C, K> {
  fn send_message(&mut self, message: &Message, rate_limit: bool) -> Result<Delivery, LinkError> {
    if self.closed {
      return Err(LinkError::Closed);
    }

    if self.state != LinkState::Connected {
      if let Some(last) = self.last_reconnect_attempt {
        let elapsed = self.clock.now().saturating_duration_since(last);
        if elapsed < self.settings.reconnect_backoff {
          return Err(LinkError::Backoff {
            retry_in: self.settings.reconnect_backoff - elapsed,
          });
        }
      }
      info!("正在重新连接 {}...", self.connector.port_name());
      self.reconnect()?;
    }

    if rate_limit
      && let Some(last) = self.last_send
      && self.clock.now().saturating_duration_since(last) < self.settings.rate_limit
    {
      debug!("消息 `{}` 被限流丢弃", message);
      return Ok(Delivery::RateLimited);
    }

    let data = message.encode();
    let retries = self.settings.write_retries.max(1);
    for attempt in 0..retries {
      match self.write(&data) {
        Ok(()) => {
          if rate_limit {
            self.last_send = Some(self.clock.now());
          }
          self.write_failures = 0;
          debug!("消息 `{}` 已发送", message);
          return Ok(Delivery::Sent);
        }
        Err(err) => {
          self.write_failures += 1;
          warn!(
            "写入 `{}` 失败（第 {}/{} 次，状态: {}）: {}",
            message,
            attempt + 1,
            retries,
            self.state,
            err
          );
          if attempt + 1 < retries {
            self.clock.sleep(self.settings.write_retry_delay);
          }
        }
      }
    }

    // 重连会关闭端口并复位下位机，只在重试耗尽后进行
    warn!(
      "连续 {} 次写入失败，重新连接 {}",
      self.write_failures,
      self.connector.port_name()
    );
    self.state = LinkState::Disconnected;
    self.reconnect()?;
    self.clock.sleep(self.settings.post_reconnect_delay);

    // 这次是补发，不更新限流时间，下一次正常发送不会被限流
    match self.write(&data) {
      Ok(()) => {
        debug!("消息 `{}` 在重连后发送成功", message);
        Ok(Delivery::Sent)
      }
      Err(source) => {
        self.state = LinkState::Disconnected;
        self.write_failures += 1;
        Err(LinkError::DisconnectedAfterReconnect {
          message: message.to_string(),
          source,
        })
      }
    }
  }

  fn state(&self) -> LinkState {
    self.state
  }

  fn close(&mut self) {
    self.closed = true;
    self.state = LinkState::Disconnected;
    self.port = None;
    info!("串口 {} 已关闭", self.connector.port_name());
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::VecDeque, sync::Arc};

  use parking_lot::Mutex;

  use super::*;
  use crate::clock::ManualClock;

  #[derive(Default)]
  struct ScriptInner {
    opens: u32,
    open_failures: VecDeque<OpenError>,
    failing_writes: u32,
    writes: u32,
    written: Vec<String>,
  }

  #[derive(Clone, Default)]
  struct Script(Arc<Mutex<ScriptInner>>);

  impl Script {
    fn fail_writes(&self, n: u32) {
      self.0.lock().failing_writes = n;
    }

    fn fail_opens(&self, errs: impl IntoIterator<Item = OpenError>) {
      self.0.lock().open_failures.extend(errs);
    }

    fn opens(&self) -> u32 {
      self.0.lock().opens
    }

    fn writes(&self) -> u32 {
      self.0.lock().writes
    }

    fn written(&self) -> Vec<String> {
      self.0.lock().written.clone()
    }
  }

  struct ScriptedConnector(Script);

  struct ScriptedPort(Script);

  impl Transport for ScriptedPort {
    fn write_message(&mut self, data: &[u8]) -> io::Result<()> {
      let mut inner = self.0.0.lock();
      inner.writes += 1;
      if inner.failing_writes > 0 {
        inner.failing_writes -= 1;
        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
      }
      inner.written.push(String::from_utf8_lossy(data).into_owned());
      Ok(())
    }
  }

  impl Connector for ScriptedConnector {
    type Port = ScriptedPort;

    fn port_name(&self) -> &str {
      "/dev/scripted"
    }

    fn open(&self) -> Result<Self::Port, OpenError> {
      let mut inner = self.0.0.lock();
      inner.opens += 1;
      match inner.open_failures.pop_front() {
        Some(err) => Err(err),
        None => Ok(ScriptedPort(self.0.clone())),
      }
    }
  }

  fn open_link(script: &Script, clock: &ManualClock) -> HardwareLink<ScriptedConnector, ManualClock> {
    HardwareLink::open(
      ScriptedConnector(script.clone()),
      LinkSettings::default(),
      clock.clone(),
    )
    .unwrap()
  }

  #[test]
  fn open_waits_for_settle_delay() {
    let script = Script::default();
    let clock = ManualClock::new();
    let link = open_link(&script, &clock);
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(script.opens(), 1);
    assert_eq!(clock.slept(), vec![Duration::from_millis(2500)]);
  }

  #[test]
  fn open_retries_then_reports_busy_port() {
    let script = Script::default();
    script.fail_opens((0..5).map(|_| OpenError::Busy("Device or resource busy".to_string())));
    let clock = ManualClock::new();
    let result = HardwareLink::open(
      ScriptedConnector(script.clone()),
      LinkSettings::default(),
      clock.clone(),
    );
    assert!(matches!(result, Err(LinkError::PortBusy { .. })));
    assert_eq!(script.opens(), 5);
    assert_eq!(clock.total_slept(), Duration::from_secs(8));
  }

  #[test]
  fn open_recovers_when_device_reappears() {
    let script = Script::default();
    script.fail_opens([
      OpenError::Failed("No such file or directory".to_string()),
      OpenError::Failed("No such file or directory".to_string()),
    ]);
    let clock = ManualClock::new();
    let link = open_link(&script, &clock);
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(script.opens(), 3);
  }

  #[test]
  fn unplugged_device_is_not_reported_as_busy() {
    let script = Script::default();
    script.fail_opens((0..5).map(|_| OpenError::Failed("No such device".to_string())));
    let result = HardwareLink::open(
      ScriptedConnector(script.clone()),
      LinkSettings::default(),
      ManualClock::new(),
    );
    assert!(matches!(result, Err(LinkError::OpenFailed { .. })));
  }

  #[test]
  fn rate_limited_send_is_dropped_inside_interval() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);

    assert_eq!(
      link.send_message(&Message::Raw("a".into()), true).unwrap(),
      Delivery::Sent
    );
    clock.advance(Duration::from_millis(99));
    assert_eq!(
      link.send_message(&Message::Raw("b".into()), true).unwrap(),
      Delivery::RateLimited
    );
    assert_eq!(script.written(), vec!["a".to_string()]);
  }

  #[test]
  fn rate_limited_send_passes_at_interval() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);

    link.send_message(&Message::Raw("a".into()), true).unwrap();
    clock.advance(Duration::from_millis(100));
    assert_eq!(
      link.send_message(&Message::Raw("b".into()), true).unwrap(),
      Delivery::Sent
    );
    assert_eq!(script.written(), vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn unlimited_sends_bypass_the_throttle() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);

    link.send_message(&Message::Raw("a".into()), true).unwrap();
    link.send_message(&Message::Pan(3), false).unwrap();
    link.send_message(&Message::Tilt(-4), false).unwrap();
    link.send_heartbeat().unwrap();
    assert_eq!(script.written(), vec!["a", "x 3", "y -4", "3"]);
  }

  #[test]
  fn transient_write_failure_is_retried_in_place() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);
    script.fail_writes(3);

    assert_eq!(
      link.send_message(&Message::Fire, false).unwrap(),
      Delivery::Sent
    );
    assert_eq!(script.opens(), 1);
    assert_eq!(script.writes(), 4);
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(link.write_failures(), 0);
  }

  #[test]
  fn exhausted_retries_reconnect_once_then_fail() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);
    script.fail_writes(11);

    let err = link.send_message(&Message::Pan(10), false).unwrap_err();
    assert!(matches!(
      err,
      LinkError::DisconnectedAfterReconnect { ref message, .. } if message == "x 10"
    ));
    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(script.opens(), 2);
    assert_eq!(script.writes(), 11);
    assert!(script.written().is_empty());
  }

  #[test]
  fn exhausted_retries_recover_after_reconnect() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);
    script.fail_writes(10);

    assert_eq!(
      link.send_message(&Message::Hold, false).unwrap(),
      Delivery::Sent
    );
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(script.opens(), 2);
    assert_eq!(script.written(), vec!["0"]);
  }

  #[test]
  fn disconnected_link_backs_off_without_touching_transport() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);
    script.fail_writes(11);
    let _ = link.send_message(&Message::Fire, false);
    let writes = script.writes();

    clock.advance(Duration::from_secs(1));
    let err = link.send_message(&Message::Fire, false).unwrap_err();
    assert!(matches!(err, LinkError::Backoff { .. }));
    assert_eq!(script.writes(), writes);
    assert_eq!(script.opens(), 2);

    clock.advance(Duration::from_secs(4));
    assert_eq!(
      link.send_message(&Message::Fire, false).unwrap(),
      Delivery::Sent
    );
    assert_eq!(script.opens(), 3);
    assert_eq!(link.state(), LinkState::Connected);
  }

  #[test]
  fn failed_reconnect_during_send_reports_open_error() {
    let script = Script::default();
    let clock = ManualClock::new();
    let mut link = open_link(&script, &clock);
    script.fail_writes(10);
    script.fail_opens((0..5).map(|_| OpenError::Failed("No such device".to_string())));

    let err = link.send_message(&Message::Fire, false).unwrap_err();
    assert!(matches!(err, LinkError::OpenFailed { .. }));
    assert_eq!(link.state(), LinkState::Disconnected);

    let err = link.send_message(&Message::Fire, false).unwrap_err();
    assert!(matches!(err, LinkError::Backoff { .. }));
  }

  #[test]
  fn closed_link_rejects_sends() {
    let script = Script::default();
    let mut link = open_link(&script, &ManualClock::new());
    link.close();
    assert!(matches!(
      link.send_heartbeat(),
      Err(LinkError::Closed)
    ));
    assert_eq!(script.writes(), 0);
  }
}
