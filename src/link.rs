// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/link.rs - 硬件链路定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "serial_link", feature = "mock_link"))]
use crate::FromUrlWithScheme;

mod hardware;
pub use self::hardware::{Connector, HardwareLink, LinkSettings, OpenError, Transport};

mod heartbeat;
pub use self::heartbeat::{HEARTBEAT_INTERVAL, Heartbeat};

#[cfg(feature = "serial_link")]
mod serial;
#[cfg(feature = "serial_link")]
pub use self::serial::{SerialConnector, SerialLink, SerialLinkBuilder};

#[cfg(feature = "mock_link")]
mod mock;
#[cfg(feature = "mock_link")]
pub use self::mock::MockLink;

/// 发往下位机的消息，纯 ASCII，无换行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
  /// `x <int>`：水平关节角度
  Pan(i32),
  /// `y <int>`：俯仰关节角度
  Tilt(i32),
  /// `1`：开火
  Fire,
  /// `0`：停火
  Hold,
  /// `3`：心跳
  Heartbeat,
  /// 其它原样发送的内容
  Raw(String),
}

impl Message {
  pub fn trigger(fire: bool) -> Self {
    if fire { Message::Fire } else { Message::Hold }
  }

  pub fn encode(&self) -> Vec<u8> {
    self.to_string().into_bytes()
  }
}

impl fmt::Display for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Message::Pan(deg) => write!(f, "x {}", deg),
      Message::Tilt(deg) => write!(f, "y {}", deg),
      Message::Fire => f.write_str("1"),
      Message::Hold => f.write_str("0"),
      Message::Heartbeat => f.write_str("3"),
      Message::Raw(raw) => f.write_str(raw),
    }
  }
}

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
  Disconnected,
  Connecting,
  Connected,
}

impl fmt::Display for LinkState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LinkState::Disconnected => "已断开",
      LinkState::Connecting => "连接中",
      LinkState::Connected => "已连接",
    };
    f.write_str(name)
  }
}

/// 一次发送的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  /// 已写入传输层
  Sent,
  /// 距上次限流发送过近，被静默丢弃
  RateLimited,
}

#[derive(Error, Debug)]
pub enum LinkError {
  #[error("设备已断开，{retry_in:?} 后才会尝试重新连接")]
  Backoff { retry_in: Duration },
  #[error("串口 {port} 被占用，请关闭串口监视器或其它占用该端口的程序: {message}")]
  PortBusy { port: String, message: String },
  #[error("无法打开串口 {port}（设备未连接？）: {message}")]
  OpenFailed { port: String, message: String },
  #[error("设备已断开：重新连接后写入 `{message}` 仍然失败，请稍后重试")]
  DisconnectedAfterReconnect {
    message: String,
    #[source]
    source: std::io::Error,
  },
  #[error("链路已关闭")]
  Closed,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的链路参数 {key}: {value}")]
  InvalidParameter { key: String, value: String },
}

/// 硬件链路：发送消息并报告可恢复的失败
pub trait Link {
  fn send_message(&mut self, message: &Message, rate_limit: bool) -> Result<Delivery, LinkError>;

  /// 心跳不受限流影响
  fn send_heartbeat(&mut self) -> Result<Delivery, LinkError> {
    self.send_message(&Message::Heartbeat, false)
  }

  fn state(&self) -> LinkState;

  fn close(&mut self);
}

impl<L: Link + ?Sized> Link for &mut L {
  fn send_message(&mut self, message: &Message, rate_limit: bool) -> Result<Delivery, LinkError> {
    (**self).send_message(message, rate_limit)
  }

  fn send_heartbeat(&mut self) -> Result<Delivery, LinkError> {
    (**self).send_heartbeat()
  }

  fn state(&self) -> LinkState {
    (**self).state()
  }

  fn close(&mut self) {
    (**self).close()
  }
}

pub(crate) fn query_map(url: &Url) -> HashMap<String, String> {
  url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect()
}

pub(crate) fn query_value<T: FromStr>(
  query: &HashMap<String, String>,
  key: &str,
) -> Result<Option<T>, LinkError> {
  match query.get(key) {
    Some(value) => value
      .parse::<T>()
      .map(Some)
      .map_err(|_| LinkError::InvalidParameter {
        key: key.to_string(),
        value: value.clone(),
      }),
    None => Ok(None),
  }
}

pub enum LinkWrapper {
  #[cfg(feature = "serial_link")]
  Serial(SerialLink),
  #[cfg(feature = "mock_link")]
  Mock(MockLink),
}

impl FromUrl for LinkWrapper {
  type Error = LinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "serial_link")]
      SerialLinkBuilder::SCHEME => {
        let link = SerialLinkBuilder::from_url(url)?.build()?;
        Ok(LinkWrapper::Serial(link))
      }
      #[cfg(feature = "mock_link")]
      <MockLink>::SCHEME => {
        let link = <MockLink>::from_url(url)?;
        Ok(LinkWrapper::Mock(link))
      }
      _ => Err(LinkError::SchemeMismatch),
    }
  }
}

impl Link for LinkWrapper {
  fn send_message(&mut self, message: &Message, rate_limit: bool) -> Result<Delivery, LinkError> {
    match self {
      #[cfg(feature = "serial_link")]
      LinkWrapper::Serial(link) => link.send_message(message, rate_limit),
      #[cfg(feature = "mock_link")]
      LinkWrapper::Mock(link) => link.send_message(message, rate_limit),
    }
  }

  fn state(&self) -> LinkState {
    match self {
      #[cfg(feature = "serial_link")]
      LinkWrapper::Serial(link) => link.state(),
      #[cfg(feature = "mock_link")]
      LinkWrapper::Mock(link) => link.state(),
    }
  }

  fn close(&mut self) {
    match self {
      #[cfg(feature = "serial_link")]
      LinkWrapper::Serial(link) => link.close(),
      #[cfg(feature = "mock_link")]
      LinkWrapper::Mock(link) => link.close(),
    }
  }
}
