// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/link/serial.rs - 基于 serialport 的串口连接
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 串口链路，URL 形如：
//!
//! ```text
//! serial:///dev/ttyACM0?baud=9600&rate_limit_ms=100
//! serial://local?port=COM11&baud=9600
//! ```
//!
//! 打开端口时不拉高 DTR，避免 Arduino 一类的下位机在连接时复位。

use std::{io::Write, time::Duration};

use serialport::SerialPort;
use tracing::{debug, error};
use url::Url;

use super::{Connector, HardwareLink, LinkError, LinkSettings, OpenError, Transport, query_map, query_value};
use crate::{
  FromUrl, FromUrlWithScheme,
  clock::SystemClock,
};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

pub type SerialLink = HardwareLink<SerialConnector, SystemClock>;

pub struct SerialConnector {
  port: String,
  baud_rate: u32,
  timeout: Duration,
}

impl SerialConnector {
  pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
    Self {
      port: port.into(),
      baud_rate,
      timeout: WRITE_TIMEOUT,
    }
  }

  pub fn baud_rate(&self) -> u32 {
    self.baud_rate
  }
}

fn classify(err: serialport::Error) -> OpenError {
  let description = err.to_string();
  let lower = description.to_lowercase();
  let busy = matches!(
    err.kind(),
    serialport::ErrorKind::Io(std::io::ErrorKind::ResourceBusy)
  ) || lower.contains("busy")
    || lower.contains("errno 16");
  if busy {
    OpenError::Busy(description)
  } else {
    OpenError::Failed(description)
  }
}

impl Connector for SerialConnector {
  type Port = Box<dyn SerialPort>;

  fn port_name(&self) -> &str {
    &self.port
  }

  fn open(&self) -> Result<Self::Port, OpenError> {
    let mut port = serialport::new(&self.port, self.baud_rate)
      .timeout(self.timeout)
      .dtr_on_open(false)
      .open()
      .map_err(classify)?;
    // 部分平台忽略 dtr_on_open，打开后再清一次
    if let Err(err) = port.write_data_terminal_ready(false) {
      debug!("清除 {} 的 DTR 失败: {}", self.port, err);
    }
    Ok(port)
  }
}

impl Transport for Box<dyn SerialPort> {
  fn write_message(&mut self, data: &[u8]) -> std::io::Result<()> {
    self.write_all(data)?;
    self.flush()
  }
}

pub struct SerialLinkBuilder {
  connector: SerialConnector,
  settings: LinkSettings,
}

impl FromUrlWithScheme for SerialLinkBuilder {
  const SCHEME: &'static str = "serial";
}

impl FromUrl for SerialLinkBuilder {
  type Error = LinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(LinkError::SchemeMismatch);
    }

    let query = query_map(url);
    let port = match query.get("port") {
      Some(port) => port.clone(),
      None => url.path().to_string(),
    };
    if port.is_empty() {
      return Err(LinkError::InvalidParameter {
        key: "port".to_string(),
        value: url.to_string(),
      });
    }
    let baud_rate = query_value::<u32>(&query, "baud")?.unwrap_or(DEFAULT_BAUD_RATE);
    let settings = LinkSettings::default().with_query(&query)?;

    Ok(SerialLinkBuilder {
      connector: SerialConnector::new(port, baud_rate),
      settings,
    })
  }
}

impl SerialLinkBuilder {
  pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
    Self {
      connector: SerialConnector::new(port, baud_rate),
      settings: LinkSettings::default(),
    }
  }

  pub fn with_settings(mut self, settings: LinkSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn port(&self) -> &str {
    self.connector.port_name()
  }

  pub fn build(self) -> Result<SerialLink, LinkError> {
    tracing::info!(
      "打开串口 {}，波特率 {}",
      self.connector.port_name(),
      self.connector.baud_rate()
    );
    HardwareLink::open(self.connector, self.settings, SystemClock)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_port_from_path() {
    let url = Url::parse("serial:///dev/ttyACM0?baud=115200&rate_limit_ms=20").unwrap();
    let builder = SerialLinkBuilder::from_url(&url).unwrap();
    assert_eq!(builder.port(), "/dev/ttyACM0");
    assert_eq!(builder.connector.baud_rate(), 115200);
    assert_eq!(builder.settings.rate_limit, Duration::from_millis(20));
  }

  #[test]
  fn builder_prefers_port_query() {
    let url = Url::parse("serial://local?port=COM11").unwrap();
    let builder = SerialLinkBuilder::from_url(&url).unwrap();
    assert_eq!(builder.port(), "COM11");
    assert_eq!(builder.connector.baud_rate(), DEFAULT_BAUD_RATE);
  }

  #[test]
  fn busy_errors_are_classified() {
    let err = serialport::Error::new(serialport::ErrorKind::Unknown, "Device or resource busy");
    assert!(matches!(classify(err), OpenError::Busy(_)));
    let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "No such device");
    assert!(matches!(classify(err), OpenError::Failed(_)));
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("mock://local").unwrap();
    assert!(matches!(
      SerialLinkBuilder::from_url(&url),
      Err(LinkError::SchemeMismatch)
    ));
  }
}
