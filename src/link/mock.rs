// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/link/mock.rs - 无硬件的模拟链路
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::{Duration, Instant};

use tracing::info;
use url::Url;

use super::{Delivery, Link, LinkError, LinkSettings, LinkState, Message, query_map};
use crate::{
  FromUrl, FromUrlWithScheme,
  clock::{Clock, SystemClock},
};

/// 与真实链路同接口的模拟链路，只记录发送与限流
pub struct MockLink<K: Clock = SystemClock> {
  clock: K,
  rate_limit: Duration,
  last_send: Instant,
  sent: Vec<Message>,
  closed: bool,
}

impl<K: Clock> MockLink<K> {
  pub fn new(rate_limit: Duration, clock: K) -> Self {
    let last_send = clock.now();
    Self {
      clock,
      rate_limit,
      last_send,
      sent: Vec::new(),
      closed: false,
    }
  }

  /// 已“发送”的消息
  pub fn sent(&self) -> &[Message] {
    &self.sent
  }

  pub fn is_closed(&self) -> bool {
    self.closed
  }
}

impl FromUrlWithScheme for MockLink {
  const SCHEME: &'static str = "mock";
}

impl FromUrl for MockLink {
  type Error = LinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LinkError::SchemeMismatch);
    }
    let settings = LinkSettings::default().with_query(&query_map(url))?;
    Ok(MockLink::new(settings.rate_limit, SystemClock))
  }
}

impl<K: Clock> Link for MockLink<K> {
  fn send_message(&mut self, message: &Message, rate_limit: bool) -> Result<Delivery, LinkError> {
    if self.closed {
      return Err(LinkError::Closed);
    }
    let now = self.clock.now();
    if rate_limit && now.saturating_duration_since(self.last_send) < self.rate_limit {
      info!("[mock hardware] 限流");
      return Ok(Delivery::RateLimited);
    }
    info!("[mock hardware] 发送: {:?}", message.to_string());
    if rate_limit {
      self.last_send = now;
    }
    self.sent.push(message.clone());
    Ok(Delivery::Sent)
  }

  fn state(&self) -> LinkState {
    if self.closed {
      LinkState::Disconnected
    } else {
      LinkState::Connected
    }
  }

  fn close(&mut self) {
    self.closed = true;
    info!("[mock hardware] 关闭");
  }
}
