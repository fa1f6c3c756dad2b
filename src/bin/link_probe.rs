// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/bin/link_probe.rs - 链路连通性测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use miaozhun::{
  FromUrl,
  link::{Link, LinkWrapper, Message},
};

/// 打开链路，向下位机重复发送一条消息
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 硬件链路，例如 serial:///dev/ttyACM0?baud=9600
  #[arg(long, value_name = "URL")]
  pub link: Url,
  /// 发送的内容，原样写出，不加换行
  #[arg(long, default_value = "2")]
  pub message: String,
  #[arg(long, default_value = "3")]
  pub times: usize,
  /// 两次发送之间的间隔（毫秒）
  #[arg(long, default_value = "1000")]
  pub pause_ms: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("硬件链路: {}", args.link);

  let mut link = LinkWrapper::from_url(&args.link)?;
  info!("链路状态: {}", link.state());

  let message = Message::Raw(args.message.clone());
  for i in 0..args.times {
    match link.send_message(&message, false) {
      Ok(delivery) => info!("({}) 发送 {:?}: {:?}", i, args.message, delivery),
      Err(err) => warn!("({}) 发送失败（链路状态: {}）: {}", i, link.state(), err),
    }
    if i + 1 < args.times {
      thread::sleep(Duration::from_millis(args.pause_ms));
    }
  }

  link.close();
  info!("链路已关闭");
  Ok(())
}
