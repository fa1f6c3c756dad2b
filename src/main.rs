// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use miaozhun::{
  FromUrl,
  controller::Controller,
  input::JsonLinesInput,
  link::LinkWrapper,
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  info!("Miaozhun 瞄准控制");
  info!("硬件链路: {}", args.link);
  info!("快照输入: {}", args.input);

  let config = args.controller_config();
  if let Err(err) = config.validate() {
    error!("配置无效: {}", err);
    return Err(err.into());
  }

  let input = JsonLinesInput::from_url(&url::Url::parse(&args.input)?)?;
  let link = LinkWrapper::from_url(&url::Url::parse(&args.link)?)?;
  let controller = Controller::new(config, link)?;
  let source = input.spawn()?;

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_heartbeat_interval(Duration::from_millis(args.heartbeat_ms))
    .with_ctrlc_handler()?
    .run_task(source, controller)?;

  info!(
    "处理 {} 帧，跳过 {} 帧，瞄准 {} 次，开火 {} 次，链路失败 {} 次",
    summary.frames, summary.skipped, summary.aimed, summary.fired, summary.link_failures
  );
  info!(
    "最终关节位置: x={:.2}, y={:.2}",
    summary.final_state.arm_x_deg, summary.final_state.arm_y_deg
  );
  Ok(())
}
