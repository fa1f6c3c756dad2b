// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;

use miaozhun::{
  controller::{ControllerConfig, FirePolicy, JointBounds, JointKind, TargetSpec},
  detection::FaceSelection,
};

/// Miaozhun 瞄准控制参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 硬件链路
  /// 支持格式:
  /// - 串口: serial:///dev/ttyACM0?baud=9600&rate_limit_ms=100
  /// - Windows 串口: serial://local?port=COM11
  /// - 无硬件: mock://local
  #[arg(long, default_value = "serial:///dev/ttyACM0", value_name = "URL")]
  pub link: String,

  /// 检测快照输入
  /// 支持格式:
  /// - 回放: jsonl:///path/to/record.jsonl
  /// - 管道: stdin:
  #[arg(long, default_value = "stdin:", value_name = "URL")]
  pub input: String,

  /// 瞄准点 x（<= 1.0 为帧宽比例，否则为像素）
  #[arg(long, default_value = "0.5")]
  pub target_x: f64,

  /// 瞄准点 y（<= 1.0 为帧高比例，否则为像素）
  #[arg(long, default_value = "0.5")]
  pub target_y: f64,

  /// 积分增益
  #[arg(long, default_value = "1.0")]
  pub gain_deg: f64,

  /// 比例增益
  #[arg(long, default_value = "0.4")]
  pub kp: f64,

  #[arg(long, default_value = "1.5")]
  pub dead_zone_deg: f64,

  #[arg(long, default_value = "2.0")]
  pub max_step_deg: f64,

  #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
  pub bias_x_deg: f64,

  #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
  pub bias_y_deg: f64,

  #[arg(long, default_value = "-45.0", allow_negative_numbers = true)]
  pub pan_min: f64,

  #[arg(long, default_value = "45.0", allow_negative_numbers = true)]
  pub pan_max: f64,

  /// 水平关节为周期关节（回绕而不是截断）
  #[arg(long)]
  pub pan_wrap: bool,

  #[arg(long, default_value = "-20.0", allow_negative_numbers = true)]
  pub tilt_min: f64,

  #[arg(long, default_value = "30.0", allow_negative_numbers = true)]
  pub tilt_max: f64,

  /// 人脸选择: largest | center
  #[arg(long, default_value = "largest")]
  pub face_selection: FaceSelection,

  /// 开火判定: box[:缩放] | radius[:像素]
  #[arg(long, default_value = "box:0.8")]
  pub fire_policy: FirePolicy,

  /// 心跳间隔（毫秒）
  #[arg(long, default_value = "500")]
  pub heartbeat_ms: u64,

  /// 处理的最大帧数，不指定则一直运行
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn controller_config(&self) -> ControllerConfig {
    let pan_kind = if self.pan_wrap {
      JointKind::Wrapped
    } else {
      JointKind::Clamped
    };
    ControllerConfig {
      target: TargetSpec::new(self.target_x, self.target_y),
      gain_deg: self.gain_deg,
      max_step_deg: self.max_step_deg,
      kp: self.kp,
      dead_zone_deg: self.dead_zone_deg,
      bias_x_deg: self.bias_x_deg,
      bias_y_deg: self.bias_y_deg,
      pan: JointBounds {
        min: self.pan_min,
        max: self.pan_max,
        kind: pan_kind,
      },
      tilt: JointBounds::clamped(self.tilt_min, self.tilt_max),
      face_selection: self.face_selection,
      fire_policy: self.fire_policy,
    }
  }
}
