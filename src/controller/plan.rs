// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/controller/plan.rs - 单帧控制计算
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

//! 比例 + 积分瞄准：
//!
//! - 积分项 `arm_x/arm_y` 是跨帧保留的关节位置，每帧按误差累加一步；
//! - 比例项只叠加在本帧指令上，不进入累加器；
//! - 两轴误差都落在死区内时两项都不生效，机构得以稳定下来。

use tracing::debug;

use super::config::ControllerConfig;
use crate::{
  detection::{FaceBox, FrameContext},
  geometry::{MAX_THETA_DEG, circle_radius_px_from_frame, offset_to_angle},
};

/// 累积的关节位置（度），控制器唯一的跨帧记忆
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
  pub arm_x_deg: f64,
  pub arm_y_deg: f64,
}

/// 一帧的输出指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
  pub x_deg: i32,
  pub y_deg: i32,
  pub fire: bool,
}

/// 选中人脸后的瞄准结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aim {
  pub face: FaceBox,
  pub pan_deg: f64,
  pub tilt_deg: f64,
  pub in_dead_zone: bool,
  pub command: Command,
}

/// `plan_step` 的结果：新的状态，以及有人脸时的瞄准结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plan {
  pub state: ControllerState,
  pub aim: Option<Aim>,
}

fn crop_fraction(frame: &FrameContext) -> Option<f64> {
  match frame.center_crop_fraction {
    Some(f) if f > 0.0 && f <= 1.0 => Some(f),
    Some(f) => {
      debug!("忽略无效的裁剪比例: {}", f);
      None
    }
    None => None,
  }
}

/// 由上一帧状态和本帧检测结果计算新状态与指令，不做任何 I/O
pub fn plan_step(
  config: &ControllerConfig,
  state: ControllerState,
  faces: &[FaceBox],
  frame: &FrameContext,
) -> Plan {
  let Some(face) = config.face_selection.select(faces, frame) else {
    return Plan { state, aim: None };
  };

  let centroid = face.centroid();
  let target = config.target.resolve(frame);
  let radius = circle_radius_px_from_frame(frame.width, frame.height);
  let crop = crop_fraction(frame);
  let pan_deg = offset_to_angle(centroid.x - target.x, radius, MAX_THETA_DEG, crop);
  let tilt_deg = offset_to_angle(centroid.y - target.y, radius, MAX_THETA_DEG, crop);

  let in_dead_zone = pan_deg.abs() < config.dead_zone_deg && tilt_deg.abs() < config.dead_zone_deg;

  let mut next = state;
  if !in_dead_zone {
    let max_step = config.max_step_deg;
    // 图像中向上为负，关节向上为正，俯仰需要取反
    let step_x = (config.gain_deg * pan_deg).clamp(-max_step, max_step);
    let step_y = (-config.gain_deg * tilt_deg).clamp(-max_step, max_step);
    next.arm_x_deg += step_x;
    next.arm_y_deg += step_y;
  }
  next.arm_x_deg = config.pan.constrain(next.arm_x_deg);
  next.arm_y_deg = config.tilt.constrain(next.arm_y_deg);

  let (p_x, p_y) = if in_dead_zone {
    (0.0, 0.0)
  } else {
    (config.kp * pan_deg, config.kp * tilt_deg)
  };
  let command = Command {
    x_deg: config.pan.command(next.arm_x_deg + p_x + config.bias_x_deg),
    y_deg: config.tilt.command(next.arm_y_deg - p_y + config.bias_y_deg),
    fire: config.fire_policy.on_target(face, target),
  };

  Plan {
    state: next,
    aim: Some(Aim {
      face: *face,
      pan_deg,
      tilt_deg,
      in_dead_zone,
      command,
    }),
  }
}
