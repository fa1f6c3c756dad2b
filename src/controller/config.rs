// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/controller/config.rs - 控制器配置与校验
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

use std::str::FromStr;

use thiserror::Error;

use crate::{
  detection::{FaceBox, FaceSelection, FrameContext},
  geometry::Point,
};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("参数 {name} 不是有限数: {value}")]
  NotFinite { name: &'static str, value: f64 },
  #[error("单帧最大步长必须为正: {0}")]
  InvalidMaxStep(f64),
  #[error("死区不能为负: {0}")]
  InvalidDeadZone(f64),
  #[error("{axis} 关节范围无效: [{min}, {max}]")]
  InvalidBounds {
    axis: &'static str,
    min: f64,
    max: f64,
  },
  #[error("{axis} 偏置 {bias} 超出关节跨度 {span}，指令将永远饱和")]
  BiasOutOfRange {
    axis: &'static str,
    bias: f64,
    span: f64,
  },
  #[error("目标坐标不能为负: ({x}, {y})")]
  InvalidTarget { x: f64, y: f64 },
  #[error("开火策略参数无效: {0}")]
  InvalidFirePolicy(String),
}

/// 瞄准目标点
///
/// 每个分量 `<= 1.0` 视为相对帧尺寸的比例，否则视为像素坐标。
/// 这是启发式规则：确实位于像素 0–1 的绝对坐标会被当成比例。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSpec {
  pub x: f64,
  pub y: f64,
}

impl TargetSpec {
  pub const fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }

  /// 目标在当前帧中的像素位置
  pub fn resolve(&self, frame: &FrameContext) -> Point {
    Point::new(
      resolve_axis(self.x, frame.width),
      resolve_axis(self.y, frame.height),
    )
  }
}

fn resolve_axis(value: f64, extent: u32) -> f64 {
  if value <= 1.0 {
    value * f64::from(extent)
  } else {
    value
  }
}

impl Default for TargetSpec {
  fn default() -> Self {
    Self::new(0.5, 0.5)
  }
}

/// 关节类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JointKind {
  /// 超出范围时截断
  #[default]
  Clamped,
  /// 周期关节，按范围取模回绕
  Wrapped,
}

/// 关节角度范围（度）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointBounds {
  pub min: f64,
  pub max: f64,
  pub kind: JointKind,
}

impl JointBounds {
  pub const fn clamped(min: f64, max: f64) -> Self {
    Self {
      min,
      max,
      kind: JointKind::Clamped,
    }
  }

  pub const fn wrapped(min: f64, max: f64) -> Self {
    Self {
      min,
      max,
      kind: JointKind::Wrapped,
    }
  }

  pub fn span(&self) -> f64 {
    self.max - self.min
  }

  pub fn contains(&self, value: f64) -> bool {
    self.min <= value && value <= self.max
  }

  /// 把角度约束到范围内，截断或回绕视关节类型而定
  pub fn constrain(&self, value: f64) -> f64 {
    match self.kind {
      JointKind::Clamped => value.clamp(self.min, self.max),
      JointKind::Wrapped => self.min + (value - self.min).rem_euclid(self.span()),
    }
  }

  /// 约束并取整为指令角度，`.5` 向正无穷取整
  pub fn command(&self, value: f64) -> i32 {
    let rounded = (self.constrain(value) + 0.5).floor();
    rounded.clamp(self.min.ceil(), self.max.floor()) as i32
  }

  fn validate(&self, axis: &'static str) -> Result<(), ConfigError> {
    let invalid = !self.min.is_finite()
      || !self.max.is_finite()
      || self.min >= self.max
      || self.min.ceil() > self.max.floor();
    if invalid {
      return Err(ConfigError::InvalidBounds {
        axis,
        min: self.min,
        max: self.max,
      });
    }
    Ok(())
  }
}

/// 开火判定策略，每次部署只启用一种
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FirePolicy {
  /// 目标点落在以框中心缩放后的人脸框内（含边界）
  InsideBox { scale: f64 },
  /// 目标点距人脸框中心不超过给定像素
  WithinRadius { radius_px: f64 },
}

impl Default for FirePolicy {
  fn default() -> Self {
    FirePolicy::InsideBox { scale: 0.8 }
  }
}

impl FirePolicy {
  pub fn on_target(&self, face: &FaceBox, target: Point) -> bool {
    match *self {
      FirePolicy::InsideBox { scale } => face.shrink(scale).contains(target),
      FirePolicy::WithinRadius { radius_px } => {
        let c = face.centroid();
        (target.x - c.x).hypot(target.y - c.y) <= radius_px
      }
    }
  }

  fn validate(&self) -> Result<(), ConfigError> {
    match *self {
      FirePolicy::InsideBox { scale } if !(scale > 0.0 && scale <= 1.0) => Err(
        ConfigError::InvalidFirePolicy(format!("缩放比例须在 (0, 1] 内: {}", scale)),
      ),
      FirePolicy::WithinRadius { radius_px } if !(radius_px > 0.0 && radius_px.is_finite()) => Err(
        ConfigError::InvalidFirePolicy(format!("半径须为正: {}", radius_px)),
      ),
      _ => Ok(()),
    }
  }
}

impl FromStr for FirePolicy {
  type Err = String;

  /// `box`、`box:0.8`、`radius:40`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, value) = match s.split_once(':') {
      Some((kind, value)) => (kind, Some(value)),
      None => (s, None),
    };
    let parse = |v: &str| {
      v.parse::<f64>()
        .map_err(|_| format!("无效的开火策略参数: {}", v))
    };
    match (kind, value) {
      ("box", None) => Ok(FirePolicy::default()),
      ("box", Some(v)) => Ok(FirePolicy::InsideBox { scale: parse(v)? }),
      ("radius", None) => Ok(FirePolicy::WithinRadius { radius_px: 40.0 }),
      ("radius", Some(v)) => Ok(FirePolicy::WithinRadius {
        radius_px: parse(v)?,
      }),
      _ => Err(format!("未知的开火策略: {}", s)),
    }
  }
}

/// 会话级控制器配置，会话开始后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
  pub target: TargetSpec,
  /// 角度误差到积分步长的比例
  pub gain_deg: f64,
  /// 单帧积分步长上限
  pub max_step_deg: f64,
  /// 比例项增益
  pub kp: f64,
  /// 两轴误差都小于该值时不做修正
  pub dead_zone_deg: f64,
  pub bias_x_deg: f64,
  pub bias_y_deg: f64,
  pub pan: JointBounds,
  pub tilt: JointBounds,
  pub face_selection: FaceSelection,
  pub fire_policy: FirePolicy,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    Self {
      target: TargetSpec::default(),
      gain_deg: 1.0,
      max_step_deg: 2.0,
      kp: 0.4,
      dead_zone_deg: 1.5,
      bias_x_deg: 0.0,
      bias_y_deg: 0.0,
      pan: JointBounds::clamped(-45.0, 45.0),
      tilt: JointBounds::clamped(-20.0, 30.0),
      face_selection: FaceSelection::default(),
      fire_policy: FirePolicy::default(),
    }
  }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
  if value.is_finite() {
    Ok(())
  } else {
    Err(ConfigError::NotFinite { name, value })
  }
}

impl ControllerConfig {
  /// 会话开始时校验；配置错误是致命的
  pub fn validate(&self) -> Result<(), ConfigError> {
    finite("gain_deg", self.gain_deg)?;
    finite("max_step_deg", self.max_step_deg)?;
    finite("kp", self.kp)?;
    finite("dead_zone_deg", self.dead_zone_deg)?;
    finite("bias_x_deg", self.bias_x_deg)?;
    finite("bias_y_deg", self.bias_y_deg)?;
    finite("target_x", self.target.x)?;
    finite("target_y", self.target.y)?;

    if self.max_step_deg <= 0.0 {
      return Err(ConfigError::InvalidMaxStep(self.max_step_deg));
    }
    if self.dead_zone_deg < 0.0 {
      return Err(ConfigError::InvalidDeadZone(self.dead_zone_deg));
    }
    if self.target.x < 0.0 || self.target.y < 0.0 {
      return Err(ConfigError::InvalidTarget {
        x: self.target.x,
        y: self.target.y,
      });
    }

    self.pan.validate("pan")?;
    self.tilt.validate("tilt")?;
    for (axis, bias, bounds) in [
      ("pan", self.bias_x_deg, &self.pan),
      ("tilt", self.bias_y_deg, &self.tilt),
    ] {
      if bias.abs() >= bounds.span() {
        return Err(ConfigError::BiasOutOfRange {
          axis,
          bias,
          span: bounds.span(),
        });
      }
    }

    self.fire_policy.validate()
  }
}
