// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/geometry.rs - 鱼眼等距投影几何
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

//! # 像素到角度的换算
//!
//! 采用等距鱼眼模型：视场是以 `(cx, cy)` 为圆心、半径 `R` 像素的圆，
//! 偏离光轴的角度与像素半径成正比：
//!
//! ```text
//! theta_deg = (r_pixels / R) * max_theta_deg
//! ```
//!
//! 这是参数化近似，不是标定过的相机模型。

use crate::detection::FaceBox;

/// 规范（虚拟）帧宽度
pub const CANONICAL_WIDTH: f64 = 3840.0;
/// 规范（虚拟）帧高度
pub const CANONICAL_HEIGHT: f64 = 1920.0;
/// 规范帧中视场圆的半径（像素）
pub const CANONICAL_RADIUS_PX: f64 = 960.0;
/// 视场圆边缘处的极角（度），即 200° 总视场
pub const MAX_THETA_DEG: f64 = 100.0;
/// 视场圆半径与帧宽的比例 `K`
pub const RADIUS_PER_WIDTH: f64 = CANONICAL_RADIUS_PX / CANONICAL_WIDTH;

/// 像素平面上的一个点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub const fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }
}

/// 规范帧的中心
pub const CANONICAL_CENTER: Point = Point::new(CANONICAL_WIDTH / 2.0, CANONICAL_HEIGHT / 2.0);

/// 由实际帧宽计算视场圆半径，与帧高无关。
///
/// 原始鱼眼帧与校正后的直线帧都按同一比例缩放。
pub fn circle_radius_px_from_frame(frame_width: u32, _frame_height: u32) -> f64 {
  f64::from(frame_width) * RADIUS_PER_WIDTH
}

fn effective_max_theta(max_theta_deg: f64, crop_fraction: Option<f64>) -> f64 {
  max_theta_deg * crop_fraction.unwrap_or(1.0)
}

/// 单轴像素偏移换算为角度（度）。
///
/// 线性且为奇函数；`radius_px` 不为正时返回 `0.0`。
/// 对中心裁剪过的输入帧传入 `crop_fraction`（例如 0.6），
/// 以免报告超出实际视场的角度。
pub fn offset_to_angle(
  delta_pixels: f64,
  radius_px: f64,
  max_theta_deg: f64,
  crop_fraction: Option<f64>,
) -> f64 {
  if radius_px > 0.0 {
    (delta_pixels / radius_px) * effective_max_theta(max_theta_deg, crop_fraction)
  } else {
    0.0
  }
}

/// 像素坐标换算为极坐标角 `(theta_deg, phi_deg)`。
///
/// `theta` 为偏离中心的极角，`phi` 为 0°–360° 的方位角。
pub fn pixel_to_angle(
  point: Point,
  center: Point,
  radius_px: f64,
  max_theta_deg: f64,
  crop_fraction: Option<f64>,
) -> (f64, f64) {
  let dx = point.x - center.x;
  let dy = point.y - center.y;
  let r_pixel = dx.hypot(dy);
  let theta = offset_to_angle(r_pixel, radius_px, max_theta_deg, crop_fraction);
  let mut phi = dy.atan2(dx).to_degrees();
  if phi < 0.0 {
    phi += 360.0;
  }
  (theta, phi)
}

/// 人脸框中心的极坐标角
pub fn face_box_to_angle(
  face: &FaceBox,
  center: Point,
  radius_px: f64,
  max_theta_deg: f64,
  crop_fraction: Option<f64>,
) -> (f64, f64) {
  pixel_to_angle(
    face.centroid(),
    center,
    radius_px,
    max_theta_deg,
    crop_fraction,
  )
}
