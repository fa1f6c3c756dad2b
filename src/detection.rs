// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/detection.rs - 人脸检测结果与帧上下文
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

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// 快照缺少帧尺寸时使用的宽度
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
/// 快照缺少帧尺寸时使用的高度
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// 人脸包围框 `(x1, y1, x2, y2)`，帧像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct FaceBox {
  pub x1: f64,
  pub y1: f64,
  pub x2: f64,
  pub y2: f64,
}

impl From<[f64; 4]> for FaceBox {
  fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
    Self { x1, y1, x2, y2 }
  }
}

impl From<FaceBox> for [f64; 4] {
  fn from(face: FaceBox) -> Self {
    [face.x1, face.y1, face.x2, face.y2]
  }
}

impl FaceBox {
  pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 坐标有限且 `x1 < x2`、`y1 < y2`
  pub fn is_valid(&self) -> bool {
    [self.x1, self.y1, self.x2, self.y2]
      .iter()
      .all(|v| v.is_finite())
      && self.x1 < self.x2
      && self.y1 < self.y2
  }

  pub fn width(&self) -> f64 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f64 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f64 {
    self.width() * self.height()
  }

  pub fn centroid(&self) -> Point {
    Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
  }

  /// 以自身中心缩放后的框，`scale` 为 0.8 时得到 80% 大小
  pub fn shrink(&self, scale: f64) -> FaceBox {
    let center = self.centroid();
    let half_w = self.width() * 0.5 * scale;
    let half_h = self.height() * 0.5 * scale;
    FaceBox::new(
      center.x - half_w,
      center.y - half_h,
      center.x + half_w,
      center.y + half_h,
    )
  }

  /// 点是否在框内（边界包含在内）
  pub fn contains(&self, point: Point) -> bool {
    self.x1 <= point.x && point.x <= self.x2 && self.y1 <= point.y && point.y <= self.y2
  }
}

/// 检测结果所在的坐标空间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
  pub width: u32,
  pub height: u32,
  /// 推理帧是传感器图像中心裁剪时的裁剪比例，`None` 表示完整视场
  pub center_crop_fraction: Option<f64>,
}

impl FrameContext {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      center_crop_fraction: None,
    }
  }

  pub fn with_crop_fraction(mut self, crop_fraction: Option<f64>) -> Self {
    self.center_crop_fraction = crop_fraction;
    self
  }

  pub fn center(&self) -> Point {
    Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
  }
}

impl Default for FrameContext {
  fn default() -> Self {
    Self::new(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT)
  }
}

/// 人脸选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceSelection {
  /// 面积最大的框
  #[default]
  LargestArea,
  /// 中心离帧中心最近的框
  ClosestToCenter,
}

impl FaceSelection {
  /// 选出唯一的目标人脸；相等时取先出现的
  pub fn select<'a>(&self, faces: &'a [FaceBox], frame: &FrameContext) -> Option<&'a FaceBox> {
    let mut best: Option<(&FaceBox, f64)> = None;
    for face in faces {
      let score = match self {
        FaceSelection::LargestArea => face.area(),
        FaceSelection::ClosestToCenter => {
          let c = face.centroid();
          let center = frame.center();
          -(c.x - center.x).hypot(c.y - center.y)
        }
      };
      match best {
        Some((_, best_score)) if score <= best_score => {}
        _ => best = Some((face, score)),
      }
    }
    best.map(|(face, _)| face)
  }
}

impl std::str::FromStr for FaceSelection {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "largest" | "largest-area" => Ok(FaceSelection::LargestArea),
      "center" | "closest-to-center" => Ok(FaceSelection::ClosestToCenter),
      _ => Err(format!("未知的人脸选择策略: {}", s)),
    }
  }
}

fn default_frame_width() -> u32 {
  DEFAULT_FRAME_WIDTH
}

fn default_frame_height() -> u32 {
  DEFAULT_FRAME_HEIGHT
}

/// 检测子系统发布的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
  #[serde(default)]
  pub is_running: bool,
  #[serde(default)]
  pub timestamp_ms: i64,
  #[serde(default)]
  pub num_faces: usize,
  #[serde(default)]
  pub faces: Vec<FaceBox>,
  #[serde(default = "default_frame_width")]
  pub frame_width: u32,
  #[serde(default = "default_frame_height")]
  pub frame_height: u32,
  #[serde(default)]
  pub center_crop_fraction: Option<f64>,
}

impl Default for DetectionSnapshot {
  fn default() -> Self {
    Self {
      is_running: false,
      timestamp_ms: 0,
      num_faces: 0,
      faces: Vec::new(),
      frame_width: DEFAULT_FRAME_WIDTH,
      frame_height: DEFAULT_FRAME_HEIGHT,
      center_crop_fraction: None,
    }
  }
}

impl DetectionSnapshot {
  /// 帧尺寸缺失（为 0）时回退到 640x480
  pub fn frame_context(&self) -> FrameContext {
    let (width, height) = if self.frame_width == 0 || self.frame_height == 0 {
      (DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT)
    } else {
      (self.frame_width, self.frame_height)
    };
    FrameContext::new(width, height).with_crop_fraction(self.center_crop_fraction)
  }
}
