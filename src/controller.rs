// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/controller.rs - 瞄准控制器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  detection::{DetectionSnapshot, FaceBox, FrameContext},
  link::{Delivery, Link, LinkError, LinkState, Message},
};

mod config;
pub use self::config::{
  ConfigError, ControllerConfig, FirePolicy, JointBounds, JointKind, TargetSpec,
};

mod plan;
pub use self::plan::{Aim, Command, ControllerState, Plan, plan_step};

#[derive(Error, Debug)]
pub enum StepError {
  #[error("发送 `{message}` 失败（链路状态: {state}）: {source}")]
  Link {
    message: String,
    state: LinkState,
    #[source]
    source: LinkError,
  },
}

impl StepError {
  pub fn link_error(&self) -> &LinkError {
    match self {
      StepError::Link { source, .. } => source,
    }
  }
}

/// 一次控制步的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepReport {
  /// 本帧没有人脸：不动、不开火、不发送
  Idle,
  /// 已瞄准并发送指令
  Aimed(Aim),
}

/// 持有控制状态与硬件链路的控制器
pub struct Controller<L: Link> {
  config: ControllerConfig,
  state: ControllerState,
  link: L,
  last_error: Option<(f64, f64)>,
  is_shooting: bool,
}

impl<L: Link> Controller<L> {
  pub fn new(config: ControllerConfig, link: L) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self {
      config,
      state: ControllerState::default(),
      link,
      last_error: None,
      is_shooting: false,
    })
  }

  /// 以给定的初始关节位置开始会话
  pub fn with_state(mut self, state: ControllerState) -> Self {
    self.state = ControllerState {
      arm_x_deg: self.config.pan.constrain(state.arm_x_deg),
      arm_y_deg: self.config.tilt.constrain(state.arm_y_deg),
    };
    self
  }

  pub fn config(&self) -> &ControllerConfig {
    &self.config
  }

  pub fn state(&self) -> ControllerState {
    self.state
  }

  pub fn link(&self) -> &L {
    &self.link
  }

  pub fn link_mut(&mut self) -> &mut L {
    &mut self.link
  }

  /// 上一帧的 `(pan_deg, tilt_deg)` 误差
  pub fn last_error(&self) -> Option<(f64, f64)> {
    self.last_error
  }

  pub fn is_shooting(&self) -> bool {
    self.is_shooting
  }

  /// 积分位置归零，这是唯一清零控制状态的途径
  pub fn recenter(&mut self) {
    info!(
      "关节位置归零（原位置 x={:.2}, y={:.2}）",
      self.state.arm_x_deg, self.state.arm_y_deg
    );
    self.state = ControllerState::default();
  }

  pub fn step_snapshot(&mut self, snapshot: &DetectionSnapshot) -> Result<StepReport, StepError> {
    self.step(&snapshot.faces, &snapshot.frame_context())
  }

  /// 处理一帧检测结果。
  ///
  /// 新状态在发送之前提交，发送失败不会回滚或破坏积分位置。
  pub fn step(&mut self, faces: &[FaceBox], frame: &FrameContext) -> Result<StepReport, StepError> {
    let plan = plan_step(&self.config, self.state, faces, frame);
    self.state = plan.state;

    let Some(aim) = plan.aim else {
      self.last_error = None;
      self.is_shooting = false;
      return Ok(StepReport::Idle);
    };

    self.last_error = Some((aim.pan_deg, aim.tilt_deg));
    self.is_shooting = aim.command.fire;
    debug!(
      "pan={:.2}° tilt={:.2}° 死区={} arm=({:.2}, {:.2}) 指令=({}, {}, {})",
      aim.pan_deg,
      aim.tilt_deg,
      aim.in_dead_zone,
      self.state.arm_x_deg,
      self.state.arm_y_deg,
      aim.command.x_deg,
      aim.command.y_deg,
      aim.command.fire
    );

    self.emit(&aim.command)?;
    Ok(StepReport::Aimed(aim))
  }

  /// 依次发送 x、y、开火指令；瞄准与开火从不限流
  fn emit(&mut self, command: &Command) -> Result<(), StepError> {
    let messages = [
      Message::Pan(command.x_deg),
      Message::Tilt(command.y_deg),
      Message::trigger(command.fire),
    ];
    for message in &messages {
      self
        .link
        .send_message(message, false)
        .map_err(|source| StepError::Link {
          message: message.to_string(),
          state: self.link.state(),
          source,
        })?;
    }
    Ok(())
  }

  pub fn send_heartbeat(&mut self) -> Result<Delivery, LinkError> {
    self.link.send_heartbeat()
  }

  /// 关闭链路并交回最终状态
  pub fn close(mut self) -> ControllerState {
    self.link.close();
    self.state
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 记录消息，按脚本返回失败
  #[derive(Default)]
  struct RecordingLink {
    sent: Vec<Message>,
    fail_from: Option<usize>,
    closed: bool,
  }

  impl Link for RecordingLink {
    fn send_message(&mut self, message: &Message, _rate_limit: bool) -> Result<Delivery, LinkError> {
      if self.fail_from.is_some_and(|n| self.sent.len() >= n) {
        return Err(LinkError::Backoff {
          retry_in: std::time::Duration::from_secs(1),
        });
      }
      self.sent.push(message.clone());
      Ok(Delivery::Sent)
    }

    fn state(&self) -> LinkState {
      if self.fail_from.is_some() {
        LinkState::Disconnected
      } else {
        LinkState::Connected
      }
    }

    fn close(&mut self) {
      self.closed = true;
    }
  }

  fn face() -> [FaceBox; 1] {
    [FaceBox::new(100.0, 100.0, 200.0, 200.0)]
  }

  #[test]
  fn step_sends_pan_tilt_fire_in_order() {
    let mut controller = Controller::new(ControllerConfig::default(), RecordingLink::default()).unwrap();
    let report = controller.step(&face(), &FrameContext::new(640, 480)).unwrap();
    let StepReport::Aimed(aim) = report else {
      panic!("expected an aimed step");
    };
    assert_eq!(
      controller.link().sent,
      vec![
        Message::Pan(aim.command.x_deg),
        Message::Tilt(aim.command.y_deg),
        Message::Hold
      ]
    );
    assert_eq!(controller.last_error(), Some((aim.pan_deg, aim.tilt_deg)));
  }

  #[test]
  fn empty_frame_sends_nothing_and_keeps_position() {
    let mut controller = Controller::new(ControllerConfig::default(), RecordingLink::default()).unwrap();
    controller.step(&face(), &FrameContext::new(640, 480)).unwrap();
    let state = controller.state();

    let report = controller.step(&[], &FrameContext::new(640, 480)).unwrap();
    assert_eq!(report, StepReport::Idle);
    assert_eq!(controller.state(), state);
    assert_eq!(controller.last_error(), None);
    assert!(!controller.is_shooting());
    assert_eq!(controller.link().sent.len(), 3);
  }

  #[test]
  fn failed_send_does_not_disturb_state() {
    let frame = FrameContext::new(640, 480);
    let mut healthy = Controller::new(ControllerConfig::default(), RecordingLink::default()).unwrap();
    let mut failing = Controller::new(
      ControllerConfig::default(),
      RecordingLink {
        fail_from: Some(0),
        ..Default::default()
      },
    )
    .unwrap();

    for _ in 0..3 {
      healthy.step(&face(), &frame).unwrap();
      let err = failing.step(&face(), &frame).unwrap_err();
      let StepError::Link { message, state, .. } = &err;
      assert!(message.starts_with("x "));
      assert_eq!(*state, LinkState::Disconnected);
      assert_eq!(failing.state(), healthy.state());
    }
  }

  #[test]
  fn recenter_is_the_only_reset() {
    let mut controller = Controller::new(ControllerConfig::default(), RecordingLink::default())
      .unwrap()
      .with_state(ControllerState {
        arm_x_deg: 100.0,
        arm_y_deg: -7.0,
      });
    assert_eq!(
      controller.state(),
      ControllerState {
        arm_x_deg: 45.0,
        arm_y_deg: -7.0
      }
    );
    controller.step(&[], &FrameContext::default()).unwrap();
    assert_eq!(controller.state().arm_y_deg, -7.0);
    controller.recenter();
    assert_eq!(controller.state(), ControllerState::default());
  }

  #[test]
  fn invalid_config_is_fatal() {
    let config = ControllerConfig {
      bias_y_deg: -60.0,
      ..Default::default()
    };
    assert!(Controller::new(config, RecordingLink::default()).is_err());
  }

  #[test]
  fn close_shuts_the_link() {
    let controller = Controller::new(ControllerConfig::default(), RecordingLink::default()).unwrap();
    let mut link = RecordingLink::default();
    let mut borrowed = Controller::new(ControllerConfig::default(), &mut link).unwrap();
    borrowed.send_heartbeat().unwrap();
    borrowed.close();
    assert!(link.closed);
    assert_eq!(link.sent, vec![Message::Heartbeat]);
    assert_eq!(controller.close(), ControllerState::default());
  }
}
