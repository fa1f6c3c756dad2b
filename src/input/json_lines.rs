// 该文件是 Miaozhun （瞄准） 项目的一部分。
// src/input/json_lines.rs - JSON Lines 快照输入
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

use std::{
  fs::File,
  io::{self, BufRead, BufReader},
  path::PathBuf,
  thread,
};

use tracing::{error, info, warn};
use url::Url;

use super::{InputError, SnapshotPublisher, SnapshotReceiver, snapshot_channel};
use crate::{
  FromUrl, FromUrlWithScheme,
  detection::{DetectionSnapshot, FaceBox},
};

const JSON_LINES_SCHEME: &str = "jsonl";
const STDIN_SCHEME: &str = "stdin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonLinesSource {
  /// 回放录制好的文件，逐帧阻塞发布
  File(PathBuf),
  /// 检测进程通过管道实时写入，只保留最新
  Stdin,
}

/// 每行一个 JSON 快照的输入。
///
/// - `jsonl:///path/to/record.jsonl[?capacity=1]`
/// - `stdin:` 或 `stdin://[?capacity=4]`
#[derive(Debug, Clone)]
pub struct JsonLinesInput {
  source: JsonLinesSource,
  capacity: usize,
}

impl FromUrl for JsonLinesInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let source = match url.scheme() {
      JSON_LINES_SCHEME => JsonLinesSource::File(PathBuf::from(url.path())),
      STDIN_SCHEME => JsonLinesSource::Stdin,
      other => {
        error!(
          "URI scheme mismatch: expected '{}' or '{}', found '{}'",
          JSON_LINES_SCHEME, STDIN_SCHEME, other
        );
        return Err(InputError::SchemeMismatch);
      }
    };

    let default_capacity = match source {
      JsonLinesSource::File(_) => 1,
      JsonLinesSource::Stdin => 4,
    };
    let capacity = match url.query_pairs().find(|(k, _)| k == "capacity") {
      Some((_, value)) => match value.parse::<usize>() {
        Ok(capacity) if capacity > 0 => capacity,
        _ => {
          return Err(InputError::InvalidParameter {
            key: "capacity".to_string(),
            value: value.into_owned(),
          });
        }
      },
      None => default_capacity,
    };

    Ok(Self { source, capacity })
  }
}

impl FromUrlWithScheme for JsonLinesInput {
  const SCHEME: &'static str = JSON_LINES_SCHEME;
}

impl JsonLinesInput {
  pub fn source(&self) -> &JsonLinesSource {
    &self.source
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// 启动读取线程并返回接收端；读完或出错后通道关闭
  pub fn spawn(self) -> Result<SnapshotReceiver, InputError> {
    let (publisher, receiver) = snapshot_channel(self.capacity);
    match self.source {
      JsonLinesSource::File(path) => {
        let file = File::open(&path)?;
        info!("回放快照文件: {}", path.display());
        thread::Builder::new()
          .name("jsonl-replay".to_string())
          .spawn(move || finish(pump_lines(BufReader::new(file), &publisher, true)))?;
      }
      JsonLinesSource::Stdin => {
        info!("从标准输入读取快照");
        thread::Builder::new()
          .name("jsonl-stdin".to_string())
          .spawn(move || finish(pump_lines(io::stdin().lock(), &publisher, false)))?;
      }
    }
    Ok(receiver)
  }
}

fn finish(result: Result<usize, InputError>) {
  match result {
    Ok(published) => info!("快照输入结束，共发布 {} 帧", published),
    Err(err) => error!("快照输入中断: {}", err),
  }
}

/// 解析一行；空行返回 `None`，无效的人脸框被丢弃
pub fn parse_line(line_number: usize, line: &str) -> Result<Option<DetectionSnapshot>, InputError> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }
  let mut snapshot: DetectionSnapshot =
    serde_json::from_str(line).map_err(|source| InputError::Json {
      line: line_number,
      source,
    })?;
  let before = snapshot.faces.len();
  snapshot.faces.retain(FaceBox::is_valid);
  if snapshot.faces.len() != before {
    warn!(
      "第 {} 行丢弃 {} 个无效人脸框（需满足 x1 < x2、y1 < y2）",
      line_number,
      before - snapshot.faces.len()
    );
    snapshot.num_faces = snapshot.faces.len();
  }
  Ok(Some(snapshot))
}

/// 把每一行解析成快照发布出去，返回发布的帧数。
///
/// 无法解析的行记录警告后跳过；`blocking` 为真时通道满则等待，不丢帧。
pub fn pump_lines<R: BufRead>(
  reader: R,
  publisher: &SnapshotPublisher,
  blocking: bool,
) -> Result<usize, InputError> {
  let mut published = 0;
  for (index, line) in reader.lines().enumerate() {
    let line = line?;
    let snapshot = match parse_line(index + 1, &line) {
      Ok(Some(snapshot)) => snapshot,
      Ok(None) => continue,
      Err(err) => {
        warn!("跳过无法解析的快照: {}", err);
        continue;
      }
    };
    if blocking {
      publisher.publish_blocking(snapshot)?;
    } else {
      publisher.publish(snapshot)?;
    }
    published += 1;
  }
  Ok(published)
}
