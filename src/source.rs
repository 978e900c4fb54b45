//! Pose source boundary: acquisition, per-frame polling and the JSON-lines
//! frame feed used for replays and for piping frames from a model process.

use log::{info, warn};
use serde::Deserialize;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, TryRecvError},
    },
    thread,
    time::Duration,
};

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::pose::Keypoint;

/// One frame as delivered by the pose model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    pub timestamp_ms: u64,
    pub poses: Vec<Vec<Keypoint>>,
    /// Index fingertip x of the single tracked hand, if one was detected.
    pub hand_tip_x: Option<f32>,
}

pub trait PoseSource: Send {
    /// Acquires the underlying device or stream.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Next frame, or `Ok(None)` when nothing is ready yet.
    fn poll(&mut self) -> Result<Option<RawFrame>, SourceError>;

    /// Releases model and device resources.
    fn close(&mut self);

    fn describe(&self) -> String;
}

/// Opens `source`, retrying up to `acquire_attempts` times.
///
/// Gives up early if `stop` is raised between attempts.
pub fn acquire(
    source: &mut dyn PoseSource,
    cfg: &SourceConfig,
    stop: &AtomicBool,
) -> Result<(), SourceError> {
    let mut last = SourceError::Unavailable("no attempt made".into());
    for attempt in 1..=cfg.acquire_attempts {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match source.open() {
            Ok(()) => {
                info!("opened {} (attempt {attempt})", source.describe());
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "opening {} failed (attempt {attempt}/{}): {e}",
                    source.describe(),
                    cfg.acquire_attempts
                );
                last = e;
                if attempt < cfg.acquire_attempts {
                    thread::sleep(Duration::from_millis(cfg.retry_delay_ms));
                }
            }
        }
    }
    Err(last)
}

#[derive(Debug, Deserialize)]
struct FrameLine {
    #[serde(default)]
    timestamp_ms: Option<u64>,
    #[serde(default)]
    poses: Vec<Vec<Keypoint>>,
    #[serde(default)]
    hand_tip_x: Option<f32>,
    /// Set by the producer when inference failed for this frame.
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
enum Origin {
    Path(PathBuf),
    Stdin,
}

enum Lines {
    File(BufReader<File>),
    Channel(Receiver<io::Result<String>>),
}

/// Frames encoded one JSON object per line:
/// `{"timestamp_ms": 33, "poses": [[{"x":..,"y":..,"visibility":..}, ..]], "hand_tip_x": 0.4}`.
///
/// Frames without a timestamp are stamped at a fixed cadence.
pub struct JsonLinesSource {
    origin: Origin,
    lines: Option<Lines>,
    frame_interval_ms: u64,
    next_timestamp_ms: u64,
    buf: String,
}

impl JsonLinesSource {
    pub fn from_path(path: impl Into<PathBuf>, frame_interval_ms: u64) -> Self {
        Self::with_origin(Origin::Path(path.into()), frame_interval_ms)
    }

    pub fn stdin(frame_interval_ms: u64) -> Self {
        Self::with_origin(Origin::Stdin, frame_interval_ms)
    }

    fn with_origin(origin: Origin, frame_interval_ms: u64) -> Self {
        Self {
            origin,
            lines: None,
            frame_interval_ms,
            next_timestamp_ms: 0,
            buf: String::new(),
        }
    }

    fn parse(&mut self, line: &str) -> Result<Option<RawFrame>, SourceError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let parsed: FrameLine = serde_json::from_str(line)
            .map_err(|e| SourceError::Inference(format!("malformed frame: {e}")))?;

        let timestamp_ms = parsed.timestamp_ms.unwrap_or(self.next_timestamp_ms);
        self.next_timestamp_ms = timestamp_ms.saturating_add(self.frame_interval_ms);

        if let Some(err) = parsed.error {
            return Err(SourceError::Inference(err));
        }
        Ok(Some(RawFrame {
            timestamp_ms,
            poses: parsed.poses,
            hand_tip_x: parsed.hand_tip_x,
        }))
    }
}

impl PoseSource for JsonLinesSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let lines = match &self.origin {
            Origin::Path(path) => {
                let f = File::open(path)
                    .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
                Lines::File(BufReader::new(f))
            }
            Origin::Stdin => {
                // stdin reads block; keep them off the producer thread
                let (tx, rx) = mpsc::channel();
                thread::Builder::new()
                    .name("posectl-stdin".into())
                    .spawn(move || {
                        for line in io::stdin().lock().lines() {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| SourceError::Unavailable(format!("stdin reader: {e}")))?;
                Lines::Channel(rx)
            }
        };
        self.lines = Some(lines);
        self.next_timestamp_ms = 0;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<RawFrame>, SourceError> {
        let line = match self.lines.as_mut() {
            None => return Err(SourceError::Read("source is not open".into())),
            Some(Lines::File(reader)) => {
                self.buf.clear();
                let n = reader
                    .read_line(&mut self.buf)
                    .map_err(|e| SourceError::Read(e.to_string()))?;
                if n == 0 {
                    return Err(SourceError::Exhausted);
                }
                std::mem::take(&mut self.buf)
            }
            Some(Lines::Channel(rx)) => match rx.try_recv() {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => return Err(SourceError::Read(e.to_string())),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(SourceError::Exhausted),
            },
        };
        self.parse(&line)
    }

    fn close(&mut self) {
        self.lines = None;
    }

    fn describe(&self) -> String {
        match &self.origin {
            Origin::Path(p) => format!("frame file {}", p.display()),
            Origin::Stdin => "stdin frame feed".to_string(),
        }
    }
}

/// Replay file when given, otherwise frames piped on stdin.
pub fn frame_source(replay: Option<PathBuf>, frame_interval_ms: u64) -> Box<dyn PoseSource> {
    match replay {
        Some(path) => Box::new(JsonLinesSource::from_path(path, frame_interval_ms)),
        None => Box::new(JsonLinesSource::stdin(frame_interval_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stamps_missing_timestamps() {
        let mut src = JsonLinesSource::stdin(33);
        let a = src.parse(r#"{"poses": []}"#).unwrap().unwrap();
        let b = src.parse(r#"{"hand_tip_x": 0.4}"#).unwrap().unwrap();
        assert_eq!((a.timestamp_ms, b.timestamp_ms), (0, 33));
        assert_eq!(b.hand_tip_x, Some(0.4));

        let c = src.parse(r#"{"timestamp_ms": 1000}"#).unwrap().unwrap();
        let d = src.parse("{}").unwrap().unwrap();
        assert_eq!((c.timestamp_ms, d.timestamp_ms), (1000, 1033));
    }

    #[test]
    fn test_parse_saturates_at_the_largest_timestamp() {
        let mut src = JsonLinesSource::stdin(33);
        let a = src
            .parse(r#"{"timestamp_ms": 18446744073709551615}"#)
            .unwrap()
            .unwrap();
        let b = src.parse("{}").unwrap().unwrap();
        assert_eq!((a.timestamp_ms, b.timestamp_ms), (u64::MAX, u64::MAX));
    }

    #[test]
    fn test_parse_reports_inference_failures() {
        let mut src = JsonLinesSource::stdin(33);
        assert!(matches!(
            src.parse(r#"{"error": "model crashed"}"#),
            Err(SourceError::Inference(msg)) if msg == "model crashed"
        ));
        assert!(matches!(src.parse("{not json"), Err(SourceError::Inference(_))));
        assert_eq!(src.parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_keypoints() {
        let mut src = JsonLinesSource::stdin(33);
        let f = src
            .parse(r#"{"poses": [[{"x": 0.1, "y": 0.2, "visibility": 0.9}, {"x": 0.3, "y": 0.4}]]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(f.poses.len(), 1);
        assert_eq!(f.poses[0][0], Keypoint::new(0.1, 0.2, 0.9));
        assert_eq!(f.poses[0][1].visibility, 1.0);
    }

    #[test]
    fn test_frame_source_describes_origin() {
        assert_eq!(frame_source(None, 33).describe(), "stdin frame feed");
        let f = frame_source(Some(PathBuf::from("/tmp/a.jsonl")), 33);
        assert_eq!(f.describe(), "frame file /tmp/a.jsonl");
    }

    #[test]
    fn test_poll_before_open_is_a_read_error() {
        let mut src = JsonLinesSource::from_path("/nonexistent/frames.jsonl", 33);
        assert!(matches!(src.poll(), Err(SourceError::Read(_))));
        assert!(matches!(src.open(), Err(SourceError::Unavailable(_))));
    }
}
