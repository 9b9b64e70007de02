//! Replay of recorded native frames as if they came from a device
//!
//! A recording is a JSON-lines file: one [`RecordLine::Info`] header followed
//! by one [`RecordLine::Frame`] per captured frame set. A [`PlaybackDriver`]
//! slots in behind any backend, so a whole session (translation, mapping,
//! slot tracking, smoothing) runs without hardware.

use crate::backend::driver::{DeviceDriver, DriverInfo, FrameSink, NativeFrameSet};
use crate::error::{Result, SensorError};
use crate::types::{FrameSources, StreamRequest};
use crossbeam::channel::{bounded, select, Sender};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One line of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordLine {
    Info(DriverInfo),
    Frame(NativeFrameSet),
}

/// How recorded frames are handed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// From `pump`: the next frame set is published once the backend has
    /// consumed every requested stream of the previous one
    Polled,
    /// From a background thread, one frame set per interval, whether or not
    /// the backend keeps up
    Threaded { interval: Duration },
}

/// Cursor over the recorded frames, wrapping when looping
struct Reel {
    frames: Arc<Vec<NativeFrameSet>>,
    looping: bool,
    cursor: usize,
    /// Timestamp span of one pass, so looped frames stay strictly newer
    span: u64,
}

impl Reel {
    fn new(frames: Arc<Vec<NativeFrameSet>>, looping: bool) -> Self {
        let span = frames.iter().map(|f| f.max_timestamp()).max().unwrap_or(0) + 1;
        Self {
            frames,
            looping,
            cursor: 0,
            span,
        }
    }

    fn next_set(&mut self) -> Option<NativeFrameSet> {
        if self.frames.is_empty() {
            return None;
        }
        let pass = (self.cursor / self.frames.len()) as u64;
        if pass > 0 && !self.looping {
            return None;
        }
        let set = self.frames[self.cursor % self.frames.len()].clone();
        self.cursor += 1;
        Some(set.shifted(pass * self.span))
    }

    fn is_finished(&self) -> bool {
        !self.looping && self.cursor >= self.frames.len()
    }
}

struct Worker {
    shutdown_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Driver that replays a recording
pub struct PlaybackDriver {
    name: String,
    info: DriverInfo,
    frames: Arc<Vec<NativeFrameSet>>,
    mode: PlaybackMode,
    looping: bool,
    reel: Option<Reel>,
    sources: FrameSources,
    sink: Option<FrameSink>,
    worker: Option<Worker>,
}

impl PlaybackDriver {
    /// Playback of frames held in memory
    pub fn from_frames(info: DriverInfo, frames: Vec<NativeFrameSet>) -> Self {
        Self {
            name: "playback".to_string(),
            info,
            frames: Arc::new(frames),
            mode: PlaybackMode::Polled,
            looping: false,
            reel: None,
            sources: FrameSources::NONE,
            sink: None,
            worker: None,
        }
    }

    /// Load a JSON-lines recording written by
    /// [`BodyRecorder`](crate::recorder::BodyRecorder)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut info = None;
        let mut frames = Vec::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordLine>(&line)? {
                RecordLine::Info(header) if info.is_none() => info = Some(header),
                RecordLine::Info(_) => {
                    return Err(SensorError::other(format!(
                        "{}:{}: second recording header",
                        path.display(),
                        number + 1
                    )))
                }
                RecordLine::Frame(_) if info.is_none() => {
                    return Err(SensorError::other(format!(
                        "{}:{}: frame before recording header",
                        path.display(),
                        number + 1
                    )))
                }
                RecordLine::Frame(set) => frames.push(set),
            }
        }

        let info = info.ok_or_else(|| {
            SensorError::other(format!("{}: recording has no header", path.display()))
        })?;
        log::info!("Loaded {} recorded frames from {}", frames.len(), path.display());

        let mut driver = Self::from_frames(info, frames);
        driver.name = format!("playback of {}", path.display());
        Ok(driver)
    }

    /// Deliver frames from a background thread, one set per `interval`
    pub fn threaded(mut self, interval: Duration) -> Self {
        self.mode = PlaybackMode::Threaded { interval };
        self
    }

    /// Start over from the first frame after the last one
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether every recorded frame has been delivered (polled mode)
    pub fn is_finished(&self) -> bool {
        self.reel.as_ref().map_or(false, Reel::is_finished)
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            if worker.handle.join().is_err() {
                log::error!("{} delivery thread panicked", self.name);
            }
        }
    }

    fn spawn_worker(&mut self, interval: Duration, mut reel: Reel, sink: FrameSink) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let sources = self.sources;
        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name("depthsense-playback".to_string())
            .spawn(move || {
                log::debug!("{} delivery thread started", name);
                let mut delivered = 0_u64;
                loop {
                    let stop = select! {
                        recv(shutdown_rx) -> _ => true,
                        default(interval) => false,
                    };
                    if stop {
                        break;
                    }
                    let Some(set) = reel.next_set() else {
                        log::info!("{} reached the end after {} frames", name, delivered);
                        break;
                    };
                    sink.publish_set(set, sources);
                    delivered += 1;
                }
                log::debug!("{} delivery thread stopped", name);
            })?;
        self.worker = Some(Worker {
            shutdown_tx,
            handle,
        });
        Ok(())
    }
}

impl DeviceDriver for PlaybackDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, request: &StreamRequest) -> Result<DriverInfo> {
        if self.frames.is_empty() {
            return Err(SensorError::device_unavailable(format!(
                "{} has no frames",
                self.name
            )));
        }
        self.sources = request.sources & FrameSources::TRACKING;
        self.reel = Some(Reel::new(Arc::clone(&self.frames), self.looping));
        Ok(self.info.clone())
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        let reel = self
            .reel
            .take()
            .ok_or_else(|| SensorError::device_unavailable(format!("{} not connected", self.name)))?;
        match self.mode {
            PlaybackMode::Polled => {
                self.reel = Some(reel);
                self.sink = Some(sink);
                Ok(())
            }
            PlaybackMode::Threaded { interval } => self.spawn_worker(interval, reel, sink),
        }
    }

    fn pump(&mut self) {
        let (Some(reel), Some(sink)) = (self.reel.as_mut(), self.sink.as_ref()) else {
            return;
        };
        if sink.ready().intersects(self.sources) {
            return;
        }
        if let Some(set) = reel.next_set() {
            sink.publish_set(set, self.sources);
        }
    }

    fn disconnect(&mut self) {
        self.stop_worker();
        self.sink = None;
        self.reel = None;
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
