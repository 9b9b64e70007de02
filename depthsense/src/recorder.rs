//! Recording of native frames to JSON-lines files for later playback

use crate::backend::driver::{DeviceDriver, DriverInfo, FrameSink, NativeFrameSet};
use crate::error::Result;
use crate::playback::RecordLine;
use crate::types::{FrameSources, StreamRequest};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes a recording header and frame sets, one JSON document per line
pub struct BodyRecorder<W: Write> {
    writer: W,
    frames_written: usize,
}

impl BodyRecorder<BufWriter<File>> {
    /// Create (or truncate) a recording file
    pub fn create<P: AsRef<Path>>(path: P, info: &DriverInfo) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        log::info!("Recording frames to {}", path.as_ref().display());
        Self::new(BufWriter::new(file), info)
    }
}

impl<W: Write> BodyRecorder<W> {
    pub fn new(mut writer: W, info: &DriverInfo) -> Result<Self> {
        serde_json::to_writer(&mut writer, &RecordLine::Info(info.clone()))?;
        writer.write_all(b"\n")?;
        Ok(Self {
            writer,
            frames_written: 0,
        })
    }

    pub fn record(&mut self, set: &NativeFrameSet) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &RecordLine::Frame(set.clone()))?;
        self.writer.write_all(b"\n")?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Flush and hand back the writer
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        log::debug!("Recording finished after {} frames", self.frames_written);
        Ok(self.writer)
    }
}

/// Driver wrapper that records everything the inner driver delivers.
///
/// The inner driver publishes into a private sink. Once the backend has
/// consumed the previous frames, a pump moves the next ones to the recording
/// and on to the backend.
pub struct RecordingDriver {
    inner: Box<dyn DeviceDriver>,
    path: PathBuf,
    name: String,
    recorder: Option<BodyRecorder<BufWriter<File>>>,
    inner_sink: FrameSink,
    outer_sink: Option<FrameSink>,
    sources: FrameSources,
}

impl RecordingDriver {
    pub fn new<P: Into<PathBuf>>(inner: Box<dyn DeviceDriver>, path: P) -> Self {
        let name = format!("{} (recording)", inner.name());
        Self {
            inner,
            path: path.into(),
            name,
            recorder: None,
            inner_sink: FrameSink::new(),
            outer_sink: None,
            sources: FrameSources::NONE,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> usize {
        self.recorder.as_ref().map_or(0, BodyRecorder::frames_written)
    }

    fn drain_inner(&self) -> NativeFrameSet {
        NativeFrameSet {
            color: self.inner_sink.take_color(),
            depth: self.inner_sink.take_depth(),
            body_index: self.inner_sink.take_body_index(),
            body: self.inner_sink.take_body(),
        }
    }

    fn finish_recording(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            let frames = recorder.frames_written();
            match recorder.finish() {
                Ok(_) => log::info!("Recorded {} frames to {}", frames, self.path.display()),
                Err(e) => log::error!("Failed to finish recording {}: {}", self.path.display(), e),
            }
        }
    }
}

impl DeviceDriver for RecordingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, request: &StreamRequest) -> Result<DriverInfo> {
        let info = self.inner.connect(request)?;
        self.sources = request.sources & FrameSources::TRACKING;
        match BodyRecorder::create(&self.path, &info) {
            Ok(recorder) => self.recorder = Some(recorder),
            Err(e) => {
                self.inner.disconnect();
                return Err(e);
            }
        }
        Ok(info)
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        self.inner_sink = FrameSink::new();
        self.inner.start(self.inner_sink.clone())?;
        self.outer_sink = Some(sink);
        Ok(())
    }

    fn pump(&mut self) {
        let backend_idle = self
            .outer_sink
            .as_ref()
            .is_some_and(|sink| !sink.ready().intersects(self.sources));
        if !backend_idle {
            return;
        }
        self.inner.pump();
        let set = self.drain_inner();
        if set.is_empty() {
            return;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(&set) {
                log::error!("Recording to {} stopped: {}", self.path.display(), e);
                self.recorder = None;
            }
        }
        if let Some(sink) = &self.outer_sink {
            let sources = set.sources();
            sink.publish_set(set, sources);
        }
    }

    fn disconnect(&mut self) {
        self.inner.disconnect();
        self.outer_sink = None;
        self.finish_recording();
    }
}

impl Drop for RecordingDriver {
    fn drop(&mut self) {
        self.finish_recording();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::{NativeBodyFrame, NativeImage};
    use crate::playback::PlaybackDriver;

    fn info() -> DriverInfo {
        DriverInfo {
            color_size: (0, 0),
            depth_size: (2, 2),
            max_bodies: 1,
            depth_intrinsics: None,
            color_intrinsics: None,
            depth_to_color: None,
        }
    }

    #[test]
    fn test_recorder_writes_header_then_frames() {
        let mut recorder = BodyRecorder::new(Vec::new(), &info()).unwrap();
        recorder
            .record(&NativeFrameSet {
                body: Some(NativeBodyFrame {
                    timestamp: 3,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recorder.frames_written(), 1);

        let bytes = recorder.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"info\""));
        assert!(matches!(
            serde_json::from_str::<RecordLine>(lines[1]).unwrap(),
            RecordLine::Frame(set) if set.body.as_ref().map(|b| b.timestamp) == Some(3)
        ));
    }

    #[test]
    fn test_recording_driver_forwards_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let frames = (1..=3)
            .map(|t| NativeFrameSet {
                depth: Some(NativeImage::filled(2, 2, 1200u16, t)),
                ..Default::default()
            })
            .collect();
        let inner = PlaybackDriver::from_frames(info(), frames);
        let mut driver = RecordingDriver::new(Box::new(inner), &path);
        let request = StreamRequest {
            sources: FrameSources::DEPTH,
            ..Default::default()
        };
        let sink = FrameSink::new();
        driver.connect(&request).unwrap();
        driver.start(sink.clone()).unwrap();

        for t in 1..=3 {
            driver.pump();
            assert_eq!(sink.take_depth().unwrap().timestamp, t);
        }
        driver.pump();
        assert_eq!(driver.frames_written(), 3);
        driver.disconnect();

        let replay = PlaybackDriver::open(&path).unwrap();
        assert_eq!(replay.frame_count(), 3);
    }
}
