//! MP4 recording of the coded video stream, and PNG stills
//!
//! Samples are recorded as they arrive from the drone, without re-encoding.
//! The stream has no usable timing of its own, so every accepted sample is
//! placed exactly one frame duration after the previous one.

use chrono::Local;
use mp4::{AvcConfig, FourCC, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::RecordingConfig;
use crate::types::DecodedFrame;
use crate::video::{EncodedSample, FormatDescription};
use crate::{DroneError, Result};

const VIDEO_TRACK_ID: u32 = 1;

/// Outcome of a finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    /// Samples written to the file
    pub frames: u64,
    /// Samples dropped because the muxer was not ready
    pub dropped: u64,
    /// Length of the recorded timeline
    pub duration: Duration,
}

/// Handle to the recorder. Clones share the same recording.
///
/// At most one recording exists at a time. The MP4 writer is created lazily
/// from the format of the first keyframe appended after [`Recorder::start`].
#[derive(Clone)]
pub struct Recorder {
    config: Arc<RecordingConfig>,
    state: Arc<Mutex<Option<Recording>>>,
}

struct Recording {
    path: PathBuf,
    file: Option<File>,
    runtime: Handle,
    writer: Option<WriterHandle>,
    next_pts: u64,
    appended: u64,
    dropped: u64,
}

struct WriterHandle {
    format: Arc<FormatDescription>,
    samples: mpsc::Sender<Mp4Sample>,
    task: JoinHandle<Result<u64>>,
}

impl Recorder {
    pub fn new(config: RecordingConfig) -> Self {
        Self { config: Arc::new(config), state: Arc::new(Mutex::new(None)) }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Recording>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().is_some()
    }

    /// Path of the file being recorded.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|r| r.path.clone())
    }

    /// Start a new recording in the configured output directory.
    ///
    /// The file is named `<prefix>_<MM-DD>_<HH-MM-SS>.mp4`; an existing file
    /// with that name is replaced. Fails, and stays not recording, when a
    /// recording is already active, the directory or file cannot be created,
    /// or there is no tokio runtime to run the writer on.
    pub fn start(&self) -> Result<PathBuf> {
        let mut state = self.lock();
        if let Some(active) = state.as_ref() {
            warn!(path = %active.path.display(), "Already recording");
            return Err(DroneError::recording_failed("a recording is already in progress"));
        }

        let runtime = Handle::try_current().map_err(|e| {
            DroneError::recording_failed_with_source("no runtime for the recording writer", Box::new(e))
        })?;

        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| {
            error!(dir = %dir.display(), "Cannot create recording directory: {}", e);
            DroneError::file_error(dir.clone(), e)
        })?;

        let path = dir.join(file_name(&self.config.file_prefix, "mp4"));
        let file = File::create(&path).map_err(|e| {
            error!(path = %path.display(), "Cannot create recording file: {}", e);
            DroneError::file_error(path.clone(), e)
        })?;

        info!(path = %path.display(), fps = self.config.frame_rate, "Recording started");
        *state = Some(Recording {
            path: path.clone(),
            file: Some(file),
            runtime,
            writer: None,
            next_pts: 0,
            appended: 0,
            dropped: 0,
        });
        Ok(path)
    }

    /// Save one decoded picture next to the recordings' naming scheme.
    pub fn capture_photo(&self, frame: &DecodedFrame, dir: &Path) -> Result<PathBuf> {
        write_photo(frame, dir, &self.config.file_prefix)
    }

    /// Queue one coded sample for the file.
    ///
    /// Does nothing unless recording. Samples before the first keyframe, and
    /// samples the muxer is not ready for, are dropped with a warning; a
    /// dropped sample does not advance the timeline.
    pub fn append_frame(&self, sample: &EncodedSample) {
        let mut state = self.lock();
        let Some(recording) = state.as_mut() else {
            return;
        };

        if recording.writer.is_none() {
            if !sample.is_sync {
                trace!(sequence = sample.sequence, "Waiting for a keyframe to start the file");
                return;
            }
            let Some(file) = recording.file.take() else {
                warn!("Recording writer unavailable, frame dropped");
                recording.dropped += 1;
                return;
            };
            recording.writer = Some(self.spawn_writer(&recording.runtime, file, &sample.format));
        }

        let Some(writer) = recording.writer.as_ref() else {
            return;
        };

        if *writer.format != *sample.format {
            warn!(sequence = sample.sequence, "Stream format changed during recording, frame dropped");
            recording.dropped += 1;
            return;
        }

        let duration = self.config.frame_duration_ticks();
        let mp4_sample = Mp4Sample {
            start_time: recording.next_pts,
            duration,
            rendering_offset: 0,
            is_sync: sample.is_sync,
            bytes: sample.data.clone(),
        };

        match writer.samples.try_send(mp4_sample) {
            Ok(()) => {
                recording.next_pts += u64::from(duration);
                recording.appended += 1;
            }
            Err(TrySendError::Full(_)) => {
                recording.dropped += 1;
                warn!(dropped = recording.dropped, "Recorder not ready for more data, frame dropped");
            }
            Err(TrySendError::Closed(_)) => {
                recording.dropped += 1;
                warn!("Recording writer stopped, frame dropped");
            }
        }
    }

    /// Finish the recording and finalize the file.
    ///
    /// A recording that never received a keyframe produces no file.
    pub async fn stop(&self) -> Result<RecordingSummary> {
        let recording = self.lock().take().ok_or_else(|| {
            warn!("Cannot stop recording, not recording");
            DroneError::recording_failed("not recording")
        })?;

        let Some(writer) = recording.writer else {
            drop(recording.file);
            if let Err(e) = std::fs::remove_file(&recording.path) {
                debug!(path = %recording.path.display(), "Could not remove empty recording: {}", e);
            }
            warn!("Recording stopped before any frame was written");
            return Err(DroneError::recording_failed("no frames were recorded"));
        };

        // Closing the queue lets the writer drain it and finalize the file
        drop(writer.samples);
        let frames = writer
            .task
            .await
            .map_err(|e| DroneError::recording_failed_with_source("writer task failed", Box::new(e)))??;

        if frames != recording.appended {
            warn!(queued = recording.appended, written = frames, "Not every queued sample was written");
        }

        let ticks = recording.next_pts;
        let timescale = u64::from(self.config.timescale.max(1));
        let summary = RecordingSummary {
            path: recording.path,
            frames,
            dropped: recording.dropped,
            duration: Duration::from_micros(ticks * 1_000_000 / timescale),
        };
        info!(
            path = %summary.path.display(),
            frames = summary.frames,
            dropped = summary.dropped,
            "Recording finished"
        );
        Ok(summary)
    }

    fn spawn_writer(&self, runtime: &Handle, file: File, format: &Arc<FormatDescription>) -> WriterHandle {
        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let timescale = self.config.timescale;
        let writer_format = Arc::clone(format);
        let task = runtime.spawn_blocking(move || write_samples(file, &writer_format, timescale, rx));
        debug!(width = format.width(), height = format.height(), "Recording writer started");
        WriterHandle { format: Arc::clone(format), samples: tx, task }
    }
}

fn file_name(prefix: &str, extension: &str) -> String {
    format!("{}_{}.{}", prefix, Local::now().format("%m-%d_%H-%M-%S"), extension)
}

fn png_error(context: &'static str) -> impl FnOnce(png::EncodingError) -> DroneError {
    move |e| DroneError::recording_failed_with_source(context, Box::new(e))
}

/// Save `frame` as `<prefix>_<MM-DD>_<HH-MM-SS>.png` in `dir`.
///
/// An existing file with that name is replaced.
pub fn write_photo(frame: &DecodedFrame, dir: &Path, prefix: &str) -> Result<PathBuf> {
    let expected = DecodedFrame::expected_len(frame.width, frame.height);
    if frame.width == 0 || frame.height == 0 || frame.pixels.len() != expected {
        return Err(DroneError::recording_failed(format!(
            "frame {} is {} bytes, expected {} for {}x{}",
            frame.sequence,
            frame.pixels.len(),
            expected,
            frame.width,
            frame.height
        )));
    }

    std::fs::create_dir_all(dir).map_err(|e| DroneError::file_error(dir.to_path_buf(), e))?;
    let path = dir.join(file_name(prefix, "png"));
    let file = File::create(&path).map_err(|e| {
        error!(path = %path.display(), "Cannot create photo file: {}", e);
        DroneError::file_error(path.clone(), e)
    })?;

    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(png_error("PNG header"))?;
    writer.write_image_data(&frame.pixels).map_err(png_error("PNG image data"))?;
    writer.finish().map_err(png_error("PNG finish"))?;

    info!(path = %path.display(), width = frame.width, height = frame.height, "Photo saved");
    Ok(path)
}

fn mp4_error(context: &'static str) -> impl FnOnce(mp4::Error) -> DroneError {
    move |e| DroneError::recording_failed_with_source(context, Box::new(e))
}

/// Writer loop: runs on the blocking pool until the sample queue closes.
fn write_samples(
    file: File,
    format: &FormatDescription,
    timescale: u32,
    mut samples: mpsc::Receiver<Mp4Sample>,
) -> Result<u64> {
    let brand = |name: &str| {
        name.parse::<FourCC>().map_err(|_| DroneError::recording_failed("invalid MP4 brand"))
    };
    let config = Mp4Config {
        major_brand: brand("isom")?,
        minor_version: 512,
        compatible_brands: vec![brand("isom")?, brand("iso2")?, brand("avc1")?, brand("mp41")?],
        timescale: 1000,
    };

    let mut writer = Mp4Writer::write_start(BufWriter::new(file), &config)
        .map_err(mp4_error("failed to write MP4 header"))?;

    let track = TrackConfig {
        track_type: TrackType::Video,
        timescale,
        language: "und".to_string(),
        media_conf: MediaConfig::AvcConfig(AvcConfig {
            width: clamp_dimension(format.width()),
            height: clamp_dimension(format.height()),
            seq_param_set: format.sps().to_vec(),
            pic_param_set: format.pps().to_vec(),
        }),
    };
    writer.add_track(&track).map_err(mp4_error("failed to add video track"))?;

    let mut written = 0u64;
    while let Some(sample) = samples.blocking_recv() {
        writer.write_sample(VIDEO_TRACK_ID, &sample).map_err(mp4_error("failed to write sample"))?;
        written += 1;
    }

    writer.write_end().map_err(mp4_error("failed to finalize MP4"))?;
    writer
        .into_writer()
        .flush()
        .map_err(|e| DroneError::recording_failed_with_source("failed to flush MP4", Box::new(e)))?;

    debug!(written, "Recording writer finished");
    Ok(written)
}

fn clamp_dimension(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{annexb_to_sample, idr_slice, pps_nal, slice_nal, sps_nal};
    use mp4::Mp4Reader;
    use std::io::BufReader;
    use std::path::Path;

    fn format(width: u32, height: u32) -> Arc<FormatDescription> {
        Arc::new(
            FormatDescription::from_parameter_sets(sps_nal(width, height).into(), pps_nal().into())
                .unwrap(),
        )
    }

    fn sample(format: &Arc<FormatDescription>, keyframe: bool, sequence: u64) -> EncodedSample {
        let nal = if keyframe { idr_slice(500) } else { slice_nal(200) };
        EncodedSample { data: annexb_to_sample(&nal), format: Arc::clone(format), is_sync: keyframe, sequence }
    }

    fn is_recording_file(path: &Path, prefix: &str) -> bool {
        is_stamped_file(path, prefix, ".mp4")
    }

    fn is_stamped_file(path: &Path, prefix: &str, suffix: &str) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(suffix))
            .is_some_and(|stamp| stamp.len() == 14 && stamp.as_bytes()[5] == b'_')
    }

    fn recorder_in(dir: &Path) -> Recorder {
        Recorder::new(RecordingConfig { output_dir: dir.to_path_buf(), ..Default::default() })
    }

    #[test]
    fn file_names_are_timestamped() {
        let name = file_name("drone", "mp4");
        assert!(is_recording_file(Path::new(&name), "drone"), "{}", name);
        assert!(!is_recording_file(Path::new("other_01-02_03-04-05.mp4"), "drone"));
        assert!(!is_recording_file(Path::new("drone_latest.mp4"), "drone"));
    }

    #[tokio::test]
    async fn timestamps_advance_by_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());
        let format = format(960, 720);

        let path = recorder.start().unwrap();
        assert!(recorder.is_recording());

        // Samples before the first keyframe are not recorded
        recorder.append_frame(&sample(&format, false, 1));
        recorder.append_frame(&sample(&format, true, 2));
        for sequence in 3..6 {
            recorder.append_frame(&sample(&format, false, sequence));
            tokio::time::sleep(Duration::from_millis(sequence * 7)).await;
        }

        let summary = recorder.stop().await.unwrap();
        assert_eq!(summary.path, path);
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.duration, Duration::from_micros(133_333));
        assert!(!recorder.is_recording());

        let file = File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        let mut reader = Mp4Reader::read_header(BufReader::new(file), size).unwrap();
        assert_eq!(reader.sample_count(VIDEO_TRACK_ID).unwrap(), 4);

        let track = reader.tracks().get(&VIDEO_TRACK_ID).unwrap();
        assert_eq!((track.width(), track.height()), (960, 720));

        for n in 1..=4u32 {
            let read = reader.read_sample(VIDEO_TRACK_ID, n).unwrap().unwrap();
            assert_eq!(read.start_time, u64::from(n - 1) * 3000);
            assert_eq!(read.is_sync, n == 1);
        }
    }

    #[tokio::test]
    async fn start_fails_closed_on_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let recorder = recorder_in(&blocker.join("recordings"));
        assert!(matches!(recorder.start(), Err(DroneError::File { .. })));
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn only_one_recording_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        recorder.start().unwrap();
        assert!(matches!(recorder.start(), Err(DroneError::Recording { .. })));
    }

    #[tokio::test]
    async fn stop_without_frames_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        let path = recorder.start().unwrap();
        assert!(path.exists());
        assert!(recorder.stop().await.is_err());
        assert!(!path.exists());

        assert!(matches!(recorder.stop().await, Err(DroneError::Recording { .. })));
    }

    #[tokio::test]
    async fn appending_while_idle_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());
        recorder.append_frame(&sample(&format(960, 720), true, 1));
        assert!(!recorder.is_recording());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn format_change_drops_frames() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());
        recorder.start().unwrap();

        recorder.append_frame(&sample(&format(960, 720), true, 1));
        recorder.append_frame(&sample(&format(1280, 720), true, 2));

        let summary = recorder.stop().await.unwrap();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.dropped, 1);
    }

    #[test]
    fn photo_is_a_readable_png() {
        let dir = tempfile::tempdir().unwrap();
        let pixels: Vec<u8> = (0..4 * 3 * 4).map(|i| i as u8).collect();
        let frame = DecodedFrame::new(4, 3, pixels.clone(), 9);

        let path = write_photo(&frame, &dir.path().join("stills"), "drone").unwrap();
        assert!(is_stamped_file(&path, "drone", ".png"), "{}", path.display());

        let decoder = png::Decoder::new(std::io::BufReader::new(File::open(&path).unwrap()));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (4, 3));
        assert_eq!(info.color_type, png::ColorType::Rgba);
        assert_eq!(&buf[..info.buffer_size()], &pixels[..]);
    }

    #[test]
    fn short_pixel_buffer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let frame = DecodedFrame::new(4, 3, vec![0; 10], 1);
        let result = write_photo(&frame, dir.path(), "drone");
        assert!(matches!(result, Err(DroneError::Recording { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
