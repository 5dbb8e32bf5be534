//! Media sources: ffmpeg-backed decoding behind the `MediaSource` port.
//!
//! Decoding uses the `ffmpeg` command-line tool via a subprocess on a worker
//! thread; metadata comes from `ffprobe`. Playback position is derived from a
//! wall clock, not from decoder progress.

use crate::frame::VideoFrame;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// Errors opening or probing a media source.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to run {tool}: {source}")]
    ToolSpawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: &'static str, stderr: String },
    #[error("could not parse media metadata: {0}")]
    InvalidMetadata(String),
}

/// Lifecycle events reported by a media source.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Decodable metadata became available.
    MetadataLoaded {
        width: u32,
        height: u32,
        duration: f32,
    },
}

/// A decodable media handle.
///
/// Implementations own their decode machinery; callers only observe decoded
/// frames and the reported position.
pub trait MediaSource: Sized {
    /// Opens the given path or URL.
    fn open(location: &str) -> Result<Self, MediaError>
    where
        Self: Sized;

    /// Total duration in seconds (0 when unknown).
    fn duration(&self) -> f32;

    /// Current playback position in seconds.
    fn position(&self) -> f32;

    /// Moves the playback position. Callers clamp to `[0, duration]`.
    fn seek(&mut self, seconds: f32);

    /// Starts advancing the playback position.
    fn play(&mut self);

    /// Stops advancing the playback position.
    fn pause(&mut self);

    /// Latest decoded frame at or before the current position.
    fn poll_frame(&mut self) -> Option<&VideoFrame>;

    /// Drains the next pending lifecycle event.
    fn poll_event(&mut self) -> Option<MediaEvent>;
}

/// Wall-clock playback position: advances in `Playing`, frozen in `Paused`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaClock {
    state: ClockState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClockState {
    Playing { started: Instant, base: f32 },
    Paused { position: f32 },
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            state: ClockState::Paused { position: 0.0 },
        }
    }

    pub fn position(&self) -> f32 {
        match self.state {
            ClockState::Playing { started, base } => base + started.elapsed().as_secs_f32(),
            ClockState::Paused { position } => position,
        }
    }

    pub fn play(&mut self) {
        if let ClockState::Paused { position } = self.state {
            self.state = ClockState::Playing {
                started: Instant::now(),
                base: position,
            };
        }
    }

    pub fn pause(&mut self) {
        if let ClockState::Playing { .. } = self.state {
            self.state = ClockState::Paused {
                position: self.position(),
            };
        }
    }

    /// Moves the clock, preserving the running/frozen state.
    pub fn set_position(&mut self, seconds: f32) {
        self.state = match self.state {
            ClockState::Playing { .. } => ClockState::Playing {
                started: Instant::now(),
                base: seconds,
            },
            ClockState::Paused { .. } => ClockState::Paused { position: seconds },
        };
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Supported streaming platforms
enum StreamingPlatform {
    YouTube,
    Twitch,
}

/// Check if a URL belongs to a known streaming platform by parsing the domain.
fn detect_streaming_platform(input: &str) -> Option<StreamingPlatform> {
    let parsed = Url::parse(input).ok()?;
    let host = parsed.host_str()?;

    let domain = host.strip_prefix("www.").unwrap_or(host);

    match domain {
        "youtube.com" | "youtu.be" => Some(StreamingPlatform::YouTube),
        "twitch.tv" => Some(StreamingPlatform::Twitch),
        _ => None,
    }
}

/// Resolves platform URLs to raw stream URLs; passes anything else through.
fn resolve_source(location: &str) -> Result<String, MediaError> {
    match detect_streaming_platform(location) {
        Some(StreamingPlatform::YouTube) => {
            info!("Detected YouTube URL, resolving stream via yt-dlp...");
            let output = Command::new("yt-dlp")
                .args([
                    "-g",
                    "-f",
                    "bestvideo[height<=1080][vcodec^=avc1]/bestvideo[height<=1080]/best",
                    location,
                ])
                .output()
                .map_err(|e| MediaError::ToolSpawn {
                    tool: "yt-dlp",
                    source: e,
                })?;

            if !output.status.success() {
                return Err(MediaError::ToolFailed {
                    tool: "yt-dlp",
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }

            let url = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(str::to_string)
                .ok_or_else(|| MediaError::InvalidMetadata("yt-dlp returned no URL".into()))?;

            info!("Resolved YouTube stream");
            Ok(url)
        }
        Some(StreamingPlatform::Twitch) => {
            info!("Detected Twitch URL, resolving stream via streamlink...");
            let output = Command::new("streamlink")
                .args(["--stream-url", location, "best"])
                .output()
                .map_err(|e| MediaError::ToolSpawn {
                    tool: "streamlink",
                    source: e,
                })?;

            if !output.status.success() {
                return Err(MediaError::ToolFailed {
                    tool: "streamlink",
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }

            let url = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string())
                .ok_or_else(|| MediaError::InvalidMetadata("streamlink returned no URL".into()))?;

            info!("Resolved Twitch stream");
            Ok(url)
        }
        None => Ok(location.to_string()),
    }
}

struct MediaInfo {
    width: u32,
    height: u32,
    duration: f32,
    fps: f32,
}

/// Reads stream metadata via ffprobe.
fn probe_metadata(location: &str) -> Result<MediaInfo, MediaError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,duration,r_frame_rate",
            "-of",
            "csv=p=0",
            location,
        ])
        .output()
        .map_err(|e| MediaError::ToolSpawn {
            tool: "ffprobe",
            source: e,
        })?;

    if !output.status.success() {
        return Err(MediaError::ToolFailed {
            tool: "ffprobe",
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    parse_probe_csv(&String::from_utf8_lossy(&output.stdout))
}

/// Parses a `width,height,duration,r_frame_rate` CSV line.
///
/// Duration may read `N/A` for live streams, and some ffprobe builds emit
/// duration and frame rate in either order; a field containing `/` is the
/// frame rate, a plain float is the duration.
fn parse_probe_csv(line: &str) -> Result<MediaInfo, MediaError> {
    let line = line.trim();
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 2 {
        return Err(MediaError::InvalidMetadata(format!(
            "unexpected ffprobe output: {:?}",
            line
        )));
    }

    let width: u32 = parts[0]
        .trim()
        .parse()
        .map_err(|_| MediaError::InvalidMetadata(format!("bad width in {:?}", line)))?;
    let height: u32 = parts[1]
        .trim()
        .parse()
        .map_err(|_| MediaError::InvalidMetadata(format!("bad height in {:?}", line)))?;

    let mut duration = 0.0f32;
    let mut fps = 30.0f32;
    for part in &parts[2..] {
        let part = part.trim();
        if part.contains('/') {
            fps = parse_fps(part);
        } else if let Ok(d) = part.parse::<f32>() {
            duration = d;
        }
        // "N/A" falls through both arms
    }

    Ok(MediaInfo {
        width,
        height,
        duration,
        fps,
    })
}

fn parse_fps(s: &str) -> f32 {
    if let Some((num, den)) = s.split_once('/') {
        let n: f32 = num.parse().unwrap_or(0.0);
        let d: f32 = den.parse().unwrap_or(1.0);
        if d == 0.0 {
            0.0
        } else {
            n / d
        }
    } else {
        s.parse().unwrap_or(30.0)
    }
}

/// A decoded frame paired with its presentation timestamp.
struct DecodedFrame {
    frame: VideoFrame,
    timestamp: f32,
    generation: u64,
}

enum DecoderCommand {
    Seek { target: f32, generation: u64 },
    Stop,
}

/// Video file or stream decoded by a background ffmpeg process.
pub struct VideoFile {
    location: String,
    duration: f32,
    clock: MediaClock,
    frame_rx: Receiver<DecodedFrame>,
    command_tx: mpsc::Sender<DecoderCommand>,
    /// Frame currently on display
    current: Option<DecodedFrame>,
    /// Buffered frame waiting for its timestamp
    next: Option<DecodedFrame>,
    generation: u64,
    pending_event: Option<MediaEvent>,
    worker: Option<JoinHandle<()>>,
}

impl MediaSource for VideoFile {
    fn open(location: &str) -> Result<Self, MediaError> {
        info!("Opening media source: {}", location);
        let resolved = resolve_source(location)?;
        let info = probe_metadata(&resolved)?;
        info!(
            "Video: {}x{}, {:.1}s, {:.1} fps",
            info.width, info.height, info.duration, info.fps
        );

        // Bounded channel so decode cannot outrun playback unboundedly
        let (frame_tx, frame_rx) = mpsc::sync_channel(5);
        let (command_tx, command_rx) = mpsc::channel();

        let width = info.width;
        let height = info.height;
        let fps = info.fps;
        let worker_location = resolved.clone();
        let worker = thread::spawn(move || {
            decode_worker(worker_location, width, height, fps, frame_tx, command_rx);
        });

        Ok(Self {
            location: resolved,
            duration: info.duration,
            clock: MediaClock::new(),
            frame_rx,
            command_tx,
            current: None,
            next: None,
            generation: 0,
            pending_event: Some(MediaEvent::MetadataLoaded {
                width: info.width,
                height: info.height,
                duration: info.duration,
            }),
            worker: Some(worker),
        })
    }

    fn duration(&self) -> f32 {
        self.duration
    }

    fn position(&self) -> f32 {
        self.clock.position()
    }

    fn seek(&mut self, seconds: f32) {
        let target = seconds.max(0.0);
        debug!("Seeking {} to {:.3}s", self.location, target);

        self.generation += 1;
        self.clock.set_position(target);
        let _ = self.command_tx.send(DecoderCommand::Seek {
            target,
            generation: self.generation,
        });

        // Drop buffered pre-seek frames and unblock the worker so it can see
        // the command.
        self.current = None;
        self.next = None;
        while self.frame_rx.try_recv().is_ok() {}
    }

    fn play(&mut self) {
        self.clock.play();
    }

    fn pause(&mut self) {
        self.clock.pause();
    }

    fn poll_frame(&mut self) -> Option<&VideoFrame> {
        let position = self.clock.position();

        if let Some(next) = &self.next {
            if next.generation < self.generation {
                self.next = None;
            } else if next.timestamp <= position {
                self.current = self.next.take();
            } else {
                return self.current.as_ref().map(|d| &d.frame);
            }
        }

        // Consume decoded frames up to the current position; a frame ahead of
        // the position is buffered for a later poll.
        loop {
            match self.frame_rx.try_recv() {
                Ok(decoded) => {
                    if decoded.generation < self.generation {
                        continue;
                    }
                    if decoded.timestamp <= position {
                        self.current = Some(decoded);
                    } else {
                        self.next = Some(decoded);
                        break;
                    }
                }
                Err(mpsc::TryRecvError::Empty) | Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }

        self.current.as_ref().map(|d| &d.frame)
    }

    fn poll_event(&mut self) -> Option<MediaEvent> {
        self.pending_event.take()
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        let _ = self.command_tx.send(DecoderCommand::Stop);
        // Unblock a worker stuck on the bounded frame channel.
        while self.frame_rx.try_recv().is_ok() {}
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn spawn_decoder(location: &str, start_at: f32) -> std::io::Result<Child> {
    let mut args: Vec<String> = Vec::new();

    // Fast seek: -ss before -i lets ffmpeg jump by keyframe first
    if start_at > 0.0 {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", start_at));
    }

    let is_network = location.starts_with("http://") || location.starts_with("https://");
    if is_network {
        for flag in [
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
            "-thread_queue_size",
            "512",
        ] {
            args.push(flag.to_string());
        }
    }

    for flag in [
        "-i",
        location,
        "-f",
        "image2pipe",
        "-pix_fmt",
        "rgba",
        "-vcodec",
        "rawvideo",
        "-",
    ] {
        args.push(flag.to_string());
    }

    Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

/// Background decode loop: reads raw RGBA frames from ffmpeg and pushes them
/// into the bounded channel. Seeks restart the process with `-ss`; end of
/// stream parks the worker until the next command.
fn decode_worker(
    location: String,
    width: u32,
    height: u32,
    fps: f32,
    tx: SyncSender<DecodedFrame>,
    commands: Receiver<DecoderCommand>,
) {
    let frame_size = (width as usize) * (height as usize) * 4;
    let frame_duration = if fps > 0.0 { 1.0 / fps } else { 1.0 / 30.0 };
    let mut origin = 0.0f32;
    let mut generation = 0u64;

    'spawn: loop {
        debug!("Starting ffmpeg at {:.3}s", origin);
        let mut child = match spawn_decoder(&location, origin) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start ffmpeg: {}", e);
                match commands.recv_timeout(Duration::from_secs(1)) {
                    Ok(DecoderCommand::Seek { target, generation: g }) => {
                        origin = target;
                        generation = g;
                    }
                    Ok(DecoderCommand::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }
                continue;
            }
        };

        // Funnel interesting ffmpeg stderr lines into the log
        if let Some(mut stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut buf = [0u8; 1024];
                loop {
                    match stderr.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let msg = String::from_utf8_lossy(&buf[..n]);
                            for line in msg.lines() {
                                if line.contains("Error")
                                    || line.contains("error")
                                    || line.contains("failed")
                                {
                                    error!("ffmpeg: {}", line);
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        let Some(mut stdout) = child.stdout.take() else {
            error!("ffmpeg child had no stdout pipe");
            let _ = child.kill();
            return;
        };
        let mut buffer = vec![0u8; frame_size];
        let mut frame_index = 0u64;

        loop {
            match commands.try_recv() {
                Ok(DecoderCommand::Seek { target, generation: g }) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    origin = target;
                    generation = g;
                    continue 'spawn;
                }
                Ok(DecoderCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            if let Err(e) = stdout.read_exact(&mut buffer) {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!("Error reading from ffmpeg: {}", e);
                }
                break;
            }

            let timestamp = origin + frame_index as f32 * frame_duration;
            frame_index += 1;

            let decoded = DecodedFrame {
                frame: VideoFrame::from_data(width, height, buffer.clone()),
                timestamp,
                generation,
            };

            if tx.send(decoded).is_err() {
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
        }

        let _ = child.wait();
        debug!("Decoder reached end of stream at {:.3}s", origin);

        // No looping: end of stream is a player-level state. Park until the
        // next seek or shutdown.
        match commands.recv() {
            Ok(DecoderCommand::Seek { target, generation: g }) => {
                origin = target;
                generation = g;
            }
            Ok(DecoderCommand::Stop) | Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_csv_standard_order() {
        let info = parse_probe_csv("1920,1080,10.5,30000/1001\n").unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.duration - 10.5).abs() < f32::EPSILON);
        assert!((info.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_csv_swapped_order() {
        let info = parse_probe_csv("1280,720,24/1,42.0").unwrap();
        assert!((info.duration - 42.0).abs() < f32::EPSILON);
        assert!((info.fps - 24.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_probe_csv_missing_duration() {
        let info = parse_probe_csv("640,480,N/A,25/1").unwrap();
        assert_eq!(info.duration, 0.0);
        assert!((info.fps - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_probe_csv_rejects_garbage() {
        assert!(parse_probe_csv("").is_err());
        assert!(parse_probe_csv("not,numbers").is_err());
    }

    #[test]
    fn test_parse_fps_fraction_and_plain() {
        assert!((parse_fps("30000/1001") - 29.97).abs() < 0.01);
        assert!((parse_fps("25") - 25.0).abs() < f32::EPSILON);
        assert_eq!(parse_fps("0/0"), 0.0);
    }

    #[test]
    fn test_detect_streaming_platform() {
        assert!(matches!(
            detect_streaming_platform("https://www.youtube.com/watch?v=abc"),
            Some(StreamingPlatform::YouTube)
        ));
        assert!(matches!(
            detect_streaming_platform("https://youtu.be/abc"),
            Some(StreamingPlatform::YouTube)
        ));
        assert!(matches!(
            detect_streaming_platform("https://twitch.tv/somechannel"),
            Some(StreamingPlatform::Twitch)
        ));
        assert!(detect_streaming_platform("/home/user/video.mp4").is_none());
        assert!(detect_streaming_platform("https://example.com/clip.mp4").is_none());
    }

    #[test]
    fn test_clock_starts_paused_at_zero() {
        let clock = MediaClock::new();
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn test_clock_set_position_while_paused_stays_put() {
        let mut clock = MediaClock::new();
        clock.set_position(7.25);
        assert_eq!(clock.position(), 7.25);
        assert_eq!(clock.position(), 7.25);
    }

    #[test]
    fn test_clock_resumes_from_paused_position() {
        let mut clock = MediaClock::new();
        clock.set_position(3.0);
        clock.play();
        let running = clock.position();
        assert!(running >= 3.0 && running < 3.5);

        clock.pause();
        let frozen = clock.position();
        assert_eq!(clock.position(), frozen);
    }

    #[test]
    fn test_clock_set_position_while_playing_rebases() {
        let mut clock = MediaClock::new();
        clock.play();
        clock.set_position(8.0);
        let p = clock.position();
        assert!(p >= 8.0 && p < 8.5);
    }
}
