use crate::encoder::H264Encoder;
use crate::errors::CameraError;
use crate::platform::PlatformCamera;
use crate::testing::{synthetic_video_frame, SYNTHETIC_DEVICE_ID};
use crate::types::{CameraFormat, CameraFrame, CameraInitParams};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// How long a stream keeps capturing with nobody subscribed
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive capture/encode failures tolerated before the stream gives up
const MAX_FAILURES: u32 = 10;

/// Video stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate in bps
    pub bitrate: u32,
    /// Frames between periodic keyframes
    pub keyframe_interval: u32,
    /// Encoded frames buffered for slow subscribers
    pub capacity: usize,
    /// Capture stops after this long without subscribers
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: 4_000_000,
            keyframe_interval: 60,
            capacity: 64,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

impl StreamConfig {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMode {
    RealCamera,
    SyntheticTest,
}

/// Camera availability status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CameraStatus {
    Starting,
    Available,
    Failed(String),
}

/// Frame type for WebRTC streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebRTCFrameType {
    Keyframe,
    Delta,
}

/// Encoded access unit shared with every subscriber
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub sequence: u64,
    pub duration: Duration,
    pub frame_type: WebRTCFrameType,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    pub fn is_keyframe(&self) -> bool {
        self.frame_type == WebRTCFrameType::Keyframe
    }
}

/// Stream statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStats {
    pub device_id: String,
    pub is_active: bool,
    pub frames_encoded: u64,
    pub target_bitrate: u32,
    pub resolution: (u32, u32),
    pub subscribers: usize,
    pub mode: StreamMode,
    pub camera_status: CameraStatus,
}

struct StreamerInner {
    device_id: String,
    config: StreamConfig,
    mode: StreamMode,
    /// Taken when the capture loop ends so every receiver sees `Closed`
    frame_sender: Mutex<Option<broadcast::Sender<EncodedFrame>>>,
    running: AtomicBool,
    keyframe_requested: AtomicBool,
    frames_encoded: AtomicU64,
    failure_count: AtomicU32,
    last_active: Mutex<Instant>,
    camera_status: RwLock<CameraStatus>,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Capture and encode loop for one device, fanned out to any number of peers
#[derive(Clone)]
pub struct VideoStreamer {
    inner: Arc<StreamerInner>,
}

/// Produces RGB frames for the capture loop. Lives on the capture thread.
trait FrameSource {
    fn next_frame(&mut self, config: &StreamConfig) -> Result<CameraFrame, CameraError>;

    fn close(&mut self) {}
}

struct CameraSource(PlatformCamera);

impl FrameSource for CameraSource {
    fn next_frame(&mut self, _config: &StreamConfig) -> Result<CameraFrame, CameraError> {
        self.0.capture_frame()
    }

    fn close(&mut self) {
        if let Err(e) = self.0.stop_stream() {
            log::error!("Failed to stop camera stream: {}", e);
        }
    }
}

struct SyntheticSource {
    next_frame: u64,
    deadline: Instant,
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self, config: &StreamConfig) -> Result<CameraFrame, CameraError> {
        // Pace the pattern the way a real device would
        let now = Instant::now();
        if self.deadline > now {
            std::thread::sleep(self.deadline - now);
        }
        self.deadline = Instant::now() + config.frame_duration();

        let frame = synthetic_video_frame(self.next_frame, config.width, config.height);
        self.next_frame += 1;
        Ok(frame)
    }
}

fn open_source(
    device_id: &str,
    config: &StreamConfig,
    mode: StreamMode,
) -> Result<Box<dyn FrameSource>, CameraError> {
    if mode == StreamMode::SyntheticTest || device_id == SYNTHETIC_DEVICE_ID {
        log::info!("Using synthetic test frames for device {}", device_id);
        return Ok(Box::new(SyntheticSource {
            next_frame: 0,
            deadline: Instant::now(),
        }));
    }

    let mut camera = PlatformCamera::open(CameraInitParams {
        device_id: device_id.to_string(),
        format: CameraFormat::new(config.width, config.height, config.fps as f32),
    })?;
    camera.start_stream()?;
    Ok(Box::new(CameraSource(camera)))
}

/// Marks the stream dead however the capture loop exits, panics included
struct CaptureGuard<'a> {
    streamer: &'a VideoStreamer,
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("Capture thread for {} panicked", self.streamer.inner.device_id);
            self.streamer
                .set_status(CameraStatus::Failed("capture thread panicked".to_string()));
        }
        self.streamer.close_channel();
    }
}

impl VideoStreamer {
    /// Open the device and start the capture thread.
    ///
    /// Blocks until the device is open so open failures reach the caller.
    pub fn start(
        device_id: String,
        config: StreamConfig,
        mode: StreamMode,
    ) -> Result<Self, CameraError> {
        Self::spawn(device_id, config, mode, move |id, cfg| open_source(id, cfg, mode))
    }

    fn spawn<O>(
        device_id: String,
        config: StreamConfig,
        mode: StreamMode,
        open: O,
    ) -> Result<Self, CameraError>
    where
        O: FnOnce(&str, &StreamConfig) -> Result<Box<dyn FrameSource>, CameraError>
            + Send
            + 'static,
    {
        let (frame_sender, _) = broadcast::channel(config.capacity.max(1));

        let streamer = Self {
            inner: Arc::new(StreamerInner {
                device_id: device_id.clone(),
                config,
                mode,
                frame_sender: Mutex::new(Some(frame_sender)),
                running: AtomicBool::new(true),
                keyframe_requested: AtomicBool::new(true),
                frames_encoded: AtomicU64::new(0),
                failure_count: AtomicU32::new(0),
                last_active: Mutex::new(Instant::now()),
                camera_status: RwLock::new(CameraStatus::Starting),
                capture_thread: Mutex::new(None),
            }),
        };

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker = streamer.clone();
        let handle = std::thread::Builder::new()
            .name(format!("camsignal-capture-{}", device_id))
            .spawn(move || worker.capture_loop(open, ready_tx))
            .map_err(|e| CameraError::StreamError(format!("Failed to spawn capture thread: {}", e)))?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CameraError::StreamError(
                "Capture thread exited before reporting status".to_string(),
            ))
        });

        if let Err(e) = opened {
            streamer.inner.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        if let Ok(mut slot) = streamer.inner.capture_thread.lock() {
            *slot = Some(handle);
        }

        log::info!(
            "Started video stream for device {} ({}x{} @ {} fps, {} bps)",
            device_id,
            streamer.inner.config.width,
            streamer.inner.config.height,
            streamer.inner.config.fps,
            streamer.inner.config.bitrate
        );
        Ok(streamer)
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Subscribe to encoded frames; the next frame sent is a keyframe.
    ///
    /// Returns `None` once the capture loop has ended.
    pub fn try_subscribe(&self) -> Option<broadcast::Receiver<EncodedFrame>> {
        let slot = self.sender_slot();
        let receiver = slot.as_ref()?.subscribe();
        self.touch();
        self.request_keyframe();
        Some(receiver)
    }

    /// Like [`try_subscribe`](Self::try_subscribe), but an ended stream
    /// yields a receiver that reports `Closed` straight away
    pub fn subscribe(&self) -> broadcast::Receiver<EncodedFrame> {
        self.try_subscribe()
            .unwrap_or_else(|| broadcast::channel(1).1)
    }

    pub fn request_keyframe(&self) {
        self.inner.keyframe_requested.store(true, Ordering::SeqCst);
    }

    pub fn camera_status(&self) -> CameraStatus {
        self.inner
            .camera_status
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| CameraStatus::Failed("status lock poisoned".to_string()))
    }

    /// Stop the capture thread and wait for it to release the device
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            log::info!("Stopping video stream for device {}", self.inner.device_id);
        }

        let handle = self
            .inner
            .capture_thread
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> StreamStats {
        let config = &self.inner.config;
        StreamStats {
            device_id: self.inner.device_id.clone(),
            is_active: self.is_running(),
            frames_encoded: self.inner.frames_encoded.load(Ordering::Relaxed),
            target_bitrate: config.bitrate,
            resolution: (config.width, config.height),
            subscribers: self
                .sender_slot()
                .as_ref()
                .map_or(0, |sender| sender.receiver_count()),
            mode: self.inner.mode,
            camera_status: self.camera_status(),
        }
    }

    fn sender_slot(&self) -> MutexGuard<'_, Option<broadcast::Sender<EncodedFrame>>> {
        // Only the capture thread mutates the slot; a poisoned lock still holds valid state
        self.inner
            .frame_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the sender so subscribers see the end of the stream
    fn close_channel(&self) {
        let mut slot = self.sender_slot();
        self.inner.running.store(false, Ordering::SeqCst);
        slot.take();
    }

    /// Close the channel if nobody has subscribed for `idle_timeout`.
    ///
    /// Runs under the sender lock so a concurrent `try_subscribe` either
    /// lands before the check or sees the closed channel.
    fn close_if_idle(&self) -> bool {
        let mut slot = self.sender_slot();
        let subscribed = slot
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 0);

        if subscribed {
            self.touch();
            return false;
        }
        if self.idle_for() <= self.inner.config.idle_timeout {
            return false;
        }

        self.inner.running.store(false, Ordering::SeqCst);
        slot.take();
        true
    }

    fn broadcast(&self, frame: EncodedFrame) {
        if let Some(sender) = self.sender_slot().as_ref() {
            // No receivers is not an error; peers come and go
            let _ = sender.send(frame);
        }
    }

    fn touch(&self) {
        if let Ok(mut last_active) = self.inner.last_active.lock() {
            *last_active = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.inner
            .last_active
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    fn set_status(&self, status: CameraStatus) {
        if let Ok(mut current) = self.inner.camera_status.write() {
            *current = status;
        }
    }

    /// Returns false once the stream should give up
    fn handle_failure(&self, error: &CameraError) -> bool {
        let count = self.inner.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > MAX_FAILURES {
            log::error!(
                "Too many failures ({}), stopping stream for {}: {}",
                count,
                self.inner.device_id,
                error
            );
            self.set_status(CameraStatus::Failed(error.to_string()));
            false
        } else {
            log::warn!(
                "Stream failure {} for {}: {}",
                count,
                self.inner.device_id,
                error
            );
            true
        }
    }

    fn capture_loop<O>(&self, open: O, ready: mpsc::SyncSender<Result<(), CameraError>>)
    where
        O: FnOnce(&str, &StreamConfig) -> Result<Box<dyn FrameSource>, CameraError>,
    {
        let _guard = CaptureGuard { streamer: self };
        let config = self.inner.config.clone();

        let setup = open(&self.inner.device_id, &config).and_then(|source| {
            let encoder = H264Encoder::new(
                config.width,
                config.height,
                config.fps as f32,
                config.bitrate,
            )?;
            Ok((source, encoder))
        });

        let (mut source, mut encoder) = match setup {
            Ok(pair) => {
                self.set_status(CameraStatus::Available);
                let _ = ready.send(Ok(()));
                pair
            }
            Err(e) => {
                log::warn!("Failed to open {}: {}", self.inner.device_id, e);
                self.set_status(CameraStatus::Failed(e.to_string()));
                let _ = ready.send(Err(e));
                return;
            }
        };

        let mut frames_since_keyframe = 0u32;

        while self.inner.running.load(Ordering::SeqCst) {
            if self.close_if_idle() {
                log::info!("No subscribers left for device {}", self.inner.device_id);
                break;
            }

            let frame = match source
                .next_frame(&config)
                .and_then(|frame| prepare_frame_for_webrtc(frame, &config))
            {
                Ok(frame) => frame,
                Err(e) => {
                    if self.handle_failure(&e) {
                        continue;
                    }
                    break;
                }
            };

            let wants_keyframe = self.inner.keyframe_requested.swap(false, Ordering::SeqCst)
                || frames_since_keyframe + 1 >= config.keyframe_interval;
            if wants_keyframe {
                encoder.force_keyframe();
            }

            let encoded = match encoder.encode_rgb(&frame.data) {
                Ok(encoded) => encoded,
                Err(e) => {
                    if self.handle_failure(&e) {
                        continue;
                    }
                    break;
                }
            };

            // openh264 skips frames under rate pressure
            if encoded.data.is_empty() {
                continue;
            }

            let frame_type = if encoded.is_keyframe {
                frames_since_keyframe = 0;
                WebRTCFrameType::Keyframe
            } else {
                frames_since_keyframe += 1;
                WebRTCFrameType::Delta
            };

            let sequence = self.inner.frames_encoded.fetch_add(1, Ordering::Relaxed);
            self.inner.failure_count.store(0, Ordering::SeqCst);

            self.broadcast(EncodedFrame {
                data: Bytes::from(encoded.data),
                sequence,
                duration: config.frame_duration(),
                frame_type,
                width: config.width,
                height: config.height,
            });
        }

        source.close();
        log::info!(
            "Capture loop ended for device {} after {} frames",
            self.inner.device_id,
            self.inner.frames_encoded.load(Ordering::Relaxed)
        );
    }
}

/// Resize a captured frame to the stream resolution when they differ
pub fn prepare_frame_for_webrtc(
    mut frame: CameraFrame,
    config: &StreamConfig,
) -> Result<CameraFrame, CameraError> {
    if frame.width == config.width && frame.height == config.height {
        return Ok(frame);
    }

    log::debug!(
        "Resizing frame from {}x{} to {}x{}",
        frame.width,
        frame.height,
        config.width,
        config.height
    );

    let expected = frame.width as usize * frame.height as usize * 3;
    let data = std::mem::take(&mut frame.data);
    let img = image::RgbImage::from_raw(frame.width, frame.height, data).ok_or_else(|| {
        CameraError::CaptureError(format!(
            "Frame buffer does not hold a {}x{} RGB image ({} bytes expected)",
            frame.width, frame.height, expected
        ))
    })?;

    let resized = image::imageops::resize(
        &img,
        config.width,
        config.height,
        image::imageops::FilterType::Triangle,
    );

    Ok(CameraFrame {
        data: resized.into_raw(),
        width: config.width,
        height: config.height,
        ..frame
    })
}

/// Running streams keyed by device id
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<tokio::sync::Mutex<HashMap<String, VideoStreamer>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live stream for a device and a subscription to it,
    /// starting a new stream if none is running
    pub async fn acquire(
        &self,
        device_id: &str,
        config: &StreamConfig,
        mode: StreamMode,
    ) -> Result<(VideoStreamer, broadcast::Receiver<EncodedFrame>), CameraError> {
        // Held across the open so one device is never opened twice
        let mut streams = self.streams.lock().await;

        if let Some(existing) = streams.get(device_id) {
            // Subscribing fails once the loop has ended, so a stream that is
            // shutting down is never handed out
            if let Some(frames) = existing.try_subscribe() {
                log::debug!("Reusing running stream for device {}", device_id);
                return Ok((existing.clone(), frames));
            }
            log::debug!("Replacing stopped stream for device {}", device_id);
        }

        let (id, cfg) = (device_id.to_string(), config.clone());
        let streamer = tokio::task::spawn_blocking(move || VideoStreamer::start(id, cfg, mode))
            .await
            .map_err(|e| CameraError::StreamError(format!("Capture start task failed: {}", e)))??;

        let frames = streamer.try_subscribe().ok_or_else(|| {
            CameraError::StreamError(format!("Stream for {} ended during start", device_id))
        })?;

        streams.insert(device_id.to_string(), streamer.clone());
        Ok((streamer, frames))
    }

    pub async fn get(&self, device_id: &str) -> Option<VideoStreamer> {
        self.streams.lock().await.get(device_id).cloned()
    }

    pub async fn stats(&self) -> Vec<StreamStats> {
        self.streams
            .lock()
            .await
            .values()
            .map(VideoStreamer::stats)
            .collect()
    }

    /// Stop every stream and wait for the devices to be released
    pub async fn stop_all(&self) {
        let streams: Vec<VideoStreamer> = self.streams.lock().await.drain().map(|(_, s)| s).collect();
        if streams.is_empty() {
            return;
        }
        log::info!("Stopping {} video stream(s)", streams.len());
        let _ = tokio::task::spawn_blocking(move || {
            for streamer in streams {
                streamer.stop();
            }
        })
        .await;
    }
}
