//! Media seam between the encoder and the publish pipeline
//!
//! Samples arrive here already packaged as FLV tag bodies (AVC video,
//! AAC audio). This module only defines the types flowing across the
//! seam and the control traits the orchestrator drives.

use std::collections::HashMap;

use bytes::Bytes;

use crate::amf::AmfValue;

/// Which elementary stream a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Audio,
    Video,
}

/// One encoded frame, timed relative to the previous frame of the same
/// track. Deltas are fractional milliseconds; the session accumulates
/// them so rounding error never drifts.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub track: Track,
    pub delta_ms: f64,
    /// FLV tag body, codec header included
    pub data: Bytes,
    /// Keyframe or sequence header; only meaningful for video
    pub keyframe: bool,
}

impl MediaSample {
    pub fn audio(delta_ms: f64, data: Bytes) -> Self {
        Self {
            track: Track::Audio,
            delta_ms,
            data,
            keyframe: false,
        }
    }

    pub fn video(delta_ms: f64, data: Bytes, keyframe: bool) -> Self {
        Self {
            track: Track::Video,
            delta_ms,
            data,
            keyframe,
        }
    }
}

/// Stream properties announced to the server via `@setDataFrame` /
/// `onMetaData` before media flows.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Video bitrate in bits per second
    pub video_bitrate: u32,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u32,
}

impl StreamMetadata {
    /// Build the onMetaData object. Data rates go out in kbit/s as FMLE
    /// does; codec ids are AVC (7) and AAC (10).
    pub fn to_amf(&self) -> AmfValue {
        let mut object = HashMap::new();
        object.insert("width".to_string(), AmfValue::Number(self.width as f64));
        object.insert("height".to_string(), AmfValue::Number(self.height as f64));
        object.insert(
            "framerate".to_string(),
            AmfValue::Number(self.framerate as f64),
        );
        object.insert("videocodecid".to_string(), AmfValue::Number(7.0));
        object.insert(
            "videodatarate".to_string(),
            AmfValue::Number((self.video_bitrate / 1024) as f64),
        );
        object.insert("audiocodecid".to_string(), AmfValue::Number(10.0));
        object.insert(
            "audiodatarate".to_string(),
            AmfValue::Number((self.audio_bitrate / 1024) as f64),
        );
        AmfValue::Object(object)
    }
}

/// Control surface of the capture/encode side. The orchestrator pauses,
/// resumes and retunes the encoder through this without knowing what
/// sits behind it.
pub trait EncoderControl: Send + Sync {
    /// Start or resume producing samples
    fn start(&self);

    /// Stop producing samples
    fn stop(&self);

    /// Retarget the video encoder bitrate, in bits per second
    fn set_video_bitrate(&self, bitrate: u32);

    /// Retarget the audio encoder bitrate, in bits per second
    fn set_audio_bitrate(&self, bitrate: u32);

    /// Mute or unmute one track at the source
    fn set_muted(&self, track: Track, muted: bool);
}

/// Events a local recorder reports back to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderEvent {
    Started,
    Finished,
}

/// Optional local file sink that runs alongside the network publish
pub trait Recorder: Send {
    fn start(&mut self) -> std::io::Result<()>;
    fn stop(&mut self);
    fn write(&mut self, sample: &MediaSample);
    fn poll_event(&mut self) -> Option<RecorderEvent>;
}
