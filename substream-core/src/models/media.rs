use serde::{Deserialize, Serialize};

/// Advisory encoding constraints advertised to publishers.
///
/// Returned verbatim in the WHIP start and status responses. The upstream
/// enforces these and may disconnect a publisher on violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub video_codec: String,
    pub video_profile: String,
    pub max_width: u32,
    pub max_height: u32,
    pub max_framerate: u32,
    pub max_bitrate_bps: u32,
    pub idr_interval_seconds: u32,
    pub b_frames: bool,
    pub audio_codec: String,
    pub audio_max_bitrate_bps: u32,
}

impl MediaConstraints {
    #[must_use]
    pub fn advertised() -> Self {
        Self {
            video_codec: "H.264".to_string(),
            video_profile: "baseline".to_string(),
            max_width: 1280,
            max_height: 720,
            max_framerate: 30,
            max_bitrate_bps: 2_500_000,
            idr_interval_seconds: 2,
            b_frames: false,
            audio_codec: "opus".to_string(),
            audio_max_bitrate_bps: 160_000,
        }
    }
}
