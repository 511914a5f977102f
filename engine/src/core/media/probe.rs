//! FFprobe movie duration probe

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;

use crate::core::{CoreError, CoreResult};

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: String,
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
}

/// Reads movie lengths with an external `ffprobe` binary
#[derive(Clone, Debug)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check if the probe binary runs
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Movie length in frames; `fallback_fps` is used when the stream has
    /// no usable frame rate
    pub async fn duration_frames(&self, path: &Path, fallback_fps: f64) -> CoreResult<u64> {
        if !path.exists() {
            return Err(CoreError::MediaNotFound(path.display().to_string()));
        }

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| CoreError::FFprobeError(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::FFprobeError(format!("FFprobe failed: {}", stderr)));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        Self::parse_duration_frames(&json_str, fallback_fps)
    }

    fn parse_duration_frames(json: &str, fallback_fps: f64) -> CoreResult<u64> {
        let output: FFprobeOutput = serde_json::from_str(json).map_err(|e| {
            CoreError::FFprobeError(format!("Failed to parse ffprobe output: {}", e))
        })?;

        let video = output
            .streams
            .unwrap_or_default()
            .into_iter()
            .find(|s| s.codec_type == "video");

        if let Some(frames) = video
            .as_ref()
            .and_then(|s| s.nb_frames.as_deref())
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n > 0)
        {
            return Ok(frames);
        }

        let fps = video
            .as_ref()
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .unwrap_or(fallback_fps);

        let seconds = video
            .as_ref()
            .and_then(|s| s.duration.as_deref())
            .or_else(|| output.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| CoreError::FFprobeError("No duration in ffprobe output".into()))?;

        Ok((seconds * fps).round() as u64)
    }
}

/// Parse frame rate string (e.g., "24/1" or "24000/1001")
fn parse_frame_rate(fps_str: &str) -> Option<f64> {
    let (num, den) = fps_str.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den > 0.0 && num > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_frame_count() {
        let json = r#"{
            "streams": [
                { "codec_type": "audio", "nb_frames": "999" },
                { "codec_type": "video", "nb_frames": "120", "r_frame_rate": "24/1" }
            ],
            "format": { "duration": "10.0" }
        }"#;
        assert_eq!(FfprobeProbe::parse_duration_frames(json, 24.0).unwrap(), 120);
    }

    #[test]
    fn test_duration_times_stream_rate() {
        let json = r#"{
            "streams": [{ "codec_type": "video", "r_frame_rate": "25/1" }],
            "format": { "duration": "4.0" }
        }"#;
        assert_eq!(FfprobeProbe::parse_duration_frames(json, 24.0).unwrap(), 100);
    }

    #[test]
    fn test_fallback_fps_when_rate_invalid() {
        let json = r#"{
            "streams": [{ "codec_type": "video", "r_frame_rate": "0/0", "duration": "2.0" }]
        }"#;
        assert_eq!(FfprobeProbe::parse_duration_frames(json, 24.0).unwrap(), 48);
    }

    #[test]
    fn test_missing_duration_is_error() {
        let json = r#"{ "streams": [] }"#;
        assert!(matches!(
            FfprobeProbe::parse_duration_frames(json, 24.0),
            Err(CoreError::FFprobeError(_))
        ));
        assert!(FfprobeProbe::parse_duration_frames("not json", 24.0).is_err());
    }

    #[test]
    fn test_parse_frame_rate_ntsc() {
        let fps = parse_frame_rate("24000/1001").unwrap();
        assert!((fps - 23.976).abs() < 0.001);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[tokio::test]
    async fn test_missing_file_is_media_not_found() {
        let probe = FfprobeProbe::default();
        let result = probe
            .duration_frames(Path::new("/definitely/not/here.mov"), 24.0)
            .await;
        assert!(matches!(result, Err(CoreError::MediaNotFound(_))));
    }
}
