//! Frame persistence.
//!
//! The engine hands every downloaded frame to a [`FrameWriter`]. The bundled
//! [`RawFrameWriter`] stores the pixels as a little-endian `.raw` dump next to a
//! JSON sidecar; FITS output belongs to an external writer implementing the same
//! trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::drivers::Frame;
use crate::session::Target;

/// Receives frames from the session engine.
///
/// `folder` is already sanitized; implementations create it if missing.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Persist `frame` into `folder` and return the path written.
    async fn write_frame(
        &self,
        frame: &Frame,
        target: &Target,
        timestamp: DateTime<Utc>,
        folder: &Path,
        frame_index: u32,
    ) -> Result<PathBuf>;
}

/// Replace characters that are invalid in file or directory names.
///
/// Covers the Windows-reserved set `<>:"/\|?*` and control characters, so the
/// same target name yields the same folder on every platform. Leading and
/// trailing dots and spaces are trimmed; an empty result becomes `_`.
pub fn sanitize_path_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Serialize)]
struct FrameSidecar<'a> {
    target: &'a str,
    ra_hours: f64,
    dec_degrees: f64,
    timestamp: DateTime<Utc>,
    frame_index: u32,
    width: u32,
    height: u32,
    pixel_format: &'static str,
    #[serde(with = "humantime_serde")]
    exposure: std::time::Duration,
    light: bool,
}

/// Writes `<target>_<index>_<timestamp>.raw` plus a `.json` sidecar.
#[derive(Clone, Debug, Default)]
pub struct RawFrameWriter;

impl RawFrameWriter {
    /// The raw writer.
    pub fn new() -> Self {
        Self
    }

    fn file_stem(target: &Target, timestamp: DateTime<Utc>, frame_index: u32) -> String {
        format!(
            "{}_{:04}_{}",
            sanitize_path_component(&target.name),
            frame_index,
            timestamp.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }
}

#[async_trait]
impl FrameWriter for RawFrameWriter {
    async fn write_frame(
        &self,
        frame: &Frame,
        target: &Target,
        timestamp: DateTime<Utc>,
        folder: &Path,
        frame_index: u32,
    ) -> Result<PathBuf> {
        fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create frame directory at {:?}", folder))?;

        let stem = Self::file_stem(target, timestamp, frame_index);
        let raw_path = folder.join(format!("{stem}.raw"));
        fs::write(&raw_path, frame.pixels.to_le_bytes())
            .with_context(|| format!("Failed to write frame to {:?}", raw_path))?;

        let sidecar = FrameSidecar {
            target: &target.name,
            ra_hours: target.ra_hours,
            dec_degrees: target.dec_degrees,
            timestamp,
            frame_index,
            width: frame.width,
            height: frame.height,
            pixel_format: frame.pixels.format_name(),
            exposure: frame.exposure,
            light: frame.light,
        };
        let json = serde_json::to_string_pretty(&sidecar)
            .context("Failed to serialize frame sidecar to JSON")?;
        let json_path = folder.join(format!("{stem}.json"));
        fs::write(&json_path, json)
            .with_context(|| format!("Failed to write frame sidecar to {:?}", json_path))?;

        tracing::info!(path = %raw_path.display(), frame_index, "Frame written");
        Ok(raw_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::PixelBuffer;
    use std::time::Duration;

    #[test]
    fn test_sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_path_component("M31"), "M31");
        assert_eq!(sanitize_path_component("Sh2-129 / Flying Bat"), "Sh2-129 _ Flying Bat");
        assert_eq!(sanitize_path_component("a<b>c:d\"e\\f|g?h*i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_path_component("tab\there"), "tab_here");
        assert_eq!(sanitize_path_component(".."), "_");
    }

    #[tokio::test]
    async fn test_raw_writer_writes_pixels_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("M 42");
        let target = Target::new("M 42", 5.588, -5.39).unwrap();
        let frame = Frame {
            width: 2,
            height: 2,
            pixels: PixelBuffer::U16(vec![1, 2, 3, 4]),
            exposure: Duration::from_secs(30),
            light: true,
        };

        let path = RawFrameWriter::new()
            .write_frame(&frame, &target, Utc::now(), &folder, 7)
            .await
            .unwrap();

        assert_eq!(fs::read(&path).unwrap().len(), 8);
        let sidecar: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path.with_extension("json")).unwrap())
                .unwrap();
        assert_eq!(sidecar["frame_index"], 7);
        assert_eq!(sidecar["exposure"], "30s");
        assert_eq!(sidecar["target"], "M 42");
    }
}
