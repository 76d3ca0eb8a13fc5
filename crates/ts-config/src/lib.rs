//! Immutable runtime configuration.
//!
//! A single record, built once at startup and handed by reference (or
//! cheap clone) to every stage — no stage ever mutates it, no stage reaches
//! for a process-wide global.

use std::net::SocketAddrV4;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Up to 10 video sources, each `IP:port`. Multicast auto-detected by
    /// first octet >= 224.
    pub video_sources: Vec<SocketAddrV4>,
    /// Up to 10 audio sources.
    pub audio_sources: Vec<SocketAddrV4>,
    pub interface: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            video_sources: Vec::new(),
            audio_sources: Vec::new(),
            interface: "lo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    /// Segment length in seconds, 2..60.
    pub segment_seconds: u32,
    /// Window length in segments, 3..10.
    pub window_segments: u32,
    pub rollover: u32,
    pub manifest_dir: PathBuf,
    pub manifest_dash: String,
    pub manifest_hls_ts: String,
    pub manifest_hls_fmp4: String,
    pub hls: bool,
    pub dash: bool,
    pub webvtt: bool,
    pub google: bool,
    pub cdn_username: Option<String>,
    pub cdn_password: Option<String>,
    pub cdn_server: Option<String>,
    /// Unique per instance; used to disambiguate manifests across channels.
    pub identity: String,
    /// YouTube CID. Mutually exclusive with `hls`/`dash`.
    pub youtube_cid: Option<String>,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            segment_seconds: 6,
            window_segments: 5,
            rollover: 1000,
            manifest_dir: PathBuf::from("./manifest"),
            manifest_dash: "dash.mpd".to_string(),
            manifest_hls_ts: "hls.m3u8".to_string(),
            manifest_hls_fmp4: "hls-fmp4.m3u8".to_string(),
            hls: true,
            dash: true,
            webvtt: false,
            google: false,
            cdn_username: None,
            cdn_password: None,
            cdn_server: None,
            identity: "default".to_string(),
            youtube_cid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
    Ac3,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodeProfile {
    Base,
    Main,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub enabled: bool,
    pub gpu: bool,
    pub select_source: u32,
    pub outputs: u32,
    pub video_codec: VideoCodec,
    /// "WxH" per output, CSV.
    pub resolutions: Vec<(u32, u32)>,
    pub video_rate_kbps: Vec<u32>,
    pub audio_codec: AudioCodec,
    pub audio_rate_kbps: Vec<u32>,
    pub aspect: (u32, u32),
    pub scte35: bool,
    pub stereo: bool,
    pub quality: u8,
    pub profile: EncodeProfile,
    pub audio_streams: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpu: false,
            select_source: 0,
            outputs: 1,
            video_codec: VideoCodec::H264,
            resolutions: Vec::new(),
            video_rate_kbps: Vec::new(),
            audio_codec: AudioCodec::Aac,
            audio_rate_kbps: Vec::new(),
            aspect: (16, 9),
            scte35: false,
            stereo: true,
            quality: 1,
            profile: EncodeProfile::Main,
            audio_streams: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub sources: SourceConfig,
    pub packaging: PackagingConfig,
    pub transcode: TranscodeConfig,
    /// Number of configured video sources actively feeding the
    /// synchronizer; the synchronizer only releases a pair once both
    /// windows hold strictly more entries than this.
    pub active_video_sources: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sources: SourceConfig::default(),
            packaging: PackagingConfig::default(),
            transcode: TranscodeConfig::default(),
            active_video_sources: 1,
        }
    }
}

impl IngestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate range and mutual-exclusion constraints. Called
    /// automatically by `from_toml_str`/`load`; exposed so callers who
    /// build or amend an `IngestConfig` from CLI flags can re-check it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=60).contains(&self.packaging.segment_seconds) {
            return Err(ConfigError::Invalid(format!(
                "segment_seconds {} out of range 2..60",
                self.packaging.segment_seconds
            )));
        }
        if !(3..=10).contains(&self.packaging.window_segments) {
            return Err(ConfigError::Invalid(format!(
                "window_segments {} out of range 3..10",
                self.packaging.window_segments
            )));
        }
        if self.packaging.youtube_cid.is_some() && (self.packaging.hls || self.packaging.dash) {
            return Err(ConfigError::Invalid(
                "youtube_cid is mutually exclusive with hls/dash".to_string(),
            ));
        }
        if self.sources.video_sources.len() > 10 {
            return Err(ConfigError::Invalid("at most 10 video sources".to_string()));
        }
        if self.sources.audio_sources.len() > 10 {
            return Err(ConfigError::Invalid("at most 10 audio sources".to_string()));
        }
        Ok(())
    }
}

/// An address's first octet of 224+ means multicast (RFC 5771).
pub fn is_multicast(addr: &SocketAddrV4) -> bool {
    addr.ip().octets()[0] >= 224
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn segment_seconds_out_of_range_is_rejected() {
        let mut config = IngestConfig::default();
        config.packaging.segment_seconds = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn youtube_and_hls_are_mutually_exclusive() {
        let mut config = IngestConfig::default();
        config.packaging.youtube_cid = Some("abc123".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn multicast_detected_by_first_octet() {
        let mcast: SocketAddrV4 = "239.1.1.1:5000".parse().unwrap();
        let unicast: SocketAddrV4 = "10.0.0.1:5000".parse().unwrap();
        assert!(is_multicast(&mcast));
        assert!(!is_multicast(&unicast));
    }
}
