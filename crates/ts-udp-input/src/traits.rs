//! Collaborator boundaries for the pieces this repository treats as
//! external: the TS demuxer, the transcode/package sinks, and the WebDAV
//! uploader. Each is a trait rather than a concrete implementation, with
//! a local test double standing in for integration tests.

use ts_frame::{LanguageTag, MediaCodec};

/// One demuxed elementary-stream access unit or SCTE-35 section, as
/// handed from the demuxer to the normalizer. Replaces a callback/context
/// pointer pair with a single channel payload type.
#[derive(Debug, Clone)]
pub enum DemuxedSample {
    Video {
        source_index: u32,
        sub_stream_index: u32,
        codec: MediaCodec,
        data: Vec<u8>,
        pts: i64,
        dts: Option<i64>,
    },
    Audio {
        source_index: u32,
        sub_stream_index: u32,
        codec: MediaCodec,
        data: Vec<u8>,
        pts: i64,
        dts: Option<i64>,
        language: Option<LanguageTag>,
    },
    Scte35 {
        source_index: u32,
        pts: i64,
        section_data: Vec<u8>,
    },
}

/// Demuxes a byte stream of aligned TS packets into `DemuxedSample`s.
/// The real implementation (PSI/PES parsing) is out of this repository's
/// scope; this boundary exists so the reader thread has somewhere to hand
/// packets regardless.
pub trait TsDemuxer: Send {
    /// Feed one UDP datagram's worth of TS packets in. Any samples the
    /// demuxer completes as a result are appended to `out`.
    fn push_packets(&mut self, packets: &[u8], out: &mut Vec<DemuxedSample>);
}

/// Accepts frames bound for a transcode pipeline stage (decoder, encoder).
pub trait TranscodeSink: Send {
    fn accept(&mut self, frame: ts_frame::Frame);
}

/// Accepts frames bound for the HLS/DASH packager.
pub trait PackagerSink: Send {
    fn accept(&mut self, frame: ts_frame::Frame);
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload of '{path}' failed: {reason}")]
    Failed { path: String, reason: String },
}

/// Publishes a packaged segment or manifest to durable storage.
pub trait WebdavUploader: Send {
    fn put(&mut self, relative_path: &str, bytes: &[u8]) -> Result<(), UploadError>;
}

/// A no-op sink that just counts what it receives, standing in for a real
/// transcode/packager pipeline in integration tests.
#[derive(Default)]
pub struct CountingSink {
    pub accepted: usize,
}

impl TranscodeSink for CountingSink {
    fn accept(&mut self, _frame: ts_frame::Frame) {
        self.accepted += 1;
    }
}

impl PackagerSink for CountingSink {
    fn accept(&mut self, _frame: ts_frame::Frame) {
        self.accepted += 1;
    }
}

/// Writes uploads to a local directory instead of a remote WebDAV server,
/// for exercising the Dispatcher/Supervisor boundary end-to-end in tests.
pub struct LocalFilesystemUploader {
    root: std::path::PathBuf,
}

impl LocalFilesystemUploader {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl WebdavUploader for LocalFilesystemUploader {
    fn put(&mut self, relative_path: &str, bytes: &[u8]) -> Result<(), UploadError> {
        let target = self.root.join(relative_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UploadError::Failed {
                path: relative_path.to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(&target, bytes).map_err(|e| UploadError::Failed {
            path: relative_path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_filesystem_uploader_writes_under_root() {
        let dir = std::env::temp_dir().join(format!(
            "ts-udp-input-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut uploader = LocalFilesystemUploader::new(&dir);
        uploader.put("segment/0001.ts", b"payload").unwrap();
        let contents = std::fs::read(dir.join("segment/0001.ts")).unwrap();
        assert_eq!(contents, b"payload");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
