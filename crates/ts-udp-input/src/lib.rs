//! UDP/MPEG-TS source input and the trait boundaries to the demuxer,
//! transcode/packager sinks, and uploader — the collaborators this
//! repository treats as out of scope but still must hand typed data to.

mod socket;
mod traits;

pub use socket::{is_multicast, UdpSourceReader, TS_PACKET_SIZE};
pub use traits::{
    CountingSink, DemuxedSample, LocalFilesystemUploader, PackagerSink, TranscodeSink, TsDemuxer,
    UploadError, WebdavUploader,
};
