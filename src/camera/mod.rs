pub mod cgi;
pub mod onvif;
pub mod source;
pub mod stream;

pub use cgi::CgiCamera;
pub use onvif::OnvifPtz;
pub use source::{CameraAdmin, InfraredMode, SnapshotQuality, SnapshotSource, StreamSource};
pub use stream::FfmpegStream;
