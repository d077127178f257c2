pub mod camera;
pub mod common;
pub mod config;
pub mod detection;
pub mod error;
pub mod feed;
pub mod ptz;
pub mod records;
pub mod station;

pub use config::Settings;
pub use error::{AppError, CameraError, CommandParseError, DetectorError};

pub use common::{FeedMode, Frame};
pub use detection::dispatcher::DetectionDispatcher;
pub use feed::feed_source::FeedSource;
pub use feed::reconciler::FeedReconciler;
pub use ptz::scheduler::PtzScheduler;
pub use station::{Station, StationHandle};
