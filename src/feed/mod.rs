pub mod buffer;
pub mod feed_source;
pub mod histogram;
pub mod reconciler;

pub use buffer::FrameBuffer;
pub use feed_source::{FeedSource, FrameProvider};
pub use reconciler::{FeedReconciler, ReconcileOutcome, ShiftState};
