pub mod frame;

pub use frame::{FeedMode, Frame};
