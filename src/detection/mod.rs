pub mod darknet;
pub mod dispatcher;
pub mod types;
pub mod worker;

pub use darknet::DarknetClient;
pub use dispatcher::{CircuitState, DetectionDispatcher, DetectionOutcome, DispatchState};
pub use types::{BoundingBox, Detection, DetectionRequest, DetectionResponse, DetectorMessage};
pub use worker::{spawn_detector, Detector, DetectorChannels, DetectorTask};
