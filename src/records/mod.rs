pub mod alerts;
pub mod annotation;
pub mod recorder;
pub mod sightings;

pub use alerts::{Alert, AlertPolicy, AlertSink, TracingAlertSink};
pub use recorder::{count_confident, SightingRecorder};
pub use sightings::SightingsLog;
