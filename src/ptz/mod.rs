pub mod command;
pub mod dispatch;
pub mod scheduler;

pub use command::{Direction, PtzBackend, PtzCapabilities, PtzCommand, ZoomDirection};
pub use dispatch::{spawn_ptz_dispatch, PtzCommandSender};
pub use scheduler::{PtzIntent, PtzScheduler, PtzTick};
