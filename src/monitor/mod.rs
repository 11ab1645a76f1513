pub mod controller;
pub mod events;
pub mod state;

pub use controller::{MonitorBackends, MonitorController};
pub use events::MonitorEvent;
pub use state::{MonitorFlags, MonitorStatus};
