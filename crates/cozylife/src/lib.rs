//! Local-network client for CozyLife smart switches and lights.
//!
//! Devices speak line-delimited JSON over TCP. [`Device`] wraps one device
//! with its identity, [`Poller`] keeps its state fresh, and [`scan`] finds
//! devices in an address range.

pub mod capability;
pub mod config;
pub mod device;
pub mod poller;
pub mod protocol;
pub mod scan;
pub mod transport;

pub use capability::classify::DeviceKind;
pub use capability::light::LightCommand;
pub use capability::light::LightState;
pub use config::Config;
pub use config::LogLevel;
pub use device::Device;
pub use device::DeviceIdentity;
pub use device::DeviceOptions;
pub use device::DeviceState;
pub use poller::PollEvent;
pub use poller::Poller;
pub use scan::scan;
pub use scan::ScanReport;
