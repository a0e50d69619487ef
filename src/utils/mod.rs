pub mod config;
pub mod log_buffer;
pub mod logging;
pub mod selection;

pub use config::{Config, GeneralSettings, LogSinkKind};
pub use log_buffer::LogBuffer;
