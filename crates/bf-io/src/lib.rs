//! I/O collaborators around the focus optimizer.
//!
//! - [`metric`]: image -> brightness
//! - [`watcher`]: new images in a directory -> channel
//! - [`parameters`]: the mirror parameter file
//! - [`actuator`] and [`ftp`]: getting the parameter file to the device

pub mod actuator;
pub mod ftp;
pub mod metric;
pub mod parameters;
pub mod watcher;

pub use actuator::*;
pub use ftp::FtpSink;
pub use metric::*;
pub use parameters::*;
pub use watcher::*;
