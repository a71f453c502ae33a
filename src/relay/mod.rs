//! Relay core: source and viewer registry, fan-out and maintenance

pub mod dispatcher;
pub mod registry;
pub mod source;
pub mod sweeper;
pub mod viewer;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use registry::Registry;
pub use source::{AudioSource, SourceUpdate};
pub use sweeper::Sweeper;
pub use viewer::{ChannelSink, Viewer, ViewerId, ViewerOutbox, ViewerSink};
