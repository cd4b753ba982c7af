//! Core trait definitions

mod connector;

pub use connector::DeviceConnector;
