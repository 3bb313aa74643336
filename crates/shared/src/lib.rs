//! Data shared between the monitoring engine and its hosts: the event catalog,
//! card binding tables, and the guiding server's JSON-lines wire format.

pub mod domain;
pub mod error;
pub mod protocol;
pub mod tables;
