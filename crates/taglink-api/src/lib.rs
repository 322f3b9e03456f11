// taglink-api: Protocol client contract for request/response industrial controllers

pub mod client;
pub mod error;
pub mod sim;
pub mod types;

pub use client::{ClientEvent, ClientFactory, ProtocolClient};
pub use error::Error;
pub use types::{DataType, TagAddress, TagValue, TagWrite};
