#![doc = include_str!("../README.md")]

mod error;

pub mod batch;
pub mod bits;
pub mod calibration;
pub mod downlink;
pub mod fee;
pub mod integrity;
pub mod link;
pub mod mib;
pub mod prelude;
pub mod pus;
pub mod rmap;
pub mod spacepacket;
pub mod timecode;

pub use error::{Error, Result};
