//! Controller message interface
//!
//! This module provides the envelope framing and the typed messages exchanged
//! with the link-layer controller.

pub mod command;
pub mod constants;
pub mod event;
pub mod message;


pub use command::{BondCfmData, StackCommand};
pub use event::{BondInfo, BondRequest, ControllerEvent};
pub use message::{conn_of, task_id, AdapterMessage, Envelope, WireMessage};
