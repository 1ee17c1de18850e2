pub mod addrdec;
pub mod command;
pub mod config;
pub mod controller;
pub mod cut;
pub mod decoder;
pub mod engine;
pub mod fifo;
pub mod system;

pub use addrdec::AddressCodec;
pub use command::{Address, Command, CommandKind, Transaction};
pub use config::Config;
pub use controller::{ChannelController, Controller};
pub use cut::{CutState, Phase};
pub use decoder::{ControlWord, LoadKind, PimConfig};
pub use system::JedecDramSystem;

/// Flat physical address as seen on the host bus.
#[allow(non_camel_case_types)]
pub type address = u64;
