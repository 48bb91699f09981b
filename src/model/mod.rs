pub mod ballot;
pub mod command;
pub mod ids;
pub mod mongodb;
pub mod payload;
pub mod serde_hex;
pub mod state;
pub mod status;
