//! Hardware backends.
//!
//! Only the simulator ships in-tree. Real backends (ASCOM/Alpaca, vendor SDKs) plug
//! in by registering factories on a [`DriverRegistry`](crate::device::DriverRegistry)
//! under their own backend key.

pub mod sim;
