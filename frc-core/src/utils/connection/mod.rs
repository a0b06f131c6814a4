//! Module Exports
//!
//! This file exports the modules that move data between the robot loop and
//! remote clients.
//!
//! # Modules
//! - `table`: key-value store shared by the robot loop and remote clients.
//! - `server`: WebSocket server bridging the table to an external logger.

/// Shared key-value table.
pub mod table;
/// Module for managing the WebSocket server, including routes and connection
/// handling.
pub mod server;
