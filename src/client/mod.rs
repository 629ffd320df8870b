//! Client module for the linechat CLI.
//!
//! The client is a single task that:
//! - Connects to the chat server over TCP
//! - Reads operator lines from the terminal and forwards them
//! - Prints server messages as complete lines arrive

pub mod console;
pub mod session;
pub mod socket;

pub use session::{Session, SessionEnd};
pub use socket::connect;
