//! Share clipboard text and files across a local network through a small
//! HTTP server and a browser page.

mod assets;
pub mod client;
pub mod files;
pub mod history;
mod messages;
pub mod server;
