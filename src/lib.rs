//! Snapfile: a message-driven image filing bot.
//!
//! Inbound plain-text messages name a target folder; subsequent images from
//! the same sender are filed under that folder on local storage. A small web
//! dashboard shows the pairing QR code, a live log stream, and the saved
//! image gallery.

pub mod client;
pub mod config;
pub mod events;
pub mod filing;
pub mod gateway;
pub mod logging;
pub mod qr;
pub mod runtime;
pub mod store;
