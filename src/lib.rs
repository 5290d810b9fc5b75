//! ferric — an RFC 1459/2812-subset IRC relay server.
//!
//! Clients connect over plain TCP, authenticate with `PASS`, pick a
//! nickname and username, then join `#`-channels to exchange messages.
//! The server is a single process: one tokio task per connection plus a
//! shared registry of sessions and channels.

pub mod config;
pub mod connection;
pub mod irc;
pub mod server;
