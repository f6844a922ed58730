//! # Telerun
//!
//! The runtime of the tele remote-object protocol. A client process
//! manipulates objects living inside a separate, long-running host
//! application as if they were local: every attribute access, item
//! access, call, and introspection is shipped across a socket, executed
//! inside the host, and the result (or the captured error) shipped back.
//!
//! The pieces, leaves first: [`transport`] moves one request and one
//! reply per connection; [`table`] gives non-primitive results a stable
//! identity; [`dispatch`] interprets decoded requests against the host;
//! [`server`] runs the sequential accept loop; [`client`] and [`proxy`]
//! make a remote identity feel local; [`manager`] spawns and supervises a
//! private host process.

pub mod client;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod host;
pub mod manager;
pub mod mock;
pub mod proxy;
pub mod server;
pub mod table;
pub mod transport;
