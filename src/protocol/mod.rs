//! # Protocol Layer
//!
//! Everything between a decoded [`Packet`](crate::core::packet::Packet) and a
//! backend call.
//!
//! - [`service`]: the catalog of service ids and their privilege class
//! - [`message`]: payload layouts
//! - [`handshake`]: control digest computation and verification
//! - [`authority`]: sessions and the single controller
//! - [`dispatcher`]: the command router

pub mod authority;
pub mod dispatcher;
mod handlers;
pub mod handshake;
pub mod message;
pub mod service;

#[cfg(test)]
mod tests;
