//! Bridge between diagram editor panels and a GLSP server.
//!
//! Editor panels connect through [`ws`], their messages run through the
//! [`connector`] pipeline and reach the backend through a
//! [`client::MultiplexClient`], which lets collaboration guests share the
//! host's backend session for each document.

pub mod client;
pub mod collab;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod models;
pub mod session;
pub mod ws;

mod utils;

#[cfg(test)]
mod test_support;
