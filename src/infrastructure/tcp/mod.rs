// TCP module - Listening socket and interactive client
pub mod client;
pub mod listener;

pub use client::{Detach, MuxClient};
pub use listener::bind_listener;
