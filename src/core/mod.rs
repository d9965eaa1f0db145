// Core module - multiplexer logic
pub mod mux;
