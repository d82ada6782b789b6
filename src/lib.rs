//! Relay - event-driven HTTP and WebSocket server
//!
//! A single `epoll` reactor thread multiplexes every socket and hands protocol
//! work to a small pool of worker threads.

pub mod config;
pub mod http;
pub mod server;
pub mod websocket;
