//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.x side of the server: decoding requests
//! out of a connection's read buffer, routing them, and encoding responses.
//! Nothing here performs I/O on its own; the worker tasks in
//! [`crate::server::connection`] feed bytes in and write bytes out.
//!
//! # Architecture
//!
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`request`**: HTTP request representation and parsing utilities
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes responses (and requests) and writes them to non-blocking sockets
//! - **`router`**: Exact-path, method-agnostic routing table
//! - **`handlers`**: The static, login, dashboard and upgrade handlers
//! - **`static_files`**: URL to file mapping under the document root
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Exchange flow
//!
//! ```text
//!   bytes ──► parser ──► Request ──► router ──► handler ──► Response ──► writer ──► bytes
//!                │                     │
//!                └─ ParseError (400)   └─ RouteError (404)
//! ```

pub mod request;
pub mod response;
pub mod parser;
pub mod writer;
pub mod router;
pub mod handlers;
pub mod static_files;
pub mod mime;
