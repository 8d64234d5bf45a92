//! Sans-IO HTTP/1.1 codec shared by the h1pipe client.
//!
//! This crate owns the byte-level half of the protocol and never touches a
//! socket or a timer. The connection manager in `h1pipe-client` feeds it
//! bytes and drives it through events.
//!
//! ## Modules
//!
//! - `error`: Codec error type
//! - `method`: Method classification (payload, idempotency, reset)
//! - `encode`: Request head serialization and body framing
//! - `parser`: Incremental response parser
//! - `keep_alive`: `keep-alive: timeout=N` negotiation

mod encode;
mod error;
mod keep_alive;
mod method;
mod parser;

pub use encode::*;
pub use error::*;
pub use keep_alive::*;
pub use method::*;
pub use parser::*;
