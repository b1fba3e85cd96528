//! Connection management for the gatehouse RPC.
//!
//! Four pieces, client side first:
//!
//! - [`stream::MsgStream`] — one framed message stream over one connection,
//!   with a per-read deadline.
//! - [`pool::StreamPool`] — a bounded set of idle streams shared by many
//!   callers, probed for staleness in the background.
//! - [`client::Client`] — one method per request kind; acquires a stream,
//!   does one exchange, restores the stream (or discards it on error).
//! - [`server::Server`] — accept loop plus a tag-to-handler dispatch table;
//!   one worker task per connection, serial requests within a connection.

pub mod client;
pub mod pool;
pub mod server;
pub mod stream;

pub use client::{Client, ClientError};
pub use pool::{PoolError, StreamPool};
pub use server::{DispatchError, Dispatcher, Handler, Server};
pub use stream::{MsgStream, StreamError};
