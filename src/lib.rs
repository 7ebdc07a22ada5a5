//! # DocDB Driver
//!
//! Connection-level protocol engine for a MongoDB-compatible document database.
//!
//! ## Features
//!
//! - **Wire Protocol** - OP_MSG and legacy OP_QUERY requests, OP_MSG and OP_REPLY replies
//! - **Compression** - OP_COMPRESSED envelopes with zlib and zstd
//! - **Pipelining** - Many in-flight commands per connection, matched by request id
//! - **Exhaust Replies** - Server-streamed `moreToCome` replies as callbacks or a `Stream`
//! - **Monitoring** - Typed command and connection events over a broadcast channel
//! - **Async/Await** - Built on Tokio; one read task per connection
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use docdb_driver::{CommandOptions, Connection, ConnectionConfig, DestroyOptions, HelloReply};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::builder("localhost:27017").id(1).build()?;
//!     let connection = Connection::connect(config).await?;
//!
//!     // Handshake
//!     let reply = connection
//!         .command("admin", &doc! { "hello": 1 }, CommandOptions::new())
//!         .await?;
//!     connection.record_hello(HelloReply::parse(reply.document.unwrap_or_default())?)?;
//!
//!     // Run a command
//!     let reply = connection
//!         .command("app.users", &doc! { "find": "users", "filter": {} }, CommandOptions::new())
//!         .await?;
//!     println!("{:?}", reply.document);
//!
//!     connection.destroy(DestroyOptions::default()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`DriverResult`]. A connection-fatal error is handed to
//! every caller still waiting on that connection:
//!
//! ```rust,no_run
//! # use docdb_driver::{CommandOptions, Connection, DriverError};
//! # async fn example(connection: &Connection) {
//! # use bson::doc;
//! match connection.command("admin", &doc! { "ping": 1 }, CommandOptions::new()).await {
//!     Ok(reply) => println!("{:?}", reply.document),
//!     Err(DriverError::NetworkTimeout { message, .. }) => eprintln!("timed out: {}", message),
//!     Err(e) if e.is_network_error() => eprintln!("connection lost: {}", e),
//!     Err(e) => eprintln!("error: {}", e),
//! }
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connection engine, command assembly, events, sessions
//! - [`wire`] - Low-level framing, message codec and compression
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;
pub mod wire;

// Re-exports for convenience
pub use driver::{
    AutoEncrypter, ClientSession, ClusterTime, CommandOptions, CommandReply, Connection,
    ConnectionConfig, ConnectionConfigBuilder, ConnectionEvent, ConnectionId, DestroyOptions,
    DriverError, DriverResult, EncryptedConnection, ExhaustStream, HelloReply, ReadPreference,
    ServerApi, SimpleSession, StreamDescription, WriteConcern,
};

pub use wire::{Compressor, DecodeOptions, DocumentSequence, WireError, WireResult};
