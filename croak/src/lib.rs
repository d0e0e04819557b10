//! `croak` is an asynchronous CoAP (RFC7252) runtime over UDP:
//! a server, a client, and the per-peer session engine they share.
//!
//! ## Shape
//! One datagram socket serves any number of peers. Each peer gets a
//! [`Session`] owning all the state the protocol hangs off message
//! ids and tokens:
//! - the confirmable-message reliability layer (retransmission with
//!   jittered exponential backoff, duplicate detection with
//!   acknowledgement replay, NSTART gating),
//! - the token-indexed table of in-flight requests,
//! - the block-wise transfer engine (RFC7959),
//! - the observation registry (RFC7641).
//!
//! [`Server::serve`] reads datagrams and routes them to sessions;
//! [`Client::dial`] is a session with its own socket and verb-shaped
//! helpers on top.
//!
//! ## Handlers
//! Application code is a single capability: given a
//! [`ResponseWriter`] and a request, populate the writer (or don't;
//! silence means "no response", and the No-Response option is honored
//! either way). Whether the answer rides piggybacked on the ACK or as
//! a separate exchange is the session's problem, not yours.
//!
//! ```no_run
//! use croak::{Code, Config, Server};
//!
//! # async fn run() -> Result<(), croak::Error> {
//! let server = Server::new(Config::default())
//!   .handler(|mut w: croak::ResponseWriter, req: croak::Addrd<croak::Message>| async move {
//!     match req.data().path().as_str() {
//!       | "hello" => w.set_response(Code::CONTENT, b"hi there".to_vec()),
//!       | _ => w.set_response(Code::NOT_FOUND, Vec::new()),
//!     }
//!   });
//!
//! let sock = tokio::net::UdpSocket::bind("0.0.0.0:5683").await.unwrap();
//! server.serve(sock).await
//! # }
//! ```

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]

mod block;
mod dedup;
mod ids;
mod pending;
mod pool;

/// requests & responses from the application's side
pub mod handler;

/// talking to one peer
pub mod client;

/// runtime knobs
pub mod config;

/// error taxonomy
pub mod error;

/// addressed data
pub mod net;

/// RFC7641 observation machinery
pub mod observe;

/// customizable retrying of fallible operations
pub mod retry;

/// one datagram socket, many peers
pub mod server;

/// per-peer protocol state
pub mod session;

pub use client::{Client, Observation};
pub use config::Config;
/// The wire-level message types, re-exported from [`croak_msg`]
pub use croak_msg::{known, Code, CodeKind, Id, Message, MessageParseError, MessageToBytesError,
                    OptNumber, OptParseError, OptValue, Payload, Token, TryFromBytes,
                    TryIntoBytes, Type, Version};
pub use error::Error;
pub use handler::{Handler, HandlerFuture, ResponseWriter};
pub use net::Addrd;
pub use server::Server;
pub use session::Session;
