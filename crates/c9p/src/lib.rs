#![forbid(unsafe_code)]
//! Asynchronous 9P2000 filesystem client library for Rust.
//!
//! This crate provides a tokio-based async implementation of the classic
//! 9P2000 protocol from the client side, allowing you to talk to Plan 9
//! style file servers over TCP or Unix domain sockets.
//!
//! # Overview
//!
//! The 9P protocol was originally developed for the Plan 9 distributed
//! operating system. Every interaction with a server is a tagged
//! transaction: the client sends a T-message, the server answers with the
//! matching R-message (or `Rerror`). Files and directories are referred to
//! through fids, 32-bit handles the client allocates and the server binds
//! to objects in its tree.
//!
//! # Getting Started
//!
//! To talk to a 9P server, you need to:
//!
//! 1. Connect a transport with [`client::dial`] (or bring your own
//!    `AsyncRead`/`AsyncWrite` pair)
//! 2. Bootstrap a [`client::Session`] with [`client::Session::attach`],
//!    which negotiates the version and attaches to the served tree
//! 3. Walk fids to the files you care about and operate on them
//!
//! # Example
//!
//! ```no_run
//! use c9p::{client, fcall::om, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (reader, writer) = client::dial("tcp!127.0.0.1!564").await?;
//!     let mut session = client::Session::attach(reader, writer, "glenda", "/").await?;
//!
//!     let root = session.root();
//!     let (fid, _qid) = session.walk(root, "usr/glenda/lib/profile").await?;
//!     let (_qid, iounit) = session.open(fid, om::READ).await?;
//!     let data = session.read_to_end(fid, iounit).await?;
//!     println!("{}", String::from_utf8_lossy(&data));
//!
//!     session.clunk(fid).await?;
//!     session.detach().await;
//!     Ok(())
//! }
//! ```
//!
//! # Protocol Details
//!
//! ## Message Flow
//!
//! 1. **Version Negotiation**: `Tversion` under `NOTAG`; any answer other
//!    than `9P2000` is fatal, and the effective message size is the minimum
//!    of both sides' proposals
//! 2. **Attach**: `Tattach` binds the root fid to the served tree (the auth
//!    sub-protocol is not spoken; `afid` is always `NOFID`)
//! 3. **Operations**: `walk`, `open`, `read`, `write`, `stat`, and friends
//! 4. **Cleanup**: every fid is clunked exactly once; session teardown
//!    releases stragglers
//!
//! ## Fid Management
//!
//! Fids are allocated from a counter that never reuses a value within a
//! session, and the live set is tracked so teardown can release whatever is
//! still bound.
//!
//! **Important invariants:**
//! - Each fid is released exactly once (`Tremove` releases implicitly)
//! - A failed walk leaves no fid bound
//! - No read or write payload ever exceeds the negotiated message size
//!   minus the I/O header
//!
//! # Error Handling
//!
//! Every operation returns [`Result`]. A server-side refusal arrives as
//! [`Error::Server`] carrying the server's message verbatim; protocol
//! violations and transport failures have their own variants. No transaction
//! is ever retried.
//!
//! # Transport
//!
//! The library supports multiple transports:
//! - **TCP**: `"tcp!host!port"` (e.g., `"tcp!127.0.0.1!564"`); the port
//!   defaults to 564
//! - **Unix Domain Sockets**: `"unix!path"` (e.g., `"unix!/tmp/ns/srv"`)
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`) and relies on
//! Rust's type system for memory safety. All operations are async.
pub mod client;
pub mod error;
pub mod fcall;
pub mod serialize;
pub mod trace;
#[macro_use]
pub mod utils;

pub use crate::error::Error;
pub use crate::fcall::*;
pub use crate::utils::Result;
