#![forbid(unsafe_code)]
//! Asynchronous SMB2/SMB3 client library for Rust.
//!
//! This crate provides a tokio-based client for the SMB 2.0.2 through 3.1.1
//! dialects. It negotiates with a file server over any byte stream,
//! authenticates through a pluggable [`Initiator`], mounts shares and exposes
//! POSIX-like file operations on them.
//!
//! # Overview
//!
//! A connection carries one reader task that decodes responses and completes
//! outstanding requests by message id, so any number of tasks may issue
//! operations at once. Flow control follows the server's credit grants and
//! every message of a signed session carries a signature.
//!
//! # Getting Started
//!
//! 1. Open a transport yourself, typically a `TcpStream` to port 445
//! 2. Implement [`Initiator`] for your authentication mechanism
//! 3. Dial with a [`Dialer`], then [`Session::mount`] a share
//!
//! # Example
//!
//! ```no_run
//! use smb2::{Dialer, Initiator, Step, Result};
//! use async_trait::async_trait;
//!
//! struct Anonymous;
//!
//! #[async_trait]
//! impl Initiator for Anonymous {
//!     async fn step(&mut self, _input: Option<&[u8]>) -> Result<Step> {
//!         Ok(Step { token: Vec::new(), done: true })
//!     }
//!
//!     fn session_key(&self) -> Option<Vec<u8>> {
//!         None
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let stream = tokio::net::TcpStream::connect("fileserver:445").await?;
//!     let mut dialer = Dialer::new("fileserver", Anonymous);
//!     let session = dialer.dial(stream).await?;
//!
//!     let share = session.mount("public").await?;
//!     share.write_file("hello.txt", b"hello", 0o644).await?;
//!     for entry in share.read_dir("").await? {
//!         println!("{} {}", entry.name, entry.size);
//!     }
//!
//!     share.umount().await?;
//!     session.logoff().await
//! }
//! ```
//!
//! # Error Handling
//!
//! Every failure is an [`Error`]. Server statuses are kept but also mapped
//! onto errno values, so callers can ask [`Error::is_not_found`],
//! [`Error::is_exists`], [`Error::is_permission`] or
//! [`Error::is_unsupported`] without knowing NTSTATUS codes.
//!
//! Common error codes:
//! - `ENOENT` - No such file or share
//! - `EEXIST` - Exclusive create of an existing path
//! - `EACCES` / `EPERM` - Access denied
//! - `EOPNOTSUPP` - The server cannot do this at all, e.g. symbolic links
//! - `EBADF` - Use of a closed file, share or session
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`).
pub mod client;
pub mod config;
pub mod conn;
pub mod credit;
pub mod error;
pub mod file;
pub mod info;
pub mod io;
pub mod negotiate;
pub mod pdu;
pub mod serialize;
pub mod session;
pub mod sign;
pub mod tree;
#[macro_use]
pub mod utils;

pub use crate::client::Dialer;
pub use crate::config::ClientConfig;
pub use crate::conn::{Conn, NegotiatedParameters};
pub use crate::error::{errno, Error, ErrorClass};
pub use crate::file::File;
pub use crate::info::{FileStat, StatFs};
pub use crate::negotiate::Negotiator;
pub use crate::pdu::Dialect;
pub use crate::session::{Initiator, Session, Step};
pub use crate::tree::Share;
pub use crate::utils::Result;
