//! # atrium-kb
//!
//! Knowledge base client for atrium.
//!
//! This crate provides:
//! - [`QnaMakerClient`], an HTTP implementation of
//!   [`atrium_core::KnowledgeBase`] for a hosted question-answering service
//!   with separate authoring and runtime endpoints
//! - Wire types and error classification for that service
//! - A scripted in-memory knowledge base (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use atrium_core::{KbQuery, KnowledgeBase};
//! use atrium_kb::QnaMakerClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let kb = QnaMakerClient::from_env().unwrap();
//!     let kb_id = kb.config().kb_id.clone();
//!     let query = KbQuery {
//!         question: "What is the refund policy?".to_string(),
//!         direct_id: None,
//!         top: 3,
//!         score_threshold: 10.0,
//!         filters: vec![],
//!     };
//!     let answers = kb.query(&kb_id, &query).await.unwrap();
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::QnaMakerClient;
pub use config::KbConfig;
pub use error::{to_atrium_error, KbErrorCode};
