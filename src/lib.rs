//! Vector index and similarity search over construction-site hazard templates.
//!
//! A record producer turns site photos into JSON records holding a factual
//! description, a warning caption template, hazard tags and the source image
//! name. This crate embeds each description, stores the records in a named
//! collection, builds an approximate nearest-neighbor index over the vectors,
//! and answers "which known hazard situation is closest to this text?".
//!
//! # Lifecycle
//!
//! A collection moves through `Created → Populated → Indexed → Loaded` and is
//! only searchable once loaded. Every rebuild drops the collection and starts
//! over; the index is trained once, after the bulk insert.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`embedding`]: Text-to-vector embedding via ONNX Runtime
//! - [`store`]: Embedded vector store: schema, collections, IVF index, search
//! - [`pipeline`]: Record scanning, filtering, embedding and the full rebuild
//! - [`error`]: Error taxonomy shared by the library modules

pub mod config;
pub mod embedding;
pub mod error;
pub mod pipeline;
pub mod store;

pub use error::{IndexError, Result};
