//! Fetches a GEO dataset archive and flattens its multi-section annotation
//! files into tab-separated tables, one resumable stage at a time.

pub mod archive;
pub mod assemble;
pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod layout;
pub mod lock;
pub mod output;
pub mod pipeline;
pub mod sections;
pub mod table;
