pub mod archive;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod generators;
pub mod http;
pub mod installer;
pub mod legacy;
pub mod lockfile;
pub mod manager;
pub mod metadata;
pub mod runtime;
pub mod source;
pub mod version;
