//! Saltymirror - mirror a directory tree into a passphrase-encrypted copy

#![forbid(unsafe_code)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod file_ops;
pub mod mirror;
pub mod passphrase;
pub mod path_map;
pub mod report;
pub mod secretcrypt;
pub mod walker;
