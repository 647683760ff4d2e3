//! filedepot - streaming multipart upload gateway for a content-addressed
//! file repository
//!
//! Requests are parsed incrementally as body chunks arrive: the file part
//! is spooled to disk, form fields are collected, and per-upload progress
//! is observable through a JSONP polling endpoint while the transfer runs.
//! Completed files are handed to the repository backend over RPC.

pub mod api;
pub mod config;
pub mod multipart;
pub mod naming;
pub mod progress;
pub mod repo;
pub mod rpc;
pub mod session;
pub mod spool;
