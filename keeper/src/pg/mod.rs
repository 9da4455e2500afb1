//! The local PostgreSQL instance, treated as an opaque supervised process
//! plus a handful of on-disk artefacts (§4.2 "Local-DB Controller").

pub mod control_file;
pub mod controller;
pub mod error;
