//! voxbind Library
//!
//! Grammar compilation and recognition-session orchestration for voice
//! controlled games.

pub mod audio;
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod grammar;
pub mod host;
pub mod provider;
pub mod session;
