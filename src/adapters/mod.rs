//! Adapters: the filesystem, the ffmpeg engine and the HTTP surface.

pub mod ffmpeg;
pub mod fs;
pub mod http;
