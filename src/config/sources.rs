//! Configuration sources

pub mod environment;
pub mod site_file;
