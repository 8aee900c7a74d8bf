pub mod config;
pub mod import;
pub mod info;
pub mod register;
