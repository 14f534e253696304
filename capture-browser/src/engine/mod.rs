//! Engine module - browser, page and capture session plumbing

pub mod browser;
pub mod network;
pub mod page;
pub mod session;
