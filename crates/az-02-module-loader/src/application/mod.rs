//! Application layer for the module loader

pub mod service;

pub use service::ModuleLoaderService;
