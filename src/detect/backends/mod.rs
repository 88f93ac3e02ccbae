pub mod noop;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use noop::NoopBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
