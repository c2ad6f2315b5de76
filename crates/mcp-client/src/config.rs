//! Worker configuration types, re-exported from `tw-domain`.
//!
//! The definitions live in `tw_domain::config` so the driver's config file
//! loader can include them without depending on this crate.

pub use tw_domain::config::WorkerConfig;
