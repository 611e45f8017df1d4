//! Common utilities and types shared across replikv

pub mod config;
pub mod error;
pub mod form;
pub mod hash;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use hash::{fnv1a_64, owner_weight};
pub use utils::{new_post_id, now_ms};
