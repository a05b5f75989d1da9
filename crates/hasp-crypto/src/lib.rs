#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::similar_names)]

pub mod kdf;
pub mod keys;

pub use crate::kdf::*;
pub use crate::keys::*;
