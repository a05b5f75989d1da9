#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod identity;
pub mod key_connector;
pub mod token_decoder;

pub use crate::config::*;
pub use crate::identity::*;
pub use crate::key_connector::*;
pub use crate::token_decoder::*;
