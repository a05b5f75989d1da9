#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::similar_names)]

pub mod credentials;
pub mod error;
pub mod provision;
pub mod services;
pub mod session;
pub mod token;
pub mod two_factor;

pub use crate::credentials::*;
pub use crate::error::*;
pub use crate::provision::*;
pub use crate::services::*;
pub use crate::session::*;
pub use crate::token::*;
pub use crate::two_factor::*;
