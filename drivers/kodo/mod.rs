//! Qiniu Kodo driver / 七牛云Kodo驱动
//!
//! Connection URL: `kodo://<access_key>[:<secret_key>]@<bucket>?<options>`

pub mod attributes;
pub mod auth;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod factory;
pub mod listing;
pub mod region;
pub mod signer;
pub mod types;
pub mod upload;
pub mod util;
pub mod writer;

#[cfg(test)]
pub(crate) mod mock_server;

pub use config::KodoConfig;
pub use driver::{Collaborators, KodoBucket, KodoReader};
pub use error::KodoError;
pub use factory::KodoBucketOpener;
pub use writer::KodoWriter;
