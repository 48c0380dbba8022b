//! # sfctl - cluster control for clustered block storage
//!
//! sfctl drives a storage cluster through its JSON-RPC management API and,
//! where the API is not enough, through SSH to the nodes. It is both a
//! library and a command-line tool: every subcommand of the `sfctl` binary is
//! an [`Action`](action::Action) built on the library's cluster model.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  cli          clap subcommands, one Action each           │
//! ├──────────────────────────────────────────────────────────┤
//! │  action       validate, execute, report, publish result   │
//! ├──────────────────────────────────────────────────────────┤
//! │  cluster      accounts, volumes, groups, drives, nodes    │
//! │  events       GC reconstruction, sync detection           │
//! ├──────────────────────────────────────────────────────────┤
//! │  api          typed client over a retrying transport      │
//! │  connection   SSH and local command execution             │
//! │  executor     bounded fan-out of independent tasks        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sfctl::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(Config::default());
//!     let cluster = Cluster::connect("10.1.1.1", "admin", "password", config)?;
//!     let search = VolumeSearch { prefix: Some("data".into()), ..Default::default() };
//!     for volume in cluster.search_volumes(&search).await? {
//!         println!("{}", volume);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Commonly used types.
pub mod prelude {
    pub use crate::action::{Action, ActionContext, ActionRunner, OutputFormat, QueryAction};
    pub use crate::api::{ApiClient, ApiVersion, Transport};
    pub use crate::cluster::{Cluster, ClusterNode, Outcome, VolumeSearch};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::events::{GcInfo, SyncKind};
    pub use crate::executor::{PoolReport, TaskPool};
    pub use crate::validate::NameOrId;
}

pub mod action;
pub mod api;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod executor;
pub mod logging;
pub mod retry;
pub mod util;
pub mod validate;

pub use error::{Error, Result};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
