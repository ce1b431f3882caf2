//! `dbtest-core`: disposable MySQL databases for test suites.
//!
//! Two independent capabilities:
//!
//! - [`LocalMySql`]: launch and tear down a private `mysqld` bound to its own
//!   data directory and Unix socket.
//! - [`Provisioner`]: create a uniquely-named, suffix-checked schema on an
//!   already-running server, schedule its self-destruct, and load SQL
//!   fixture files into it.
//!
//! Both bottom out in the sequential [`Runner`] / subprocess helpers. Nothing
//! here is meant for production use.
//!
//! ```rust,ignore
//! use dbtest_core::{make_database_name, ConnectionConfig, ProvisionOptions, Provisioner};
//!
//! let mut config = ConnectionConfig {
//!     database: Some(make_database_name(Some("myapp"), None, None)),
//!     ..Default::default()
//! };
//! Provisioner::new(ProvisionOptions::default())
//!     .create_test_db(&mut config, &["schema.sql", "corpus.sql"])
//!     .await?;
//! ```

pub mod config;
pub mod daemon;
pub mod duration;
pub mod error;
pub mod exit_guard;
pub mod fixture;
pub mod local;
pub mod name;
pub mod paths;
pub mod provision;
pub mod runner;

pub use config::{ConnectionConfig, LocalOptions, ProvisionOptions, SelfDestruct, Settings};
pub use error::{DbTestError, Result};
pub use local::LocalMySql;
pub use name::make_database_name;
pub use provision::{Provisioner, Stage};
pub use runner::{Runner, Step, StepMode};
