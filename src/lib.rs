//! OAuth connection and token lifecycle manager for advertising-platform integrations.
//!
//! The crate keeps already-issued provider credentials (Google Analytics 4, Google Ads,
//! Facebook Marketing) healthy: tokens are sealed at rest, refreshed lazily under a
//! per-connection singleflight guard, failures are classified and counted, and connections
//! that can no longer refresh on their own escalate to a signed re-authorization URL.
//!
//! [`manager::ConnectionManager`] is the entry point; everything else is a building block it
//! wires together.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

macro_rules! trace_event {
	($level:ident, $($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		::tracing::$level!($($arg)+);
	};
}

pub mod auth;
pub mod cipher;
pub mod clock;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod expiry;
pub mod failure;
pub mod http;
pub mod manager;
pub mod obs;
pub mod provider;
pub mod reauth;
pub mod store;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {httpmock as _, tokio as _};
