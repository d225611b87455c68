//!
//! # Security directory
//!
//! Per-device security entries and the credential lookups a DTLS handshake needs from them: the
//! pre-shared key matching an identity, and the identity to use when the server itself initiates
//! a handshake towards a registered device.
//!
//! Key material is only stored and handed out here; nothing in this crate performs cryptography.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod info;
mod resolver;
mod store;

pub use error::SecurityError;
pub use info::{Secret, SecurityInfo, SecurityMaterial};
pub use resolver::CredentialResolver;
pub use store::{InMemorySecurityStore, SecurityStore};
