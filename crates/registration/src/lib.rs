//!
//! # Registration Store
//!
//! Server side session state for constrained-device management: which devices are registered right now,
//! which of their resources are being observed, and who needs to hear about it when that changes.
//!
//! The crate is built around a few pieces:
//! - [`RegistrationStore`], the authoritative map from endpoint name to the device's current
//!   [`Registration`], with an embedded observation index kept consistent under a single lock;
//! - [`EventDispatcher`], which fans lifecycle events out to a dynamic set of listeners, isolating
//!   each listener's failures from the others and from the store;
//! - [`ExpirationSweeper`], a background task evicting registrations whose lifetime has elapsed;
//! - [`RegistrationService`], gluing a store to a dispatcher so every mutation produces its event.
//!
//! ## Basic example
//!
//! ```
//! use std::sync::Arc;
//!
//! use lw_registration::{
//! 	InMemoryRegistrationStore, Registration, RegistrationEvent, RegistrationService,
//! 	RegistrationStore,
//! };
//!
//! let store = Arc::new(InMemoryRegistrationStore::new());
//! let service = RegistrationService::new(Arc::clone(&store) as Arc<dyn RegistrationStore>);
//!
//! let (listener, events_rx) = lw_registration::ChannelListener::unbounded("example");
//! service.add_listener(Arc::new(listener));
//!
//! let registration = Registration::builder("r1", "dev1", "127.0.0.1:5683".parse().unwrap()).build();
//!
//! assert!(service.register(registration).unwrap().is_none());
//! assert!(matches!(
//! 	events_rx.try_recv(),
//! 	Ok(RegistrationEvent::Registered { previous: None, .. })
//! ));
//! assert!(store.get_by_endpoint("dev1").unwrap().is_some());
//! ```

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
mod event;
mod index;
mod observation;
mod registration;
mod service;
mod store;
mod sweeper;

pub use error::{ListenerError, StoreError};
pub use event::{
	ChannelListener, DispatchReport, EventDispatcher, FnListener, ListenerId, LogListener,
	RegistrationEvent, RegistrationListener,
};
pub use observation::{
	Observation, ObservationContext, ObserveRequest, PathError, ResourcePath, Token, TokenError,
	CTX_PATH, CTX_REGISTRATION_ID, TOKEN_MAX_LEN,
};
pub use registration::{
	BindingError, BindingMode, Deregistration, Link, LinkError, Registration, RegistrationBuilder,
	RegistrationId, RegistrationUpdate, UpdatedRegistration, DEFAULT_GRACE_PERIOD,
	DEFAULT_LIFETIME,
};
pub use service::RegistrationService;
pub use store::{InMemoryRegistrationStore, RegistrationStore};
pub use sweeper::{
	ExpirationSweeper, StopOutcome, SweepReport, SweeperConfig, SweeperState,
	DEFAULT_STOP_TIMEOUT, DEFAULT_SWEEP_PERIOD,
};
