#![allow(dead_code, clippy::unwrap_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chrono::Utc;
use lw_registration::{ObserveRequest, Registration, RegistrationEvent, ResourcePath, Token};

pub fn address(port: u16) -> SocketAddr {
	SocketAddr::from(([10, 0, 0, 1], port))
}

pub fn registration(id: &str, endpoint: &str, port: u16) -> Registration {
	Registration::builder(id, endpoint, address(port)).build()
}

/// A registration whose lifetime ran out `ago` past its `lifetime`.
pub fn stale_registration(
	id: &str,
	endpoint: &str,
	lifetime: Duration,
	ago: Duration,
) -> Registration {
	let last_update = Utc::now() - chrono::Duration::from_std(lifetime + ago).unwrap();

	Registration::builder(id, endpoint, address(5683))
		.lifetime(lifetime)
		.last_update(last_update)
		.build()
}

pub fn token(byte: u8) -> Token {
	Token::new(&[byte]).unwrap()
}

pub fn observe(token_byte: u8, registration_id: &str, path: &str) -> ObserveRequest {
	ObserveRequest::new(
		token(token_byte),
		&registration_id.into(),
		path.parse::<ResourcePath>().unwrap(),
	)
}

pub fn drain(rx: &async_channel::Receiver<RegistrationEvent>) -> Vec<RegistrationEvent> {
	std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

pub fn endpoint_of(event: &RegistrationEvent) -> &str {
	event.registration().endpoint()
}

pub fn same(a: &Arc<Registration>, b: &Arc<Registration>) -> bool {
	Arc::ptr_eq(a, b)
}
