use std::{sync::Arc, thread};

use lw_registration::{InMemoryRegistrationStore, RegistrationStore, RegistrationUpdate};

mod common;

use common::{observe, registration};

const WRITERS: u16 = 16;
const READERS: usize = 4;

#[test]
fn concurrent_registers_and_readers() {
	let store = InMemoryRegistrationStore::new();

	thread::scope(|s| {
		for i in 0..WRITERS {
			let store = &store;
			s.spawn(move || {
				let id = format!("r{i}");
				store
					.register(Arc::new(registration(&id, &format!("dev{i}"), 5000 + i)))
					.unwrap();
				store
					.add_observation(observe(u8::try_from(i).unwrap(), &id, "/3/0/1"))
					.unwrap();
				store.update(RegistrationUpdate::new(id.as_str())).unwrap();
			});
		}

		for _ in 0..READERS {
			let store = &store;
			s.spawn(move || {
				for _ in 0..200 {
					for registration in store.all_registrations().unwrap() {
						// Lookups by any key always land on a consistent registration
						if let Some(by_id) = store.get_by_id(registration.id()).unwrap() {
							assert_eq!(by_id.endpoint(), registration.endpoint());
						}
						for observation in store.get_observations(registration.id()).unwrap() {
							assert_eq!(&observation.registration_id, registration.id());
						}
					}
				}
			});
		}
	});

	assert_eq!(store.len(), usize::from(WRITERS));
	assert_eq!(store.observation_count(), usize::from(WRITERS));

	for i in 0..WRITERS {
		let registration = store.get_by_endpoint(&format!("dev{i}")).unwrap().unwrap();
		assert_eq!(registration.id().as_str(), format!("r{i}"));
		assert_eq!(registration.address().port(), 5000 + i);
		assert_eq!(store.get_observations(registration.id()).unwrap().len(), 1);
	}
}

#[test]
fn racing_replacements_leave_a_single_registration() {
	let store = InMemoryRegistrationStore::new();

	thread::scope(|s| {
		for i in 0..WRITERS {
			let store = &store;
			s.spawn(move || {
				store
					.register(Arc::new(registration(&format!("r{i}"), "dev", 5000 + i)))
					.unwrap();
			});
		}
	});

	let registrations = store.all_registrations().unwrap();
	assert_eq!(registrations.len(), 1);

	let survivor = &registrations[0];
	assert!(Arc::ptr_eq(
		&store.get_by_id(survivor.id()).unwrap().unwrap(),
		survivor
	));
	assert!(Arc::ptr_eq(
		&store.get_by_address(&survivor.address()).unwrap().unwrap(),
		survivor
	));
}
