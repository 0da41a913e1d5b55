#![forbid(unsafe_code)]

//! Room access checks. Only digests are ever stored or compared.

use std::fmt::Write as _;

use parlor_domain::{BrokerError, Room};
use sha2::{Digest, Sha256};

/// Digest stored for a new room: the trimmed password, or `None` when blank.
pub fn hash_password(plain: &str) -> Option<String> {
	let plain = plain.trim();
	(!plain.is_empty()).then(|| digest_hex(plain))
}

fn digest_hex(plain: &str) -> String {
	let digest = Sha256::digest(plain.as_bytes());
	let mut out = String::with_capacity(digest.len() * 2);
	for b in digest {
		let _ = write!(out, "{b:02x}");
	}
	out
}

/// The supplied password is hashed exactly as sent; only creation trims.
pub fn check_password(room: &Room, supplied: Option<&str>) -> Result<(), BrokerError> {
	let Some(expected) = room.password_hash.as_deref() else {
		return Ok(());
	};

	let supplied = supplied.unwrap_or_default();
	if supplied.is_empty() {
		return Err(BrokerError::PasswordRequired);
	}

	if digest_hex(supplied) == expected {
		Ok(())
	} else {
		Err(BrokerError::InvalidPassword)
	}
}

/// Must run before membership is mutated.
pub fn check_capacity(room: &Room, current_size: usize) -> Result<(), BrokerError> {
	if current_size >= room.max_users as usize {
		return Err(BrokerError::RoomFull);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use parlor_domain::{RoomName, RoomSpec};

	fn room(password: Option<&str>, max_users: u32) -> Room {
		let spec = RoomSpec {
			max_users: Some(max_users),
			..RoomSpec::named("vault")
		};
		Room::from_spec(
			RoomName::new("vault").expect("name"),
			&spec,
			password.and_then(hash_password),
			0,
		)
	}

	#[test]
	fn digest_is_lowercase_hex_sha256() {
		assert_eq!(
			hash_password("secret").as_deref(),
			Some("2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b")
		);
		assert_eq!(hash_password("  secret "), hash_password("secret"));
		assert_eq!(hash_password("   "), None);
	}

	#[test]
	fn password_scenarios() {
		let vault = room(Some("secret"), 10);
		assert_eq!(check_password(&vault, None), Err(BrokerError::PasswordRequired));
		assert_eq!(check_password(&vault, Some("")), Err(BrokerError::PasswordRequired));
		assert_eq!(check_password(&vault, Some("wrong")), Err(BrokerError::InvalidPassword));
		assert_eq!(check_password(&vault, Some("secret")), Ok(()));

		let open = room(None, 10);
		assert_eq!(check_password(&open, Some("anything")), Ok(()));
	}

	#[test]
	fn only_creation_trims() {
		let vault = room(Some("  secret "), 10);
		assert_eq!(check_password(&vault, Some("secret")), Ok(()));
		assert_eq!(check_password(&vault, Some(" secret ")), Err(BrokerError::InvalidPassword));
		assert_eq!(check_password(&vault, Some("  ")), Err(BrokerError::InvalidPassword));
	}

	#[test]
	fn capacity_is_exclusive_upper_bound() {
		let small = room(None, 1);
		assert_eq!(check_capacity(&small, 0), Ok(()));
		assert_eq!(check_capacity(&small, 1), Err(BrokerError::RoomFull));
	}
}
