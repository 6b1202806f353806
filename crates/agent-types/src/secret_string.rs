//! Secure wrapper for signing-key material.
//!
//! Private keys arrive through configuration as hex strings. Wrapping them in
//! [`SecretString`] zeroes the memory on drop and keeps the value out of
//! `Debug`/`Display` output and serialized logs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A string whose contents are zeroed on drop and redacted when formatted.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
	/// Wraps an owned string.
	pub fn new(s: String) -> Self {
		Self(Zeroizing::new(s))
	}

	/// Exposes the secret to a closure, limiting the scope where the raw
	/// value is visible.
	pub fn with_exposed<F, R>(&self, f: F) -> R
	where
		F: FnOnce(&str) -> R,
	{
		f(&self.0)
	}

	/// Returns true if the wrapped string is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SecretString(***)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "***")
	}
}

impl From<&str> for SecretString {
	fn from(s: &str) -> Self {
		Self::new(s.to_string())
	}
}

impl PartialEq for SecretString {
	fn eq(&self, other: &Self) -> bool {
		self.0.as_str() == other.0.as_str()
	}
}

impl Eq for SecretString {}

impl Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		// Never write the secret back out.
		serializer.serialize_str("***")
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(SecretString::new(String::deserialize(deserializer)?))
	}
}
