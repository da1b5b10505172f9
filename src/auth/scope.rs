//! Granted-scope modeling for connections.

// std
use std::collections::BTreeSet;
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace or delimiter characters.
	#[error("Scope contains a delimiter character: {scope}.")]
	ContainsDelimiter {
		/// The offending scope string.
		scope: String,
	},
}

/// Ordered, deduplicated set of granted scopes.
///
/// Scopes are sorted so equality does not depend on the order a provider reported them in.
/// Serialized as a JSON array.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for scope in scopes {
			let owned: String = scope.into();

			if owned.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if owned.chars().any(|c| c.is_whitespace() || c == ',') {
				return Err(ScopeValidationError::ContainsDelimiter { scope: owned });
			}

			set.insert(owned);
		}

		Ok(Self(Arc::from(set.into_iter().collect::<Vec<_>>())))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(|s| s.as_str())
	}

	/// Joins the scopes with the provider delimiter.
	pub fn join(&self, delimiter: char) -> String {
		self.0.join(delimiter.encode_utf8(&mut [0; 4]))
	}

	/// Returns the entries of `required` that this set does not contain.
	pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
		required.iter().copied().filter(|scope| !self.contains(scope)).collect()
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.join(' '))
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.0.len()))?;

		for scope in self.0.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_sort_and_dedupe() {
		let lhs = ScopeSet::new(["public_profile", "email", "email"])
			.expect("Left-hand scope set should be valid.");
		let rhs = ScopeSet::new(["email", "public_profile"])
			.expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.join(','), "email,public_profile");
		assert_eq!(lhs.to_string(), "email public_profile");
	}

	#[test]
	fn invalid_scopes_error() {
		assert_eq!(ScopeSet::new([""]), Err(ScopeValidationError::Empty));
		assert!(ScopeSet::new(["contains space"]).is_err());
		assert!(ScopeSet::new(["a,b"]).is_err());
	}

	#[test]
	fn missing_lists_required_scopes_not_granted() {
		let scopes = ScopeSet::new(["pages_show_list", "ads_read"])
			.expect("Scope fixture should be valid.");

		assert_eq!(scopes.iter().collect::<Vec<_>>(), vec!["ads_read", "pages_show_list"]);
		assert!(scopes.contains("ads_read"));
		assert_eq!(scopes.missing(&["ads_read", "read_insights"]), vec!["read_insights"]);
	}

	#[test]
	fn serde_uses_sequences() {
		let scopes = ScopeSet::new(["b", "a"]).expect("Scope fixture should be valid.");
		let json = serde_json::to_string(&scopes).expect("Scope set should serialize.");

		assert_eq!(json, "[\"a\",\"b\"]");
		assert!(serde_json::from_str::<ScopeSet>("[\"\"]").is_err());
	}
}
