//! AES-256-GCM sealing of provider tokens at rest.
//!
//! Sealed blobs use the layout `0x01 | nonce (12 bytes) | ciphertext + tag (16 bytes)`. The
//! key is derived from the configured secret with HKDF-SHA256 so any secret length works.

// crates.io
use aes_gcm::{
	Aes256Gcm, Key, Nonce,
	aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hkdf::Hkdf;
use serde::{Deserializer, Serializer, de::Error as DeError};
use sha2::Sha256;
use zeroize::Zeroizing;
// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::{ConfigError, DecryptionError},
};

const VERSION_SEALED: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = 1 + NONCE_LEN + TAG_LEN;
const KDF_SALT: &[u8] = b"adgrant";

pub(crate) const CIPHER_KEY_INFO: &[u8] = b"adgrant/token-cipher/v1";
pub(crate) const STATE_KEY_INFO: &[u8] = b"adgrant/reauth-state/v1";

/// Opaque encrypted token blob; serialized as standard base64.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedToken(Vec<u8>);
impl SealedToken {
	/// Wraps raw bytes read from storage.
	pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	/// Raw blob bytes.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}
impl Debug for SealedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "SealedToken({} bytes)", self.0.len())
	}
}
impl Serialize for SealedToken {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&STANDARD.encode(&self.0))
	}
}
impl<'de> Deserialize<'de> for SealedToken {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let encoded = String::deserialize(deserializer)?;

		STANDARD.decode(encoded).map(Self).map_err(DeError::custom)
	}
}

/// Seals and opens token strings with a key derived from the configured secret.
#[derive(Clone)]
pub struct TokenCipher {
	cipher: Aes256Gcm,
}
impl TokenCipher {
	/// Derives the cipher key from `secret`.
	pub fn from_secret(secret: &Secret) -> Result<Self, ConfigError> {
		let key = derive_key(secret, CIPHER_KEY_INFO)?;
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));

		Ok(Self { cipher })
	}

	/// Seals a token; `None` or an empty string yields `None`.
	pub fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<SealedToken>, ConfigError> {
		let Some(plaintext) = plaintext.filter(|s| !s.is_empty()) else {
			return Ok(None);
		};
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = self
			.cipher
			.encrypt(&nonce, plaintext.as_bytes())
			.map_err(|_| ConfigError::Encryption)?;
		let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());

		blob.push(VERSION_SEALED);
		blob.extend_from_slice(&nonce);
		blob.extend_from_slice(&ciphertext);

		Ok(Some(SealedToken(blob)))
	}

	/// Opens a sealed token.
	pub fn decrypt(&self, sealed: &SealedToken) -> Result<Secret, DecryptionError> {
		let blob = sealed.as_bytes();

		if blob.is_empty() {
			return Err(DecryptionError::Empty);
		}
		if blob[0] != VERSION_SEALED || blob.len() < MIN_SEALED_LEN {
			return Err(DecryptionError::Malformed);
		}

		let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
		let plaintext = Zeroizing::new(
			self.cipher
				.decrypt(Nonce::from_slice(nonce), ciphertext)
				.map_err(|_| DecryptionError::Authentication)?,
		);
		let text = std::str::from_utf8(&plaintext).map_err(|_| DecryptionError::Encoding)?;

		Ok(Secret::new(text))
	}
}
impl Debug for TokenCipher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenCipher(<redacted>)")
	}
}

/// HKDF-SHA256 expansion of the configured secret into a 256-bit key for `info`.
pub(crate) fn derive_key(secret: &Secret, info: &[u8]) -> Result<Zeroizing<[u8; 32]>, ConfigError> {
	if secret.is_empty() {
		return Err(ConfigError::EmptySecret);
	}

	let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.expose().as_bytes());
	let mut okm = Zeroizing::new([0_u8; 32]);

	hk.expand(info, okm.as_mut_slice()).map_err(|_| ConfigError::EmptySecret)?;

	Ok(okm)
}
