use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::error::{AuthError, Result};

/// RSA modulus size fixed by the ADB auth sub-protocol.
pub const KEY_BITS: usize = 2048;

/// Modulus size in 32-bit words, the unit the Android key blob uses.
const MODULUS_WORDS: usize = KEY_BITS / 32;
const MODULUS_BYTES: usize = KEY_BITS / 8;

/// The host's RSA identity.
///
/// Immutable once constructed; a process keeps one pair for its lifetime and
/// never rotates it mid-connection.
#[derive(Clone)]
pub struct AdbKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl AdbKeyPair {
    /// Generate a fresh 2048-bit pair from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|err| AuthError::KeyGenerate(err.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Parse a PKCS#1 PEM private key; the public half is derived.
    pub fn from_pkcs1_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|err| AuthError::KeyLoad(err.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// The private key as PKCS#1 PEM, for persistence.
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self
            .private
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|err| AuthError::KeyGenerate(err.to_string()))?;
        Ok(pem.to_string())
    }

    /// The public key as PKCS#1 PEM.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|err| AuthError::KeyGenerate(err.to_string()))
    }

    /// Sign the device's challenge token.
    ///
    /// The 20-byte token stands in for a SHA-1 digest: the signature is
    /// PKCS#1 v1.5 with the protocol-fixed SHA-1 DigestInfo prefix over the
    /// raw token. Deterministic for a given key and token.
    pub fn sign_token(&self, token: &[u8]) -> Result<Vec<u8>> {
        self.private
            .sign(Pkcs1v15Sign::new::<Sha1>(), token)
            .map_err(|err| AuthError::Sign(err.to_string()))
    }

    /// The peer-consumable public key payload: the base64 of the Android
    /// binary key blob, a space, the key's identity name, and a NUL.
    ///
    /// The device shows `name` in its authorization prompt and stores the
    /// blob in its trusted-keys file once the human approves.
    pub fn public_key_payload(&self, name: &str) -> Vec<u8> {
        let mut payload = BASE64.encode(self.android_pubkey_blob()).into_bytes();
        payload.push(b' ');
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload
    }

    /// The Android RSAPublicKey struct, little-endian:
    /// word count, n0inv, modulus, rr, exponent.
    fn android_pubkey_blob(&self) -> Vec<u8> {
        let n = self.public.n();

        // n0inv = -n^-1 mod 2^32, by Hensel lifting on the low word.
        let n0 = low_word(n);
        let mut inv = n0;
        for _ in 0..5 {
            inv = inv.wrapping_mul(2u32.wrapping_sub(n0.wrapping_mul(inv)));
        }
        let n0inv = inv.wrapping_neg();

        // rr = (2^2048)^2 mod n, the Montgomery conversion constant.
        let rr = (BigUint::from(1u32) << (KEY_BITS * 2)) % n;

        let mut blob = Vec::with_capacity(8 + 2 * MODULUS_BYTES + 4);
        blob.extend_from_slice(&(MODULUS_WORDS as u32).to_le_bytes());
        blob.extend_from_slice(&n0inv.to_le_bytes());
        blob.extend_from_slice(&le_bytes(n, MODULUS_BYTES));
        blob.extend_from_slice(&le_bytes(&rr, MODULUS_BYTES));
        blob.extend_from_slice(&low_word(self.public.e()).to_le_bytes());
        blob
    }

    /// The public half, e.g. for signature verification in tests.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }
}

fn le_bytes(value: &BigUint, len: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    bytes.resize(len, 0);
    bytes
}

fn low_word(value: &BigUint) -> u32 {
    let bytes = le_bytes(value, 4);
    u32::from_le_bytes(bytes[..4].try_into().expect("four bytes"))
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    /// Key generation is expensive; share one pair across tests.
    pub(crate) fn test_key() -> &'static AdbKeyPair {
        static KEY: OnceLock<AdbKeyPair> = OnceLock::new();
        KEY.get_or_init(|| AdbKeyPair::generate().expect("key generation"))
    }

    #[test]
    fn pem_roundtrip_preserves_identity() {
        let key = test_key();
        let pem = key.private_key_pem().unwrap();
        let reloaded = AdbKeyPair::from_pkcs1_pem(&pem).unwrap();
        assert_eq!(reloaded.public_key(), key.public_key());
    }

    #[test]
    fn from_pem_rejects_garbage() {
        assert!(matches!(
            AdbKeyPair::from_pkcs1_pem("not a pem at all"),
            Err(AuthError::KeyLoad(_))
        ));
    }

    #[test]
    fn sign_token_is_deterministic_and_verifiable() {
        let key = test_key();
        let token = [0x42u8; 20];

        let first = key.sign_token(&token).unwrap();
        let second = key.sign_token(&token).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), MODULUS_BYTES);

        key.public_key()
            .verify(Pkcs1v15Sign::new::<Sha1>(), &token, &first)
            .expect("signature verifies with the protocol padding");
    }

    #[test]
    fn sign_token_rejects_wrong_token_length() {
        let key = test_key();
        assert!(key.sign_token(&[0u8; 16]).is_err());
    }

    #[test]
    fn public_key_payload_shape() {
        let key = test_key();
        let payload = key.public_key_payload("host@adblink");

        assert_eq!(payload.last(), Some(&0u8), "payload is NUL-terminated");
        let text = std::str::from_utf8(&payload[..payload.len() - 1]).unwrap();
        let (blob_b64, name) = text.split_once(' ').unwrap();
        assert_eq!(name, "host@adblink");

        let blob = BASE64.decode(blob_b64).unwrap();
        assert_eq!(blob.len(), 8 + 2 * MODULUS_BYTES + 4);

        let words = u32::from_le_bytes(blob[0..4].try_into().unwrap());
        assert_eq!(words as usize, MODULUS_WORDS);

        let exponent = u32::from_le_bytes(blob[blob.len() - 4..].try_into().unwrap());
        assert_eq!(exponent, 65537);
    }

    #[test]
    fn n0inv_inverts_the_low_modulus_word() {
        let key = test_key();
        let blob = key.android_pubkey_blob();
        let n0inv = u32::from_le_bytes(blob[4..8].try_into().unwrap());
        let n0 = u32::from_le_bytes(blob[8..12].try_into().unwrap());
        // n0 * (-n0^-1) == -1 (mod 2^32)
        assert_eq!(n0.wrapping_mul(n0inv), u32::MAX);
    }
}
