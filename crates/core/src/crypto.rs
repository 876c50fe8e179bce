// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic types for signing messages and sealing hands.
use blake2::{Blake2s, Blake2s256, Digest, digest, digest::typenum::ToInt};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit},
};
use ed25519_dalek::{Signer, Verifier};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use sodep_cards::Card;

/// The hasher used for signatures.
type SigHasher = Blake2s<digest::consts::U32>;

/// A key for signing messages.
pub struct SigningKey(ed25519_dalek::SigningKey);

impl Default for SigningKey {
    fn default() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }
}

impl SigningKey {
    /// Sign a message.
    pub fn sign<T>(&self, msg: &T) -> Signature
    where
        T: Serialize,
    {
        let mut hasher = SigHasher::new();
        bincode::serialize_into(&mut hasher, msg).expect("should serialize to hasher");
        Signature(self.0.sign(&hasher.finalize()))
    }

    /// Get the signature verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SigningKey({})",
            bs58::encode(self.0.as_bytes()).into_string()
        )
    }
}

/// Message signature.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Signature(ed25519_dalek::Signature);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signature({})",
            bs58::encode(&self.0.to_bytes()).into_string()
        )
    }
}

/// Key for signature verification.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

impl VerifyingKey {
    /// Verifies a message signature.
    pub fn verify<T>(&self, msg: &T, signature: &Signature) -> bool
    where
        T: Serialize,
    {
        let mut hasher = SigHasher::new();
        bincode::serialize_into(&mut hasher, msg).expect("should serialize to hasher");
        self.0.verify(&hasher.finalize(), &signature.0).is_ok()
    }

    /// Returns the [PeerId] for this key.
    pub fn peer_id(&self) -> PeerId {
        let mut hasher = Blake2s::<digest::consts::U16>::new();
        hasher.update(self.0.as_bytes());
        PeerId(hasher.finalize().into())
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VerifyingKey({})",
            bs58::encode(self.0.as_bytes()).into_string()
        )
    }
}

/// A message sender identifier derived from a signature verifying key.
#[derive(Clone, Serialize, Deserialize, Hash, Eq, PartialEq)]
pub struct PeerId([u8; digest::consts::U16::INT]);

impl PeerId {
    /// The hex digits for this peer id.
    pub fn digits(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(32), |mut output, b| {
                output.push_str(&format!("{b:02X}"));
                output
            })
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.digits())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digits())
    }
}

/// Seals a player's cards before they are published to the table.
///
/// The key is derived once from the server secret, so restarting the server
/// with the same secret keeps old payloads readable. Every [seal] call
/// draws a fresh random nonce, sealing the same hand twice never yields the
/// same payload. The payload is `base64(nonce):base64(ciphertext)`, it
/// carries everything needed to open it.
///
/// The raw key is handed to the table participants when a round finishes so
/// clients can open the sealed hands themselves. That reveal is a
/// deliberate trust boundary, the key protects hands only until then.
#[derive(Clone)]
pub struct HandCipher {
    cipher: ChaCha20Poly1305,
    key: [u8; 32],
}

impl HandCipher {
    /// Derives the cipher from a server secret.
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Blake2s256::new();
        hasher.update(secret.as_bytes());
        let key: [u8; 32] = hasher.finalize().into();

        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            key,
        }
    }

    /// Seals a hand of cards into a self describing payload.
    pub fn seal(&self, cards: &[Card]) -> String {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let plain = bincode::serialize(cards).expect("should serialize cards");
        let sealed = self
            .cipher
            .encrypt(&nonce, plain.as_ref())
            .expect("should seal cards");

        format!("{}:{}", BASE64.encode(nonce), BASE64.encode(sealed))
    }

    /// Opens a sealed payload.
    ///
    /// Fails closed: malformed, truncated, or tampered input yields an
    /// empty hand, never an error.
    pub fn open(&self, payload: &str) -> Vec<Card> {
        let Some((nonce, sealed)) = payload.split_once(':') else {
            return Vec::new();
        };

        let (Ok(nonce), Ok(sealed)) = (BASE64.decode(nonce), BASE64.decode(sealed)) else {
            return Vec::new();
        };

        if nonce.len() != 12 {
            return Vec::new();
        }

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .ok()
            .and_then(|plain| bincode::deserialize(&plain).ok())
            .unwrap_or_default()
    }

    /// The base64 reveal key shared with the table when a round finishes.
    pub fn reveal_key(&self) -> String {
        BASE64.encode(self.key)
    }
}

impl fmt::Debug for HandCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodep_cards::{Rank, Suit};

    #[test]
    fn sign() {
        #[derive(Serialize)]
        struct Point {
            x: f32,
            y: f32,
        }

        let msg = Point { x: 10.2, y: 4.3 };

        let sk = SigningKey::default();
        let sig = sk.sign(&msg);

        // Signed message
        let vk = sk.verifying_key();
        assert!(vk.verify(&msg, &sig));

        // Invalid message
        let msg = Point { x: 10.2001, y: 4.3 };
        assert!(!vk.verify(&msg, &sig));
    }

    fn hand() -> Vec<Card> {
        vec![
            Card::new(Rank::Ace, Suit::Spades),
            Card::new(Rank::King, Suit::Hearts),
        ]
    }

    #[test]
    fn seal_roundtrip() {
        let cipher = HandCipher::from_secret("table secret");
        let sealed = cipher.seal(&hand());
        assert_eq!(cipher.open(&sealed), hand());
    }

    #[test]
    fn seal_uses_fresh_nonces() {
        let cipher = HandCipher::from_secret("table secret");
        assert_ne!(cipher.seal(&hand()), cipher.seal(&hand()));
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let c1 = HandCipher::from_secret("table secret");
        let c2 = HandCipher::from_secret("table secret");
        assert_eq!(c2.open(&c1.seal(&hand())), hand());
        assert_eq!(c1.reveal_key(), c2.reveal_key());

        let other = HandCipher::from_secret("other secret");
        assert!(other.open(&c1.seal(&hand())).is_empty());
    }

    #[test]
    fn open_fails_closed() {
        let cipher = HandCipher::from_secret("table secret");

        assert!(cipher.open("").is_empty());
        assert!(cipher.open("no delimiter").is_empty());
        assert!(cipher.open("!!!:???").is_empty());
        assert!(cipher.open("AAAA:AAAA").is_empty());

        // Tampered ciphertext.
        let sealed = cipher.seal(&hand());
        let (nonce, ct) = sealed.split_once(':').unwrap();
        let mut bytes = BASE64.decode(ct).unwrap();
        bytes[0] ^= 0xFF;
        let tampered = format!("{nonce}:{}", BASE64.encode(bytes));
        assert!(cipher.open(&tampered).is_empty());

        // Truncated ciphertext.
        let truncated = format!("{nonce}:{}", &ct[..ct.len() / 2]);
        assert!(cipher.open(&truncated).is_empty());
    }
}
