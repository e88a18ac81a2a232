use crate::error::CryptoError;
use crate::interfaces::Signer;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::HashMap;

/// Ed25519 signer holding one key per role.
pub struct Ed25519Signer {
    keys: HashMap<String, SigningKey>,
}

impl Ed25519Signer {
    /// Generate a fresh key for each role.
    pub fn generate(roles: &[&str]) -> Self {
        let mut csprng = OsRng;
        let keys = roles
            .iter()
            .map(|role| (role.to_string(), SigningKey::generate(&mut csprng)))
            .collect();
        Ed25519Signer { keys }
    }

    /// Deterministic key for `role`, from a 32-byte seed.
    pub fn from_seed(role: &str, seed: [u8; 32]) -> Self {
        let mut keys = HashMap::new();
        keys.insert(role.to_string(), SigningKey::from_bytes(&seed));
        Ed25519Signer { keys }
    }

    pub fn with_role_seed(mut self, role: &str, seed: [u8; 32]) -> Self {
        self.keys.insert(role.to_string(), SigningKey::from_bytes(&seed));
        self
    }

    /// Public key bytes for `role`.
    pub fn public_key(&self, role: &str) -> Result<Vec<u8>, CryptoError> {
        self.keys
            .get(role)
            .map(|k| k.verifying_key().to_bytes().to_vec())
            .ok_or_else(|| CryptoError::UnknownRole(role.to_string()))
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, role: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self
            .keys
            .get(role)
            .ok_or_else(|| CryptoError::UnknownRole(role.to_string()))?;
        Ok(key.sign(data).to_bytes().to_vec())
    }

    fn verify(&self, pub_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        let Ok(pk_bytes) = <[u8; 32]>::try_from(pub_key) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(data, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = Ed25519Signer::generate(&["pos"]);
        let pk = signer.public_key("pos").unwrap();
        let sig = signer.sign("pos", b"header-hash").unwrap();

        assert_eq!(sig.len(), 64);
        assert!(signer.verify(&pk, b"header-hash", &sig));
        assert!(!signer.verify(&pk, b"other", &sig));
    }

    #[test]
    fn test_unknown_role_and_bad_inputs() {
        let signer = Ed25519Signer::from_seed("pos", [3u8; 32]);
        assert_eq!(
            signer.sign("pow", b"x"),
            Err(CryptoError::UnknownRole("pow".to_string()))
        );
        let pk = signer.public_key("pos").unwrap();
        assert!(!signer.verify(&pk[..31], b"x", &[0u8; 64]));
        assert!(!signer.verify(&pk, b"x", &[0u8; 10]));
    }

    #[test]
    fn test_seeded_keys_are_deterministic() {
        let a = Ed25519Signer::from_seed("pos", [9u8; 32]);
        let b = Ed25519Signer::from_seed("pos", [9u8; 32]);
        assert_eq!(a.public_key("pos").unwrap(), b.public_key("pos").unwrap());
    }
}
