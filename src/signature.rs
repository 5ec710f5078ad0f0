use secp256k1::{Secp256k1, SecretKey, PublicKey, Message};
use secp256k1::ecdsa::Signature;
use sha2::{Sha256, Digest};
use serde_json;
use crate::error::{LedgerError, Result};

const DOMAIN_SEPARATOR: &str = "MetalLedgerSignature:";

/// Hashes a message with domain separator
pub fn hash_message<T: serde::Serialize>(message: &T) -> Result<[u8; 32]> {
    let json = serde_json::to_string(message)
        .map_err(|e| LedgerError::Encoding(format!("Failed to serialize message: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEPARATOR.as_bytes());
    hasher.update(json.as_bytes());
    let hash = hasher.finalize();

    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    Ok(result)
}

/// Signs a message and returns signature components
pub fn sign_message(private_key: &SecretKey, message: &impl serde::Serialize) -> Result<SignatureComponents> {
    let secp = Secp256k1::new();

    let hash = hash_message(message)?;
    let msg = Message::from_digest_slice(&hash)
        .map_err(|e| LedgerError::Signature(format!("Invalid message hash: {}", e)))?;

    // sign_ecdsa always yields low-S signatures
    let signature = secp.sign_ecdsa(&msg, private_key);
    let public_key = PublicKey::from_secret_key(&secp, private_key);

    Ok(SignatureComponents {
        pub_key: hex::encode(public_key.serialize()),
        signature_compact: hex::encode(signature.serialize_compact()),
    })
}

/// Verifies a compact hex signature against a hex-encoded compressed public key
pub fn verify_signature(
    message: &impl serde::Serialize,
    signature_hex: &str,
    pub_key_hex: &str,
) -> Result<bool> {
    let secp = Secp256k1::verification_only();

    let hash = hash_message(message)?;
    let msg = Message::from_digest_slice(&hash)
        .map_err(|e| LedgerError::Signature(format!("Invalid message hash: {}", e)))?;

    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| LedgerError::Signature(format!("Invalid signature hex: {}", e)))?;
    let signature = Signature::from_compact(&sig_bytes)
        .map_err(|e| LedgerError::Signature(format!("Invalid compact signature: {}", e)))?;

    let pub_key_bytes = hex::decode(pub_key_hex)
        .map_err(|e| LedgerError::Signature(format!("Invalid public key hex: {}", e)))?;
    let pub_key = PublicKey::from_slice(&pub_key_bytes)
        .map_err(|e| LedgerError::Signature(format!("Invalid public key: {}", e)))?;

    Ok(secp.verify_ecdsa(&msg, &signature, &pub_key).is_ok())
}

#[derive(Debug, Clone)]
pub struct SignatureComponents {
    pub pub_key: String,
    pub signature_compact: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;

    #[test]
    fn test_hash_message() {
        let message = serde_json::json!({"test": "data"});
        let hash = hash_message(&message).unwrap();
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, hash_message(&message).unwrap());
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SecretKey::from_slice(&[1; 32]).unwrap();

        let message = serde_json::json!({"test": "message"});
        let sig = sign_message(&secret_key, &message).unwrap();

        assert_eq!(sig.signature_compact.len(), 128);
        assert!(verify_signature(&message, &sig.signature_compact, &sig.pub_key).unwrap());
    }

    #[test]
    fn test_verify_rejects_other_message() {
        let secret_key = SecretKey::from_slice(&[3; 32]).unwrap();
        let sig = sign_message(&secret_key, &serde_json::json!({"value": 1})).unwrap();

        let verified = verify_signature(
            &serde_json::json!({"value": 2}),
            &sig.signature_compact,
            &sig.pub_key,
        )
        .unwrap();
        assert!(!verified);
    }

    #[test]
    fn test_verify_malformed_key_is_error() {
        let secret_key = SecretKey::from_slice(&[4; 32]).unwrap();
        let message = serde_json::json!({"test": "message"});
        let sig = sign_message(&secret_key, &message).unwrap();

        assert!(verify_signature(&message, &sig.signature_compact, "zz").is_err());
    }
}
