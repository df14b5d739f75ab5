//! # keystoreランタイム
//!
//! 起動時に暗号化keystoreをパスフレーズで復号し、鍵をメモリ内にのみ保持する。
//! ディスク上の鍵は暗号化されたまま。

use std::path::Path;

use secrecy::SecretString;

use dropper_crypto::{
    keystore, sign_digest, signer_address, Address, CryptoError, Digest32, RecoverableSignature,
    Secp256k1SigningKey,
};

use super::KeyRuntime;

/// keystoreから復号した鍵で署名するランタイム。
pub struct KeystoreRuntime {
    key: Secp256k1SigningKey,
    address: Address,
}

impl KeystoreRuntime {
    /// keystoreファイルを復号して初期化する。
    pub fn open(path: &Path, passphrase: &SecretString) -> Result<Self, CryptoError> {
        let key = keystore::decrypt_keystore(path, passphrase)?;
        let address = signer_address(&key);
        tracing::info!(address = %address, keystore = %path.display(), "keystoreを復号しました");
        Ok(Self { key, address })
    }
}

impl KeyRuntime for KeystoreRuntime {
    fn runtime_type(&self) -> &str {
        "keystore"
    }

    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, digest: &Digest32) -> Result<RecoverableSignature, CryptoError> {
        sign_digest(&self.key, digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        eth_keystore::encrypt_key(
            dir.path(),
            &mut rand::rngs::OsRng,
            key.to_bytes(),
            "pw",
            Some("signer.json"),
        )
        .unwrap();

        let rt = KeystoreRuntime::open(
            &dir.path().join("signer.json"),
            &SecretString::from("pw".to_string()),
        )
        .unwrap();
        assert_eq!(rt.address(), signer_address(&key));
        assert_eq!(rt.runtime_type(), "keystore");
    }

    #[test]
    fn test_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        eth_keystore::encrypt_key(
            dir.path(),
            &mut rand::rngs::OsRng,
            key.to_bytes(),
            "pw",
            Some("signer.json"),
        )
        .unwrap();

        let result = KeystoreRuntime::open(
            &dir.path().join("signer.json"),
            &SecretString::from("wrong".to_string()),
        );
        assert!(matches!(result, Err(CryptoError::Keystore(_))));
    }
}
