//! # ローカル鍵署名者
//!
//! 暗号化keystoreをパスフレーズで復号し、プロセス内で署名する。

use std::path::Path;

use secrecy::SecretString;

use dropper_crypto::{
    keystore, sign_digest, signer_address, Address, Digest32, RecoverableSignature,
    Secp256k1SigningKey,
};

use super::{Signer, SignerError};

/// プロセス内に復号済み鍵を保持する署名者。鍵はドロップ時にゼロ化される。
pub struct LocalSigner {
    key: Secp256k1SigningKey,
    address: Address,
}

impl LocalSigner {
    /// 署名鍵から構築する。
    pub fn new(key: Secp256k1SigningKey) -> Self {
        let address = signer_address(&key);
        Self { key, address }
    }

    /// keystoreファイルとパスフレーズから構築する。
    pub fn from_keystore(path: &Path, passphrase: &SecretString) -> Result<Self, SignerError> {
        let key = keystore::decrypt_keystore(path, passphrase)
            .map_err(|e| SignerError::Config(e.to_string()))?;
        let signer = Self::new(key);
        tracing::info!(address = %signer.address, keystore = %path.display(), "keystoreを読み込みました");
        Ok(signer)
    }

    /// 生の秘密鍵ファイルから構築する。
    pub fn from_private_key_file(path: &Path) -> Result<Self, SignerError> {
        let key = keystore::read_private_key_file(path)
            .map_err(|e| SignerError::Config(e.to_string()))?;
        Ok(Self::new(key))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, digest: &Digest32) -> Result<RecoverableSignature, SignerError> {
        sign_digest(&self.key, digest).map_err(|e| SignerError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropper_crypto::{keccak256, recover_address};

    #[tokio::test]
    async fn test_from_keystore_signs_as_stored_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        eth_keystore::encrypt_key(
            dir.path(),
            &mut rand::rngs::OsRng,
            key.to_bytes(),
            "pass",
            Some("key.json"),
        )
        .unwrap();

        let signer = LocalSigner::from_keystore(
            &dir.path().join("key.json"),
            &SecretString::from("pass".to_string()),
        )
        .unwrap();
        assert_eq!(signer.address(), signer_address(&key));

        let digest = keccak256(b"local");
        let sig = signer.sign(&digest).await.unwrap();
        assert_eq!(recover_address(&digest, &sig).unwrap(), signer_address(&key));
    }

    #[test]
    fn test_from_keystore_missing_file_is_config_error() {
        let result = LocalSigner::from_keystore(
            Path::new("/nonexistent/keystore.json"),
            &SecretString::from("x".to_string()),
        );
        assert!(matches!(result, Err(SignerError::Config(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let mut sk = [0u8; 32];
        sk[31] = 1;
        let signer = LocalSigner::new(Secp256k1SigningKey::from_slice(&sk).unwrap());
        let printed = format!("{signer:?}");
        assert!(printed.contains("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"));
        assert!(!printed.contains("key:"));
    }
}
