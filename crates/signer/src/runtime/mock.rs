//! # ローカル開発用モックランタイム
//!
//! 起動時にメモリ内でsecp256k1鍵を生成する。再起動すると鍵が変わる。

use dropper_crypto::{
    sign_digest, signer_address, Address, CryptoError, Digest32, RecoverableSignature,
    Secp256k1SigningKey,
};

use super::KeyRuntime;

/// モック鍵ランタイム。ローカル開発・テスト用。
pub struct MockRuntime {
    key: Secp256k1SigningKey,
    address: Address,
}

impl MockRuntime {
    /// 新しい鍵を生成して初期化する。
    pub fn new() -> Self {
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        let address = signer_address(&key);
        Self { key, address }
    }
}

impl KeyRuntime for MockRuntime {
    fn runtime_type(&self) -> &str {
        "mock"
    }

    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, digest: &Digest32) -> Result<RecoverableSignature, CryptoError> {
        sign_digest(&self.key, digest)
    }
}
