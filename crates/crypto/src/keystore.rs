//! # keystore読み込み
//!
//! Web3 Secret Storage（keystore v3）形式の暗号化鍵ファイルを復号し、
//! secp256k1署名鍵を取り出す。復号された鍵バイト列はドロップ時にゼロ化される。

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::{signing_key_from_bytes, CryptoError, Secp256k1SigningKey};

/// keystoreファイルをパスフレーズで復号し、署名鍵を返す。
pub fn decrypt_keystore(
    path: &Path,
    passphrase: &SecretString,
) -> Result<Secp256k1SigningKey, CryptoError> {
    let secret = Zeroizing::new(
        eth_keystore::decrypt_key(path, passphrase.expose_secret().as_bytes())
            .map_err(|e| CryptoError::Keystore(format!("{}: {e}", path.display())))?,
    );
    signing_key_from_bytes(&secret)
}

/// 生の秘密鍵ファイル（hex、`0x` 省略可、前後の空白は無視）を読み込む。
pub fn read_private_key_file(path: &Path) -> Result<Secp256k1SigningKey, CryptoError> {
    let content = Zeroizing::new(
        std::fs::read_to_string(path)
            .map_err(|e| CryptoError::Keystore(format!("{}: {e}", path.display())))?,
    );
    let bytes = Zeroizing::new(
        hex::decode(crate::strip_0x(content.trim()))
            .map_err(|e| CryptoError::InvalidHex(e.to_string()))?,
    );
    signing_key_from_bytes(&bytes)
}

/// パスワードファイルの先頭行を読み込む。
pub fn read_password_file(path: &Path) -> Result<SecretString, CryptoError> {
    let content = Zeroizing::new(
        std::fs::read_to_string(path)
            .map_err(|e| CryptoError::Keystore(format!("{}: {e}", path.display())))?,
    );
    let first = content.lines().next().unwrap_or_default();
    Ok(SecretString::from(first.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer_address;

    #[test]
    fn test_decrypt_keystore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        eth_keystore::encrypt_key(
            dir.path(),
            &mut rand::rngs::OsRng,
            key.to_bytes(),
            "hunter2",
            Some("signer.json"),
        )
        .unwrap();

        let decrypted = decrypt_keystore(
            &dir.path().join("signer.json"),
            &SecretString::from("hunter2".to_string()),
        )
        .unwrap();
        assert_eq!(signer_address(&decrypted), signer_address(&key));
    }

    #[test]
    fn test_decrypt_keystore_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let key = Secp256k1SigningKey::random(&mut rand::rngs::OsRng);
        eth_keystore::encrypt_key(
            dir.path(),
            &mut rand::rngs::OsRng,
            key.to_bytes(),
            "right",
            Some("signer.json"),
        )
        .unwrap();

        let result = decrypt_keystore(
            &dir.path().join("signer.json"),
            &SecretString::from("wrong".to_string()),
        );
        assert!(matches!(result, Err(CryptoError::Keystore(_))));
    }

    #[test]
    fn test_read_private_key_and_password_files() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.txt");
        std::fs::write(&key_path, format!("0x{}\n", "11".repeat(32))).unwrap();
        let key = read_private_key_file(&key_path).unwrap();
        assert_eq!(key.to_bytes().as_slice(), &[0x11u8; 32]);

        let pass_path = dir.path().join("pass.txt");
        std::fs::write(&pass_path, "secret\nignored\n").unwrap();
        let pass = read_password_file(&pass_path).unwrap();
        assert_eq!(pass.expose_secret(), "secret");
    }
}
