use std::time::Duration;

use axum::extract::State;
use axum::Json;

use dropper_core::authorization::{authorize, verify, AuthorizationDomain};
use dropper_core::signer::channel::{build_client_auth_wrapper, unix_now};
use dropper_core::signer::{RemoteSigner, SignerError};
use dropper_core::Signer;
use dropper_crypto::{
    keccak256, recover_address, to_hex_prefixed, Address, Ed25519SigningKey,
    RecoverableSignature,
};

use crate::endpoints::test_helpers::{mock_state, start_signer_server};
use crate::error::SignerServerError;

use super::handler::{handle_batch_sign, handle_sign};

fn client_key() -> Ed25519SigningKey {
    Ed25519SigningKey::generate(&mut rand::rngs::OsRng)
}

/// ダイジェストに署名し、鍵アドレスに復元されることを確認
#[tokio::test]
async fn test_sign_direct_request() {
    let state = mock_state(None, 10);
    let digest = keccak256(b"claim");
    let body = serde_json::json!({"digest": to_hex_prefixed(&digest)});

    let response = handle_sign(State(state.clone()), Json(body)).await.unwrap().0;
    let signature = RecoverableSignature::from_hex(&response.signature).unwrap();
    assert!(signature.v() == 27 || signature.v() == 28);
    assert_eq!(
        recover_address(&digest, &signature).unwrap(),
        state.runtime.address()
    );
}

#[tokio::test]
async fn test_sign_rejects_malformed_digest() {
    let state = mock_state(None, 10);
    let body = serde_json::json!({"digest": "0x1234"});
    let result = handle_sign(State(state), Json(body)).await;
    assert!(matches!(result, Err(SignerServerError::BadRequest(_))));
}

/// クライアント鍵が設定されている場合、ラッパーなしは拒否
#[tokio::test]
async fn test_sign_requires_client_auth() {
    let key = client_key();
    let state = mock_state(Some(key.verifying_key()), 10);
    let body = serde_json::json!({"digest": to_hex_prefixed(&keccak256(b"x"))});

    let result = handle_sign(State(state), Json(body)).await;
    assert!(matches!(result, Err(SignerServerError::Unauthorized(_))));
}

/// 登録されていないクライアント鍵による署名は拒否
#[tokio::test]
async fn test_sign_rejects_unknown_client() {
    let state = mock_state(Some(client_key().verifying_key()), 10);
    let inner = serde_json::json!({"digest": to_hex_prefixed(&keccak256(b"x"))});
    let wrapper = build_client_auth_wrapper(&client_key(), "POST", "/sign", inner, unix_now()).unwrap();

    let result = handle_sign(State(state), Json(serde_json::to_value(wrapper).unwrap())).await;
    assert!(matches!(result, Err(SignerServerError::Forbidden(_))));
}

#[tokio::test]
async fn test_batch_sign_keys_by_normalized_digest() {
    let state = mock_state(None, 10);
    let a = keccak256(b"a");
    let b = keccak256(b"b");
    let body = serde_json::json!({
        "digests": [to_hex_prefixed(&a).to_uppercase().replacen("0X", "0x", 1), to_hex_prefixed(&b)],
    });

    let response = handle_batch_sign(State(state.clone()), Json(body)).await.unwrap().0;
    assert_eq!(response.signatures.len(), 2);
    for digest in [a, b] {
        let raw = &response.signatures[&to_hex_prefixed(&digest)];
        let signature = RecoverableSignature::from_hex(raw).unwrap();
        assert_eq!(
            recover_address(&digest, &signature).unwrap(),
            state.runtime.address()
        );
    }
}

#[tokio::test]
async fn test_batch_sign_enforces_max_batch_size() {
    let state = mock_state(None, 2);
    let digests: Vec<String> = (0u8..3).map(|i| to_hex_prefixed(&keccak256(&[i]))).collect();
    let body = serde_json::json!({"digests": digests});

    let result = handle_batch_sign(State(state), Json(body)).await;
    assert!(matches!(result, Err(SignerServerError::PayloadTooLarge(_))));
}

/// RemoteSigner経由の署名と汎用認可トークンの検証
#[tokio::test]
async fn test_remote_signer_end_to_end() {
    let key = client_key();
    let state = mock_state(Some(key.verifying_key()), 10);
    let address = state.runtime.address();
    let port = start_signer_server(state).await;

    let signer = RemoteSigner::new(
        format!("http://127.0.0.1:{port}"),
        address,
        key,
        Duration::from_secs(5),
    )
    .unwrap();

    let info = signer.info().await.unwrap();
    assert_eq!(info.address, address.to_string());
    assert_eq!(info.runtime, "mock");

    let domain = AuthorizationDomain::default();
    let deadline = unix_now() + 3600;
    let payload = authorize(&signer, &domain, deadline).await.unwrap();
    assert_eq!(verify(&payload, &domain, unix_now()).unwrap(), address);

    let digests = vec![keccak256(b"1"), keccak256(b"2"), keccak256(b"3")];
    let signatures = signer.batch_sign(&digests).await.unwrap();
    for (digest, signature) in digests.iter().zip(&signatures) {
        assert_eq!(recover_address(digest, signature).unwrap(), address);
    }
}

/// 別のクライアント鍵ではHTTP 403として返る
#[tokio::test]
async fn test_remote_signer_with_unregistered_client_key() {
    let state = mock_state(Some(client_key().verifying_key()), 10);
    let address = state.runtime.address();
    let port = start_signer_server(state).await;

    let signer = RemoteSigner::new(
        format!("http://127.0.0.1:{port}"),
        address,
        client_key(),
        Duration::from_secs(5),
    )
    .unwrap();

    let result = signer.sign(&keccak256(b"x")).await;
    assert!(matches!(result, Err(SignerError::Remote { status: 403, .. })));
}

/// 宣言したアドレスと異なる鍵を持つインスタンスの署名は受け入れない
#[tokio::test]
async fn test_remote_signer_detects_wrong_instance_key() {
    let state = mock_state(None, 10);
    let port = start_signer_server(state).await;

    let signer = RemoteSigner::new(
        format!("http://127.0.0.1:{port}"),
        Address::from_bytes([0x11; 20]),
        client_key(),
        Duration::from_secs(5),
    )
    .unwrap();

    let result = signer.sign(&keccak256(b"x")).await;
    assert!(matches!(result, Err(SignerError::InvalidSignature(_))));
}
