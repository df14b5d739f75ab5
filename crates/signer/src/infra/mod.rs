//! # 署名サーバーのインフラストラクチャ
//!
//! - `client_auth`: クライアント認証検証

pub mod client_auth;
