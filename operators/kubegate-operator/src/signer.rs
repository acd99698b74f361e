//! 令牌签名模块
//!
//! 使用 PEM 格式的 RSA 私钥对声明集合进行 RS256 签名，生成可直接作为
//! Bearer 凭据使用的 JWT。算法固定，以保证已签发令牌在不同实现间可互认。

use jsonwebtoken::{Algorithm, EncodingKey, Header};

use kubegate_common::TokenClaims;

use crate::error::Result;

/// 签名器
pub trait Signer: Send + Sync {
    /// 对声明签名，返回 JWT 字符串
    fn sign(&self, claims: &TokenClaims, private_key_pem: &[u8]) -> Result<String>;
}

/// RS256 签名器
#[derive(Debug, Default, Clone, Copy)]
pub struct Rs256Signer;

impl Signer for Rs256Signer {
    fn sign(&self, claims: &TokenClaims, private_key_pem: &[u8]) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)?;
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key)?;
        Ok(token)
    }
}
