//! 代理签名消息：接口与基于 HS256 JWT 的实现。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::SECRET_LENGTH;
use crate::error::DecodeError;

/// 代理提取出的字段及其临时文件路径。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct RewriteMessage {
    pub rewritten_fields: BTreeMap<String, String>,
}

/// 校验并解码请求头中的令牌。
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<RewriteMessage, DecodeError>;
}

/// 以共享密钥校验 HS256 签名并要求指定的签发者。
pub struct JwtDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl JwtDecoder {
    pub fn new(secret: &[u8], issuer: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("iss".to_string());
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// 从文件读取 base64 编码的密钥。
    pub fn from_secret_file(path: &Path, issuer: &str) -> Result<Self, DecodeError> {
        let encoded = std::fs::read_to_string(path)
            .map_err(|err| DecodeError::Secret(format!("{}: {err}", path.display())))?;
        let secret = decode_secret(&encoded)?;
        Ok(Self::new(&secret, issuer))
    }
}

fn decode_secret(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let secret = STANDARD
        .decode(encoded.trim())
        .map_err(|err| DecodeError::Secret(err.to_string()))?;
    if secret.len() != SECRET_LENGTH {
        return Err(DecodeError::Secret(format!(
            "expected {SECRET_LENGTH} bytes, got {}",
            secret.len()
        )));
    }
    Ok(secret)
}

impl MessageDecoder for JwtDecoder {
    fn decode(&self, token: &str) -> Result<RewriteMessage, DecodeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DecodeError::Empty);
        }
        let data = decode::<RewriteMessage>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::{JwtDecoder, MessageDecoder, decode_secret};
    use crate::error::DecodeError;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &[u8; 32] = b"0123456789abcdef0123456789abcdef";
    const ISSUER: &str = "upload-splice-proxy";

    fn sign(claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .expect("encode token")
    }

    #[test]
    fn decodes_valid_token() {
        let token = sign(
            &json!({
                "iss": ISSUER,
                "rewritten_fields": { "avatar": "/tmp/up1", "doc[file]": "/tmp/up2" }
            }),
            SECRET,
        );
        let message = JwtDecoder::new(SECRET, ISSUER)
            .decode(&token)
            .expect("decode");
        assert_eq!(message.rewritten_fields.len(), 2);
        assert_eq!(message.rewritten_fields["avatar"], "/tmp/up1");
        assert_eq!(message.rewritten_fields["doc[file]"], "/tmp/up2");
    }

    #[test]
    fn rejects_wrong_secret_issuer_and_shape() {
        let decoder = JwtDecoder::new(SECRET, ISSUER);

        let forged = sign(
            &json!({ "iss": ISSUER, "rewritten_fields": {} }),
            b"another-secret-another-secret-xx",
        );
        assert!(matches!(decoder.decode(&forged), Err(DecodeError::Jwt(_))));

        let wrong_issuer = sign(
            &json!({ "iss": "someone-else", "rewritten_fields": {} }),
            SECRET,
        );
        assert!(matches!(decoder.decode(&wrong_issuer), Err(DecodeError::Jwt(_))));

        let no_issuer = sign(&json!({ "rewritten_fields": {} }), SECRET);
        assert!(matches!(decoder.decode(&no_issuer), Err(DecodeError::Jwt(_))));

        let missing_fields = sign(&json!({ "iss": ISSUER }), SECRET);
        assert!(matches!(decoder.decode(&missing_fields), Err(DecodeError::Jwt(_))));

        let expired = sign(
            &json!({ "iss": ISSUER, "exp": 1_000_000, "rewritten_fields": {} }),
            SECRET,
        );
        assert!(matches!(decoder.decode(&expired), Err(DecodeError::Jwt(_))));

        assert!(matches!(decoder.decode("  "), Err(DecodeError::Empty)));
        assert!(matches!(decoder.decode("not-a-jwt"), Err(DecodeError::Jwt(_))));
    }

    #[test]
    fn secret_must_be_base64_of_expected_length() {
        let encoded = STANDARD.encode(SECRET);
        assert_eq!(decode_secret(&format!("{encoded}\n")).expect("secret"), SECRET);
        assert!(matches!(
            decode_secret(&STANDARD.encode(b"short")),
            Err(DecodeError::Secret(_))
        ));
        assert!(matches!(
            decode_secret("%%%"),
            Err(DecodeError::Secret(_))
        ));
    }
}
