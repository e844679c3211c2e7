//! 当前租户解析
//!
//! 通知通道只负责比对帧携带的租户与当前会话租户，租户本身来自会话令牌。
//! 未解析出租户时返回 None，由通道按“未知租户”策略处理。

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ChannelError;
use crate::frame::string_field;

/// 令牌中可能承载租户标识的声明，按顺序查找
const TENANT_CLAIMS: [&str; 3] = ["tenantId", "tenant_id", "tenant"];

/// 当前租户解析器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn current_tenant(&self) -> Option<String>;
}

// ---------------------------------------------------------------------------
// 固定租户
// ---------------------------------------------------------------------------

/// 由调用方显式设置的租户，会话登录后更新
#[derive(Debug, Default)]
pub struct StaticTenant {
    tenant: RwLock<Option<String>>,
}

impl StaticTenant {
    pub fn new(tenant: Option<&str>) -> Self {
        Self {
            tenant: RwLock::new(tenant.map(str::to_string)),
        }
    }

    pub fn set(&self, tenant: Option<&str>) {
        *self.tenant.write() = tenant.map(str::to_string);
    }
}

#[async_trait]
impl TenantResolver for StaticTenant {
    async fn current_tenant(&self) -> Option<String> {
        self.tenant.read().clone()
    }
}

// ---------------------------------------------------------------------------
// JWT 会话令牌
// ---------------------------------------------------------------------------

/// 从会话 JWT 的声明中读取租户
///
/// 配置了密钥时校验签名与过期时间；未配置时只读取声明，
/// 签名已由会话服务在签发和转发时校验过。
pub struct JwtTenantResolver {
    token: RwLock<Option<String>>,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTenantResolver {
    pub fn new(secret: Option<&str>) -> Self {
        let mut validation = Validation::default();
        validation.validate_aud = false;

        let decoding_key = match secret.filter(|s| !s.is_empty()) {
            Some(secret) => DecodingKey::from_secret(secret.as_bytes()),
            None => {
                validation.insecure_disable_signature_validation();
                validation.validate_exp = false;
                validation.required_spec_claims.clear();
                DecodingKey::from_secret(&[])
            }
        };

        Self {
            token: RwLock::new(None),
            decoding_key,
            validation,
        }
    }

    /// 更新会话令牌，登出时传入 None
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// 解析令牌中的租户声明
    pub fn tenant_from_token(&self, token: &str) -> Result<Option<String>, ChannelError> {
        let token = token.trim().trim_start_matches("Bearer ").trim();
        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ChannelError::Token(e.to_string()))?;

        Ok(TENANT_CLAIMS
            .iter()
            .find_map(|claim| string_field(&data.claims, claim)))
    }
}

#[async_trait]
impl TenantResolver for JwtTenantResolver {
    async fn current_tenant(&self) -> Option<String> {
        let token = self.token.read().clone()?;
        match self.tenant_from_token(&token) {
            Ok(tenant) => tenant,
            Err(e) => {
                debug!(error = %e, "会话令牌无法解析，租户视为未知");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn sign(claims: Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("签发测试令牌失败")
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_static_tenant() {
        let tenant = StaticTenant::new(None);
        assert_eq!(tenant.current_tenant().await, None);

        tenant.set(Some("hospital-naval"));
        assert_eq!(tenant.current_tenant().await.as_deref(), Some("hospital-naval"));
    }

    #[tokio::test]
    async fn test_jwt_with_secret() {
        let resolver = JwtTenantResolver::new(Some("almacen-secret"));
        let token = sign(
            json!({ "sub": "7", "tenantId": "T1", "exp": far_future() }),
            "almacen-secret",
        );
        resolver.set_token(Some(token));

        assert_eq!(resolver.current_tenant().await.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_jwt_wrong_secret_is_unknown() {
        let resolver = JwtTenantResolver::new(Some("almacen-secret"));
        let token = sign(
            json!({ "tenantId": "T1", "exp": far_future() }),
            "another-secret",
        );

        assert!(matches!(
            resolver.tenant_from_token(&token),
            Err(ChannelError::Token(_))
        ));
        resolver.set_token(Some(token));
        assert_eq!(resolver.current_tenant().await, None);
    }

    #[test]
    fn test_jwt_without_secret_reads_claims() {
        let resolver = JwtTenantResolver::new(None);
        // 无 exp 声明、任意签名密钥均可读取
        let token = sign(json!({ "tenant_id": 42 }), "whatever");

        assert_eq!(
            resolver.tenant_from_token(&format!("Bearer {token}")).unwrap().as_deref(),
            Some("42")
        );
    }

    #[test]
    fn test_jwt_without_tenant_claim() {
        let resolver = JwtTenantResolver::new(None);
        let token = sign(json!({ "sub": "7" }), "whatever");

        assert_eq!(resolver.tenant_from_token(&token).unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_token_is_unknown() {
        let resolver = JwtTenantResolver::new(None);
        assert_eq!(resolver.current_tenant().await, None);

        resolver.set_token(Some("not-a-jwt".to_string()));
        assert_eq!(resolver.current_tenant().await, None);
    }
}
