//! Student identity and bearer-token claims

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::StudentId;
use crate::error::AppError;

/// Student as provisioned by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Student {
    #[schema(value_type = i64)]
    pub id: StudentId,
    pub name: String,
}

impl Student {
    pub fn new(id: StudentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// JWT claims minted by the identity collaborator.
///
/// The server only verifies these; it never issues tokens outside of tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentClaims {
    pub sub: String,
    pub student_id: StudentId,
    pub exp: i64,
    pub iat: i64,
    /// Extra grants, e.g. `catalog` for the catalog collaborator's service account
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Scope required by the catalog-facing endpoints
pub const CATALOG_SCOPE: &str = "catalog";

impl StudentClaims {
    /// Encode the claims as an HS256 token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse and verify a token (signature and expiry)
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Require the catalog scope
    pub fn require_catalog(&self) -> Result<(), AppError> {
        if self.has_scope(CATALOG_SCOPE) {
            Ok(())
        } else {
            Err(AppError::Authorization(
                "Catalog access required".to_string(),
            ))
        }
    }
}
