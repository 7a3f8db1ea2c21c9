use super::BackendError;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A Vault session token obtained from a completed login.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: SecretString,
    pub accessor: String,
    pub policies: Vec<String>,
    pub lease_duration: u64,
    pub renewable: bool,
    pub entity_id: Option<String>,
}

/// Login MFA challenge returned instead of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaRequirement {
    pub mfa_request_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mfa_constraints: BTreeMap<String, MfaConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaConstraint {
    #[serde(default, deserialize_with = "null_as_default")]
    pub any: Vec<MfaMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaMethod {
    #[serde(rename = "type")]
    pub method_type: String,
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uses_passcode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum LoginResponse {
    Token(SessionToken),
    MfaRequired(MfaRequirement),
}

// Vault serializes unset slices and maps as `null`, e.g. every field but
// `mfa_requirement` on a login that still needs MFA.
#[derive(Debug, Deserialize)]
struct AuthBlock {
    #[serde(default, deserialize_with = "null_as_default")]
    client_token: String,
    #[serde(default, deserialize_with = "null_as_default")]
    accessor: String,
    #[serde(default, deserialize_with = "null_as_default")]
    policies: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    lease_duration: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    renewable: bool,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    mfa_requirement: Option<MfaRequirement>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl LoginResponse {
    /// Parse the `auth` block of a Vault login response.
    ///
    /// # Errors
    /// Returns `BackendError::InvalidResponse` when there is no `auth` block, it cannot be
    /// decoded, or it carries neither a client token nor an MFA requirement.
    pub fn from_response(body: &Value) -> Result<Self, BackendError> {
        let auth = body
            .get("auth")
            .filter(|auth| !auth.is_null())
            .ok_or_else(|| BackendError::InvalidResponse("no auth block found".to_string()))?;

        let auth: AuthBlock = serde_json::from_value(auth.clone())
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if let Some(requirement) = auth.mfa_requirement {
            return Ok(Self::MfaRequired(requirement));
        }

        if auth.client_token.is_empty() {
            return Err(BackendError::InvalidResponse(
                "no client_token found".to_string(),
            ));
        }

        Ok(Self::Token(SessionToken {
            token: SecretString::from(auth.client_token),
            accessor: auth.accessor,
            policies: auth.policies,
            lease_duration: auth.lease_duration,
            renewable: auth.renewable,
            entity_id: auth.entity_id.filter(|id| !id.is_empty()),
        }))
    }
}
