//! # Catalog Payload Types
//!
//! The structured payloads carried by catalog messages. Field names follow
//! the wire (camelCase), since the other side of the boundary may not be
//! Rust. The correlation protocol itself treats all of these as opaque.

use serde::Deserialize;
use serde::Serialize;

/// Public half of a stored key, safe to hand to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosigner_of: Option<String>,
    pub name: String,
    /// Whether the private half is password-protected.
    pub password: bool,
    pub public_key: String,
    pub testnet: bool,
}

/// Private half of a stored key. Only ever crosses the boundary inside
/// `GetPrivateKeyData` / `SaveKey`, after the platform side has checked the
/// password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyData {
    pub private_key: String,
}

/// Persisted app settings. Every field is optional: the renderer sends and
/// receives partial updates, and absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreed_to_terms_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biometric_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_memos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multisignature: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testnet: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_services: Option<Vec<TrustedService>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedService {
    pub domain: String,
    pub signing_key: String,
}

/// A local (non-push) notification to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalNotification {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricAvailability {
    pub available: bool,
    pub enrolled: bool,
}

/// Mirrors the web Notification permission strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPermission {
    Granted,
    Denied,
    Default,
}
