//! Common types used across Sitecraft

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Tenant (site) ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Payment status
// =============================================================================

/// Lifecycle state of one purchase attempt.
///
/// `pending` is the only non-terminal state. `paid` may later become
/// `refunded`; nothing ever returns to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Whether the purchase attempt has reached an outcome
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(SharedError::UnknownPaymentStatus(s.to_string())),
        }
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Platform-level role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    #[default]
    User,
    Admin,
}

impl PlatformRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "platform_user",
            Self::Admin => "platform_admin",
        }
    }
}

impl std::fmt::Display for PlatformRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlatformRole {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "platform_user" | "user" => Ok(Self::User),
            "platform_admin" | "admin" => Ok(Self::Admin),
            _ => Err(SharedError::UnknownRole(s.to_string())),
        }
    }
}

/// The caller of a billing operation, produced once at the session boundary.
///
/// Billing code trusts this value and never re-validates credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
    pub role: PlatformRole,
}

impl AuthenticatedUser {
    pub fn new(user_id: UserId, email: impl Into<String>, role: PlatformRole) -> Self {
        Self {
            user_id,
            email: email.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == PlatformRole::Admin
    }
}

/// Case-insensitive allow-list of platform administrator emails
#[derive(Debug, Clone, Default)]
pub struct AdminEmails {
    emails: Vec<String>,
}

impl AdminEmails {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { emails }
    }

    /// Parse a comma-separated list (the `ADMIN_EMAILS` format)
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, email: &str) -> bool {
        let normalized = email.trim().to_lowercase();
        !normalized.is_empty() && self.emails.iter().any(|e| *e == normalized)
    }

    /// Resolve the effective role: listed emails are always admins
    pub fn resolve_role(&self, email: &str, claimed: PlatformRole) -> PlatformRole {
        if self.contains(email) {
            PlatformRole::Admin
        } else {
            claimed
        }
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_round_trips_through_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
        assert_eq!("PAID".parse::<PaymentStatus>(), Ok(PaymentStatus::Paid));
    }

    #[test]
    fn test_unknown_payment_status_is_rejected() {
        assert!(matches!(
            "processing".parse::<PaymentStatus>(),
            Err(SharedError::UnknownPaymentStatus(_))
        ));
    }

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
    }

    #[test]
    fn test_admin_emails_are_case_insensitive() {
        let admins = AdminEmails::from_csv(" Owner@Example.com , ,ops@example.com");
        assert_eq!(admins.len(), 2);
        assert!(admins.contains("owner@example.com"));
        assert!(admins.contains("  OPS@example.COM "));
        assert!(!admins.contains(""));
        assert!(!admins.contains("someone@example.com"));
    }

    #[test]
    fn test_listed_email_is_promoted_to_admin() {
        let admins = AdminEmails::new(["boss@example.com"]);
        assert_eq!(
            admins.resolve_role("boss@example.com", PlatformRole::User),
            PlatformRole::Admin
        );
        assert_eq!(
            admins.resolve_role("user@example.com", PlatformRole::User),
            PlatformRole::User
        );
        assert_eq!(
            admins.resolve_role("user@example.com", PlatformRole::Admin),
            PlatformRole::Admin
        );
    }

    #[test]
    fn test_platform_role_parsing() {
        assert_eq!("platform_admin".parse::<PlatformRole>(), Ok(PlatformRole::Admin));
        assert_eq!("user".parse::<PlatformRole>(), Ok(PlatformRole::User));
        assert!("root".parse::<PlatformRole>().is_err());
    }
}
