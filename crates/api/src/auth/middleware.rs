//! Session boundary: bearer token in, [`AuthenticatedUser`] out

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sitecraft_shared::{AdminEmails, AuthenticatedUser, PlatformRole, UserId};

use super::jwt::{Claims, JwtError};
use crate::{error::ApiError, state::AppState};

fn bearer_token(request: &Request) -> Result<&str, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// Build the principal from validated claims.
///
/// Emails on the admin list are promoted regardless of the token role.
pub fn principal_from_claims(claims: &Claims, admin_emails: &AdminEmails) -> AuthenticatedUser {
    let claimed = claims.role.parse().unwrap_or_else(|_| {
        tracing::warn!(user_id = %claims.sub, role = %claims.role, "Unknown role in token");
        PlatformRole::User
    });
    let role = admin_emails.resolve_role(&claims.email, claimed);

    AuthenticatedUser::new(UserId(claims.sub), claims.email.clone(), role)
}

/// Require a valid session token; inserts `AuthenticatedUser` into request extensions
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)?;

    let claims = state.jwt.validate_token(token).map_err(|e| {
        match e {
            JwtError::Expired => tracing::debug!("Expired session token"),
            other => tracing::warn!(error = %other, "Rejected session token"),
        }
        ApiError::InvalidToken
    })?;

    let user = principal_from_claims(&claims, &state.config.admin_emails);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Require `PlatformRole::Admin`. Must run after [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(ApiError::Unauthorized)?;

    if !user.is_admin() {
        tracing::warn!(user_id = %user.user_id, "Non-admin attempted admin route");
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claims(email: &str, role: &str) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            email: email.to_string(),
            role: role.to_string(),
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_admin_email_promotes_role() {
        let admins = AdminEmails::from_csv("root@example.com");

        let user = principal_from_claims(&claims("Root@Example.com", "platform_user"), &admins);
        assert_eq!(user.role, PlatformRole::Admin);

        let user = principal_from_claims(&claims("someone@example.com", "platform_user"), &admins);
        assert_eq!(user.role, PlatformRole::User);
    }

    #[test]
    fn test_token_role_is_honoured() {
        let user = principal_from_claims(
            &claims("ops@example.com", "platform_admin"),
            &AdminEmails::default(),
        );
        assert!(user.is_admin());
    }

    #[test]
    fn test_unknown_role_downgrades_to_user() {
        let user = principal_from_claims(&claims("x@example.com", "superuser"), &AdminEmails::default());
        assert_eq!(user.role, PlatformRole::User);
    }
}
