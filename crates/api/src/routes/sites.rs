//! Site (tenant) and page creation, gated by the owner's plan

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sitecraft_billing::ResourceClass;
use sitecraft_shared::{AuthenticatedUser, TenantId};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub name: String,
    /// Derived from `name` when omitted
    pub slug: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SiteResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct CreatePageRequest {
    pub title: String,
    pub slug: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PageResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub slug: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Lowercase ASCII alphanumerics separated by single dashes
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

fn validated_name(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(value.to_string())
}

fn resolved_slug(explicit: Option<&str>, fallback: &str) -> Result<String, ApiError> {
    let slug = slugify(explicit.unwrap_or(fallback));
    if slug.is_empty() {
        return Err(ApiError::Validation(
            "slug must contain at least one letter or digit".to_string(),
        ));
    }
    Ok(slug)
}

/// Run the entitlement gate; applies whether or not billing is enabled
async fn enforce_limit(
    state: &AppState,
    user: &AuthenticatedUser,
    resource: ResourceClass,
) -> Result<(), ApiError> {
    state
        .entitlements
        .gate
        .check(user.user_id, resource)
        .await
        .map_err(|e| {
            tracing::info!(user_id = %user.user_id, resource = ?resource, error = %e, "Creation blocked by plan");
            ApiError::from(e)
        })
}

/// Sites the caller belongs to
pub async fn list_sites(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<SiteResponse>>, ApiError> {
    let sites = sqlx::query_as::<_, SiteResponse>(
        r#"
        SELECT t.id, t.name, t.slug, tu.role, t.created_at
        FROM tenants t
        JOIN tenant_users tu ON tu.tenant_id = t.id
        WHERE tu.user_id = $1
        ORDER BY t.created_at
        "#,
    )
    .bind(user.user_id.0)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(sites))
}

/// Create a site owned by the caller
pub async fn create_site(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<SiteResponse>), ApiError> {
    let name = validated_name("name", &req.name)?;
    let slug = resolved_slug(req.slug.as_deref(), &name)?;

    enforce_limit(&state, &user, ResourceClass::Site).await?;

    // Tenant and owner link land together or not at all
    let mut tx = state.pool.begin().await?;

    let (id, created_at): (Uuid, OffsetDateTime) = sqlx::query_as(
        "INSERT INTO tenants (name, slug) VALUES ($1, $2) RETURNING id, created_at",
    )
    .bind(&name)
    .bind(&slug)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO tenant_users (tenant_id, user_id, role) VALUES ($1, $2, 'owner')")
        .bind(id)
        .bind(user.user_id.0)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.user_id, tenant_id = %id, slug = %slug, "Site created");

    Ok((
        StatusCode::CREATED,
        Json(SiteResponse {
            id,
            name,
            slug,
            role: "owner".to_string(),
            created_at,
        }),
    ))
}

/// Create a page under a site the caller belongs to
pub async fn create_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<CreatePageRequest>,
) -> Result<(StatusCode, Json<PageResponse>), ApiError> {
    let title = validated_name("title", &req.title)?;
    let slug = resolved_slug(req.slug.as_deref(), &title)?;

    // Non-members get 404 so site ids are not probeable
    let member: Option<String> =
        sqlx::query_scalar("SELECT role FROM tenant_users WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user.user_id.0)
            .fetch_optional(&state.pool)
            .await?;
    if member.is_none() {
        return Err(ApiError::NotFound);
    }

    enforce_limit(
        &state,
        &user,
        ResourceClass::Page {
            tenant_id: TenantId(tenant_id),
        },
    )
    .await?;

    let page = sqlx::query_as::<_, PageResponse>(
        r#"
        INSERT INTO pages (tenant_id, title, slug)
        VALUES ($1, $2, $3)
        RETURNING id, tenant_id, title, slug, created_at
        "#,
    )
    .bind(tenant_id)
    .bind(&title)
    .bind(&slug)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(user_id = %user.user_id, tenant_id = %tenant_id, page_id = %page.id, "Page created");

    Ok((StatusCode::CREATED, Json(page)))
}
