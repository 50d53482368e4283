use crate::{
    auth::{hash_password, verify_password},
    entities::customer::{self, Entity as CustomerEntity},
    errors::ServiceError,
    events::Event,
    handlers::common,
    AppState,
};
use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, SqlErr};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "invalid email address"))]
    #[schema(example = "mycophile@example.com")]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "name must not be empty"))]
    #[schema(example = "Myco Phile")]
    pub full_name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub customer: CustomerResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomerResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
}

impl From<customer::Model> for CustomerResponse {
    fn from(model: customer::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            full_name: model.full_name,
        }
    }
}

/// Creates a customer account and returns a session token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid input", body = crate::errors::ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    common::validate_input(&payload)?;

    let now = Utc::now();
    let active = customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(payload.email.trim().to_lowercase()),
        password_hash: Set(hash_password(&payload.password)?),
        full_name: Set(payload.full_name.trim().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let model = active.insert(&*state.db).await.map_err(|e| {
        if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            ServiceError::DuplicateRequest(
                "an account with this email already exists".to_string(),
            )
        } else {
            ServiceError::DatabaseError(e)
        }
    })?;

    info!(customer_id = %model.id, "customer registered");
    if let Err(e) = state
        .event_sender
        .send(Event::CustomerRegistered {
            customer_id: model.id,
        })
        .await
    {
        warn!(error = %e, "failed to send customer registered event");
    }

    let token = state.services.auth.issue_token(&model)?;
    Ok(common::created_response(AuthResponse {
        token,
        customer: model.into(),
    }))
}

/// Verifies credentials and returns a session token. Accounts still carrying
/// a legacy password hash are transparently upgraded to the current scheme on
/// successful login.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    common::validate_input(&payload)?;

    let customer = CustomerEntity::find()
        .filter(customer::Column::Email.eq(payload.email.trim().to_lowercase()))
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::AuthError("invalid email or password".to_string()))?;

    let outcome = verify_password(&payload.password, &customer.password_hash)?;
    if !outcome.valid {
        return Err(ServiceError::AuthError(
            "invalid email or password".to_string(),
        ));
    }

    if outcome.needs_rehash {
        // Upgrade is best-effort: a failure here must not block the login.
        match hash_password(&payload.password) {
            Ok(new_hash) => {
                let mut active: customer::ActiveModel = customer.clone().into();
                active.password_hash = Set(new_hash);
                active.updated_at = Set(Utc::now());
                if let Err(e) = active.update(&*state.db).await {
                    warn!(customer_id = %customer.id, error = %e, "password rehash failed");
                } else {
                    info!(customer_id = %customer.id, "legacy password hash upgraded");
                }
            }
            Err(e) => warn!(customer_id = %customer.id, error = %e, "password rehash failed"),
        }
    }

    let token = state.services.auth.issue_token(&customer)?;
    Ok(common::success_response(AuthResponse {
        token,
        customer: customer.into(),
    }))
}
