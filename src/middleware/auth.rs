/*!
 * Authentication Middleware
 *
 * Tokens are issued by the external identity layer (OAuth admin login
 * and LIFF patient login); this middleware only verifies them and adds
 * the caller context to request extensions. Staff tokens carry the user
 * id and clinic-scoped roles; LIFF tokens carry the patient id.
 */

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::handlers::AppState;
use crate::models::{ActorKind, AuthContext, Role};
use crate::utils::AppError;

/// Token claims shared with the identity layer
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id for staff tokens, patient id for LIFF tokens
    pub sub: String,
    pub clinic_id: i64,
    /// "clinic_staff" or "patient"
    pub actor: String,
    /// Clinic-scoped role names; empty for patients
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize,
}

/// Verify the bearer token and insert an `AuthContext` extension
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return Err(AppError::Unauthorized(
                "Missing or invalid authorization header".to_string(),
            ))
        }
    };

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.auth.secret.as_bytes()),
        &Validation::default(),
    )?;
    let claims = token_data.claims;

    let subject: i64 = claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("Invalid subject in token".to_string()))?;

    let context = match claims.actor.as_str() {
        "patient" => AuthContext {
            user_id: None,
            patient_id: Some(subject),
            clinic_id: claims.clinic_id,
            roles: Vec::new(),
            actor: ActorKind::Patient,
        },
        "clinic_staff" => {
            let roles: Vec<Role> = claims
                .roles
                .iter()
                .filter_map(|role| Role::from_str(role))
                .collect();
            AuthContext {
                user_id: Some(subject),
                patient_id: None,
                clinic_id: claims.clinic_id,
                roles,
                actor: ActorKind::ClinicStaff,
            }
        }
        _ => return Err(AppError::Unauthorized("Invalid actor in token".to_string())),
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_claims_round_trip() {
        let claims = Claims {
            sub: "42".to_string(),
            clinic_id: 7,
            actor: "clinic_staff".to_string(),
            roles: vec!["admin".to_string(), "practitioner".to_string()],
            exp: 4_102_444_800, // 2100-01-01
        };
        let secret = b"test-secret";
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "42");
        assert_eq!(decoded.claims.clinic_id, 7);
        assert_eq!(decoded.claims.roles.len(), 2);
    }
}
