use crate::models::ApiError;
use crate::supabase::SupabaseClient;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

/// Resolves bearer tokens to sellers: static service keys first, then
/// Supabase user access tokens.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, String>>,
    supabase: Option<SupabaseClient>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    ServiceKey,
    UserToken,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub seller_id: String,
    pub method: AuthMethod,
}

impl AuthState {
    pub fn from_env(supabase: Option<SupabaseClient>) -> Self {
        let keys = env::var("DEMO_API_KEYS")
            .map(|raw| parse_keys(&raw))
            .unwrap_or_default();
        if keys.is_empty() && supabase.is_none() {
            warn!(target = "furniflip.api", "no API keys and no Supabase auth configured; protected routes will reject every request");
        } else {
            info!(target = "furniflip.api", key_count = keys.len(), supabase = supabase.is_some(), "auth configured");
        }
        Self {
            keys: Arc::new(keys),
            supabase,
        }
    }

    async fn authenticate(&self, token: &str) -> Option<AuthContext> {
        if let Some(seller_id) = self.keys.get(token) {
            return Some(AuthContext {
                seller_id: seller_id.clone(),
                method: AuthMethod::ServiceKey,
            });
        }
        let client = self.supabase.as_ref()?;
        match client.user_id_for_token(token).await {
            Ok(Some(seller_id)) => Some(AuthContext {
                seller_id,
                method: AuthMethod::UserToken,
            }),
            Ok(None) => None,
            Err(err) => {
                warn!(target = "furniflip.api", error = %err, "supabase auth lookup failed");
                None
            }
        }
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(token) = extract_bearer(request.headers()) else {
        return Ok(unauthorized_response("missing_token", "Provide a Bearer token"));
    };
    let Some(context) = state.authenticate(&token).await else {
        return Ok(unauthorized_response("invalid_token", "Token not recognized"));
    };
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_bearer(headers: &http::HeaderMap) -> Option<String> {
    let raw = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(raw[6..].trim().to_string()).filter(|token| !token.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

/// `seller:key` pairs separated by commas.
fn parse_keys(raw: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once(':') {
            Some((seller, key)) if !seller.trim().is_empty() && !key.trim().is_empty() => {
                entries.insert(key.trim().to_string(), seller.trim().to_string());
            }
            _ => warn!(target = "furniflip.api", "ignored malformed DEMO_API_KEYS entry"),
        }
    }
    entries
}
