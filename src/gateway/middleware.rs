//! Cookie-token authentication middleware.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};

use super::AppState;

/// Name of the auth cookie set on register/login.
pub const TOKEN_COOKIE: &str = "token";

/// Authenticated user id, injected into request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = token_cookie(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    let user_id = state
        .auth
        .validate_token(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}

fn token_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|pair| {
            pair.strip_prefix(TOKEN_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn finds_token_among_other_cookies() {
        let headers = headers("session=abc; token=xyz; theme=dark");
        assert_eq!(token_cookie(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn ignores_lookalike_cookie_names() {
        let headers = headers("tokenish=abc; mytoken=def");
        assert_eq!(token_cookie(&headers), None);
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(token_cookie(&HeaderMap::new()), None);
    }
}
