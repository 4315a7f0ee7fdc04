//! Ambient HTTP-host helpers shared by `server`/`main`: CORS policy and
//! the JSON error-response shape, adapted from the teacher's `util.rs`.

use actix_web::HttpResponse;
use serde_json::json;

/// Build a JSON error body `{"error": {"message", "transaction_id"}}`
/// at the given status code, matching the orchestrator's error-response
/// shape (§4.8 steps 5-6): no internal detail beyond `message` is leaked.
pub fn error_response(status_code: u16, message: &str, transaction_id: Option<&str>) -> HttpResponse {
    let mut error = json!({ "message": message });
    if let Some(id) = transaction_id {
        error["transaction_id"] = serde_json::Value::String(id.to_string());
    }
    let status = actix_web::http::StatusCode::from_u16(status_code)
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(json!({ "error": error }))
}

/// Env-var-driven CORS policy: `CORS_ALLOWED_ORIGINS`/`_METHODS`/`_HEADERS`
/// (comma-separated, or `*`) and `CORS_ALLOW_CREDENTIALS`. Defaults to
/// wide-open, matching the teacher's `cors_config_from_env`.
pub fn cors_config_from_env() -> actix_cors::Cors {
    let mut cors = actix_cors::Cors::default();

    match std::env::var("CORS_ALLOWED_ORIGINS") {
        Ok(origins) if origins.trim() == "*" => cors = cors.allow_any_origin(),
        Ok(origins) => {
            for part in origins.split(',') {
                let p = part.trim();
                if !p.is_empty() {
                    cors = cors.allowed_origin(p);
                }
            }
        }
        Err(_) => cors = cors.allow_any_origin(),
    }

    match std::env::var("CORS_ALLOWED_METHODS") {
        Ok(methods) if methods.trim() == "*" => cors = cors.allow_any_method(),
        Ok(methods) => {
            let list: Vec<&str> = methods.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()).collect();
            if list.is_empty() {
                cors = cors.allow_any_method();
            } else {
                cors = cors.allowed_methods(list);
            }
        }
        Err(_) => cors = cors.allow_any_method(),
    }

    match std::env::var("CORS_ALLOWED_HEADERS") {
        Ok(headers) if headers.trim() == "*" => cors = cors.allow_any_header(),
        Ok(headers) => {
            for part in headers.split(',') {
                let p = part.trim();
                if !p.is_empty() {
                    cors = cors.allowed_header(p);
                }
            }
        }
        Err(_) => cors = cors.allow_any_header(),
    }

    if let Ok(val) = std::env::var("CORS_ALLOW_CREDENTIALS") {
        let v = val.trim().to_ascii_lowercase();
        if v == "1" || v == "true" || v == "yes" || v == "on" {
            cors = cors.supports_credentials();
        }
    }

    cors
}
