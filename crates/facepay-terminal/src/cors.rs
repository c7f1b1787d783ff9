//! CORS configuration for the terminal service.

use actix_cors::Cors;
use actix_web::http::header;

/// Build the CORS middleware from allowed origins.
///
/// With no configured origins, `http://localhost` on any port is allowed so a
/// display running on the same machine can talk to the service.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            if allowed.is_empty() {
                origin_str == "http://localhost" || origin_str.starts_with("http://localhost:")
            } else {
                allowed.iter().any(|a| a == origin_str)
            }
        })
        .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
        ])
        .max_age(3600)
}
