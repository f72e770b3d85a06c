use url::Url;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Reduces a URL to `scheme://host[:port]/path`, dropping query, fragment and
/// a single trailing slash. The root path stays `/`.
pub fn canonicalize_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw).map_err(|e| AppError::InvalidUrl(format!("{raw:?}: {e}")))?;

    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h,
        _ => {
            return Err(AppError::InvalidUrl(format!(
                "{raw:?}: url must have scheme and host"
            )))
        }
    };

    let path = parsed.path();
    let path = path.strip_suffix('/').unwrap_or(path);
    let path = if path.is_empty() { "/" } else { path };

    let canonical = match parsed.port() {
        Some(port) => format!("{}://{}:{}{}", parsed.scheme(), host, port, path),
        None => format!("{}://{}{}", parsed.scheme(), host, path),
    };
    Ok(canonical)
}

/// Deterministic article id: UUID v5 in the URL namespace over the canonical URL.
///
/// The scheme is part of the canonical form, so `http://` and `https://`
/// variants of the same page get different ids.
pub fn article_id_from_url(raw: &str) -> Result<String> {
    let canonical = canonicalize_url(raw)?;
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.as_bytes()).to_string())
}
