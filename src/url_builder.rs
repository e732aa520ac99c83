//! URL resolution: base URL, base path, search parameters and the after-build-url chain.

use crate::config::{join_path, RequestConfig};
use crate::hooks::AfterBuildUrlHook;
use crate::Result;
use std::sync::Arc;
use url::Url;

/// Base URL used when no `base_url` is configured on any layer.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1";

/// Resolves `raw` against the configured base URL and prefixes the base path.
///
/// `raw` may be a relative path or an absolute URL. The base path seam always
/// carries exactly one slash.
pub fn prepare_url(raw: &str, config: &RequestConfig) -> Result<Url> {
    let base = match &config.base_url {
        Some(base) => base.clone(),
        None => Url::parse(DEFAULT_BASE_URL)?,
    };
    let mut url = base.join(raw)?;

    if let Some(base_path) = config.base_path.as_deref().filter(|p| !p.is_empty()) {
        let path = join_path(base_path, url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Replaces the query string with `params`, serialized in the given order.
///
/// An empty list removes the query entirely.
pub fn apply_search_params(url: &mut Url, params: &[(String, String)]) {
    url.set_query(None);
    if params.is_empty() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in params {
        pairs.append_pair(key, value);
    }
}

/// Runs the after-build-url chain; each replacement feeds the next hook.
pub(crate) fn run_after_build_url(url: Url, hooks: &[Arc<dyn AfterBuildUrlHook>]) -> Url {
    hooks
        .iter()
        .fold(url, |url, hook| hook.after_build_url(&url).unwrap_or(url))
}

/// Full URL build: base URL, base path, search params, then the after-build-url chain.
pub(crate) fn build_url(
    raw: &str,
    config: &RequestConfig,
    hooks: &[Arc<dyn AfterBuildUrlHook>],
) -> Result<Url> {
    let mut url = prepare_url(raw, config)?;
    if let Some(params) = &config.search_params {
        apply_search_params(&mut url, params);
    }
    Ok(run_after_build_url(url, hooks))
}
