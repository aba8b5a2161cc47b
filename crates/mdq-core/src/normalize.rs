//! URL canonicalization for deduplication.
//!
//! The dedup key is the submitted URL with tracking noise removed and,
//! for known short-link hosts, redirects resolved to the final
//! destination. Resolution failures fall back to the raw URL so a dead
//! shortener can never block submission.

use anyhow::Result;
use tokio::process::Command;
use url::Url;

/// Query parameters that identify the share, not the content.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "igsh",
    "si",
    "feature",
    "spm_id_from",
    "_t",
    "_r",
];

/// Hosts that are pure redirectors; the target, not the short form,
/// is the canonical identity of the content.
const SHORT_LINK_HOSTS: &[&str] = &[
    "vm.tiktok.com",
    "vt.tiktok.com",
    "bit.ly",
    "t.co",
    "tinyurl.com",
    "goo.gl",
];

fn is_tracking_param(name: &str) -> bool {
    TRACKING_PARAMS.contains(&name)
        || name.starts_with("utm_")
        || name.starts_with("share_")
}

/// Deterministic canonical form of a URL: lowercased scheme/host (via
/// the parser), fragment dropped, tracking parameters stripped, default
/// ports elided, trailing slash trimmed on non-root paths. Unparseable
/// input is returned trimmed but otherwise unchanged.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(n, v)| (n.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter())
            .finish();
        url.set_query(Some(&query));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

/// Whether this URL points at a known short-link redirector.
pub fn is_short_link(raw: &str) -> bool {
    Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| SHORT_LINK_HOSTS.contains(&h)))
        .unwrap_or(false)
}

/// Follow redirects to the effective URL using a curl child process.
pub async fn resolve_short_link(raw: &str) -> Result<String> {
    let output = Command::new("curl")
        .arg("-Ls")
        .arg("-o")
        .arg("/dev/null")
        .arg("-w")
        .arg("%{url_effective}")
        .arg("--max-time")
        .arg("15")
        .arg(raw)
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!("curl exited with {}", output.status);
    }
    let resolved = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if resolved.is_empty() {
        anyhow::bail!("curl returned no effective url");
    }
    Ok(resolved)
}

/// Compute the dedup key for a submitted URL: resolve known short links
/// (falling back to the raw URL on any failure), then normalize.
pub async fn dedup_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_short_link(trimmed) {
        match resolve_short_link(trimmed).await {
            Ok(resolved) => return normalize_url(&resolved),
            Err(e) => {
                tracing::warn!("short-link resolution failed for {}: {:#}", trimmed, e);
            }
        }
    }
    normalize_url(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_params_keeps_content_params() {
        assert_eq!(
            normalize_url("https://example.com/watch?v=abc&utm_source=share&utm_medium=web"),
            "https://example.com/watch?v=abc"
        );
        assert_eq!(
            normalize_url("https://example.com/clip?fbclid=xyz&id=42"),
            "https://example.com/clip?id=42"
        );
    }

    #[test]
    fn drops_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/a/b/#comments"),
            "https://example.com/a/b"
        );
        // Root path keeps its slash.
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn lowercases_host_and_elides_default_port() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM:443/Video"),
            "https://example.com/Video"
        );
    }

    #[test]
    fn all_tracking_query_removed_entirely() {
        assert_eq!(
            normalize_url("https://example.com/v?utm_source=a&utm_campaign=b&si=c"),
            "https://example.com/v"
        );
    }

    #[test]
    fn deterministic() {
        let raw = "https://example.com/v?id=1&utm_source=x#top";
        assert_eq!(normalize_url(raw), normalize_url(&normalize_url(raw)));
    }

    #[test]
    fn unparseable_input_passes_through_trimmed() {
        assert_eq!(normalize_url("  not a url  "), "not a url");
    }

    #[test]
    fn short_link_host_detection() {
        assert!(is_short_link("https://vm.tiktok.com/ZMabc123/"));
        assert!(is_short_link("https://t.co/xyz"));
        assert!(!is_short_link("https://www.tiktok.com/@user/video/1"));
        assert!(!is_short_link("nonsense"));
    }

    #[test]
    fn query_values_stay_encoded() {
        assert_eq!(
            normalize_url("https://example.com/v?q=a%26b&utm_source=x"),
            "https://example.com/v?q=a%26b"
        );
    }
}
