//! Input validation for source descriptors and composite identifiers.
//!
//! Composite ids join a source slug, a language code and a relative URL with
//! `/` and `@`. The slug and the language may never contain either separator,
//! and the URL parts are escaped so a literal `@` cannot split a chapter id
//! in the wrong place.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

/// Validation error types
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid source slug: {0}")]
    InvalidSlug(String),

    #[error("Invalid language code: {0}")]
    InvalidLang(String),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Invalid composite id: {0}")]
    InvalidId(String),
}

/// Validate a source slug.
///
/// Slugs are used in routes and composite ids, so only lowercase ASCII
/// letters, digits, `-` and `_` are accepted.
///
/// ```
/// use manga_mirrors::utils::validate_slug;
///
/// assert!(validate_slug("my_awesome-mirror").is_ok());
/// assert!(validate_slug("My Awesome Mirror").is_err());
/// ```
pub fn validate_slug(slug: &str) -> Result<&str, ValidationError> {
    if slug.is_empty() {
        return Err(ValidationError::InvalidSlug("empty slug".to_string()));
    }

    let valid = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if !valid {
        return Err(ValidationError::InvalidSlug(slug.to_string()));
    }

    Ok(slug)
}

/// Validate a language code (e.g. `en`, `pt-br`).
pub fn validate_lang(lang: &str) -> Result<&str, ValidationError> {
    let valid = !lang.is_empty()
        && lang
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !valid {
        return Err(ValidationError::InvalidLang(lang.to_string()));
    }

    Ok(lang)
}

/// Validate a source host and strip any trailing slash.
///
/// Only `http` and `https` hosts without a path, query or fragment are
/// accepted.
pub fn normalize_host(host: &str) -> Result<String, ValidationError> {
    let host = host.trim().trim_end_matches('/');

    if host.is_empty() {
        return Err(ValidationError::InvalidHost("empty host".to_string()));
    }

    let parsed = url::Url::parse(host).map_err(|e| ValidationError::InvalidHost(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidHost(format!(
                "invalid scheme: {}",
                other
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidHost(format!("no host in {}", host)));
    }

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(ValidationError::InvalidHost(format!(
            "host must not carry a path: {}",
            host
        )));
    }

    Ok(host.to_string())
}

/// Characters escaped in the URL part of a composite id
const ID_PART: &AsciiSet = &CONTROLS.add(b'%').add(b'@');

/// Escape the separator characters of a relative URL used in a composite id.
pub fn escape_id_part(part: &str) -> String {
    utf8_percent_encode(part, ID_PART).to_string()
}

/// Reverse [`escape_id_part`].
///
/// Only the exact output of [`escape_id_part`] is accepted, so ids have a
/// single spelling.
pub fn unescape_id_part(part: &str) -> Result<String, ValidationError> {
    if part.contains('@') {
        return Err(ValidationError::InvalidId(format!("unescaped separator in {}", part)));
    }

    let decoded = percent_decode_str(part)
        .decode_utf8()
        .map_err(|e| ValidationError::InvalidId(format!("{} in {}", e, part)))?;

    if escape_id_part(&decoded) != part {
        return Err(ValidationError::InvalidId(format!("unknown escape in {}", part)));
    }

    Ok(decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("mangahasu").is_ok());
        assert!(validate_slug("my_awesome-mirror2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("My Mirror").is_err());
        assert!(validate_slug("a/b").is_err());
        assert!(validate_slug("a@b").is_err());
    }

    #[test]
    fn test_validate_lang() {
        assert!(validate_lang("en").is_ok());
        assert!(validate_lang("pt-br").is_ok());
        assert!(validate_lang("").is_err());
        assert!(validate_lang("en/fr").is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(
            normalize_host("https://mangahasu.se/").unwrap(),
            "https://mangahasu.se"
        );
        assert_eq!(
            normalize_host("https://mangahasu.se").unwrap(),
            "https://mangahasu.se"
        );
        assert!(normalize_host("ftp://mangahasu.se").is_err());
        assert!(normalize_host("https://mangahasu.se/manga").is_err());
        assert!(normalize_host("not a url").is_err());
    }

    #[test]
    fn test_escape_round_trip() {
        let raw = "/weird@name-100%-abc-p1.html";
        let escaped = escape_id_part(raw);
        assert!(!escaped.contains('@'));
        assert_eq!(unescape_id_part(&escaped).unwrap(), raw);
    }

    #[test]
    fn test_unescape_rejects_unknown_escape() {
        assert!(unescape_id_part("/a%20b").is_err());
        assert!(unescape_id_part("/a%2").is_err());
        assert!(unescape_id_part("/a@b").is_err());
    }

    #[test]
    fn test_escape_id_part_encodes_only_separators() {
        assert_eq!(escape_id_part("/one-piece@vol%1"), "/one-piece%40vol%251");
        assert_eq!(escape_id_part("/a-b_c.html?p=1"), "/a-b_c.html?p=1");
        let accented = escape_id_part("/tên");
        assert!(accented.is_ascii());
        assert_eq!(unescape_id_part(&accented).unwrap(), "/tên");
        assert_eq!(unescape_id_part("/one-piece%40vol%251").unwrap(), "/one-piece@vol%1");
        assert!(unescape_id_part("/bad%ff").is_err());
    }
}
