use thiserror::Error;
use url::Url;

/// Errors that can occur while resolving a media or channel URL.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed, even against the base.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// A relative URL was given but there is no base to resolve it against.
    #[error("Relative URL {0:?} has no base to resolve against")]
    MissingBase(String),
}

/// Resolves a URL for publication in the feed.
///
/// Absolute URLs are parsed as-is. Relative URLs (for example a stored
/// upload path) are joined onto `base`, normally the channel site URL.
/// Podcast clients only fetch over HTTP, so any other scheme is rejected.
///
/// # Errors
///
/// Returns [`UrlError`] if:
/// - The URL cannot be parsed ([`UrlError::InvalidUrl`])
/// - The URL is relative and `base` is `None` ([`UrlError::MissingBase`])
/// - The resolved scheme is not `http` or `https` ([`UrlError::UnsupportedScheme`])
///
/// # Examples
///
/// ```
/// use castfeed::util::resolve_url;
///
/// let url = resolve_url("https://cdn.example.com/a.mp3", None).unwrap();
/// assert_eq!(url.host_str(), Some("cdn.example.com"));
///
/// // Relative paths resolve against the base
/// let url = resolve_url("/media/7", Some("https://example.com/blog")).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/media/7");
///
/// // Rejects non-HTTP schemes
/// assert!(resolve_url("file:///etc/passwd", None).is_err());
/// ```
pub fn resolve_url(raw: &str, base: Option<&str>) -> Result<Url, UrlError> {
    let raw = raw.trim();
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => Url::parse(base)?.join(raw)?,
            None => return Err(UrlError::MissingBase(raw.to_owned())),
        },
        Err(e) => return Err(e.into()),
    };

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }
}
