/// Common utilities shared by the invocation and file channels

/// Build a standardized User-Agent string for all XMLMC and file channel requests
pub fn build_user_agent() -> String {
    format!("espapi-rust/{} (XMLMC)", env!("CARGO_PKG_VERSION"))
}

/// Joins a base URL and any number of path pieces with exactly one slash between them.
///
/// Empty pieces are skipped; leading and trailing slashes on each piece are ignored.
pub fn join_url(base: &str, pieces: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for piece in pieces {
        let clean = piece.trim_matches('/');
        if clean.is_empty() {
            continue;
        }
        url.push('/');
        url.push_str(clean);
    }
    url
}

/// Percent-encodes every segment of a slash separated path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
