//! Default User-Agent string for download traffic.
//!
//! Identifies the tool and its version so server operators can tell chunked
//! resume traffic apart from browsers (RFC 9308).

/// Default User-Agent for download requests.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("chunkdl/{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_agent_contains_crate_version() {
        let ua = default_user_agent();
        assert_eq!(ua.strip_prefix("chunkdl/"), Some(env!("CARGO_PKG_VERSION")));
    }
}
