//! HTTP Basic credentials shared by source uploads and admin requests.
//!
//! One shared password per role; the user name is accepted as sent.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{StreamError, StreamResult};

/// Decoded Basic credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Parses an `Authorization: Basic ...` header value.
///
/// Returns `None` for other schemes, bad base64, or a missing `:`.
pub fn parse_basic(header: &str) -> Option<Credentials> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some(Credentials {
        user: user.to_string(),
        password: password.to_string(),
    })
}

/// Checks an optional `Authorization` header against the role password.
pub fn require_password(
    header: Option<&str>,
    password: &str,
    realm: &'static str,
) -> StreamResult<Credentials> {
    match header.and_then(parse_basic) {
        Some(credentials) if credentials.password == password => Ok(credentials),
        _ => Err(StreamError::Unauthorized { realm }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_credentials() {
        // "source:hack:me" - password may contain colons
        let header = format!("Basic {}", STANDARD.encode("source:hack:me"));
        let creds = parse_basic(&header).unwrap();
        assert_eq!(creds.user, "source");
        assert_eq!(creds.password, "hack:me");
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(parse_basic("Bearer abc").is_none());
        assert!(parse_basic("Basic !!!").is_none());
        assert!(parse_basic(&format!("Basic {}", STANDARD.encode("nocolon"))).is_none());
    }

    #[test]
    fn wrong_password_yields_challenge_error() {
        let header = format!("Basic {}", STANDARD.encode("admin:nope"));
        let err = require_password(Some(&header), "admin", "Icecast Admin").unwrap_err();
        assert_eq!(
            err,
            StreamError::Unauthorized {
                realm: "Icecast Admin"
            }
        );
        assert!(require_password(None, "admin", "Icecast Admin").is_err());
    }
}
