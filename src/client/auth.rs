//! Adobe connect authentication ("San Jose" digest scheme)
//!
//! A server that wants credentials rejects the first connect with a
//! description like:
//!
//! ```text
//! [ AccessManager.Reject ] : [ authmod=adobe ] :
//!     ?reason=needauth&user=alice&salt=abc123&challenge=xyz&opaque=qqq
//! ```
//!
//! The client answers by reissuing connect with `challenge` and `response`
//! query parameters appended to the app and tcUrl, where
//!
//! ```text
//! response = b64md5( b64md5(user + salt + password)
//!                    + (opaque or server challenge)
//!                    + client_challenge )
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};

use crate::client::config::Credentials;
use crate::error::{AuthError, Result};

/// Challenge parameters pulled out of a rejection description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub salt: String,
    pub challenge: Option<String>,
    pub opaque: Option<String>,
}

/// How to react to a NetConnection.Connect.Rejected description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Server sent a digest challenge; reissue connect with a response
    Challenge(AuthChallenge),
    /// Server wants auth mode announced first; reissue with
    /// `?authmod=adobe&user=...`
    NeedsAuthMod,
    /// Credentials were refused; do not retry
    Fatal(String),
    /// Not an auth rejection at all
    Other,
}

/// Classify a connect rejection description.
///
/// `needauth` is checked before the bare `authmod=adobe` marker because
/// challenge descriptions contain both.
pub fn classify_rejection(description: &str) -> Rejection {
    if description.contains("reason=nosuchuser") {
        return Rejection::Fatal("nosuchuser".into());
    }
    if description.contains("reason=authfailed") {
        return Rejection::Fatal("authfailed".into());
    }
    if description.contains("reason=needauth") {
        return match parse_challenge(description) {
            Ok(challenge) => Rejection::Challenge(challenge),
            Err(_) => Rejection::Fatal("malformed challenge".into()),
        };
    }
    if description.contains("authmod=adobe") {
        return Rejection::NeedsAuthMod;
    }
    Rejection::Other
}

/// Parse the query following '?' in a rejection description
pub fn parse_challenge(description: &str) -> Result<AuthChallenge> {
    let query = description
        .split_once('?')
        .map(|(_, q)| q)
        .ok_or_else(|| AuthError::MalformedChallenge(description.to_string()))?;

    let mut salt = None;
    let mut challenge = None;
    let mut opaque = None;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            match key {
                "salt" => salt = Some(value.to_string()),
                "challenge" => challenge = Some(value.to_string()),
                "opaque" => opaque = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(AuthChallenge {
        salt: salt.ok_or_else(|| AuthError::MalformedChallenge(description.to_string()))?,
        challenge,
        opaque,
    })
}

/// Query suffix for the very first authenticated connect attempt
pub fn auth_mod_query(user: &str) -> String {
    format!("?authmod=adobe&user={}", user)
}

/// Query suffix answering a digest challenge. Appended after
/// [`auth_mod_query`] on the retried connect.
pub fn challenge_response_query(credentials: &Credentials, challenge: &AuthChallenge) -> String {
    let client_challenge = format!("{:08x}", rand::random::<u32>());
    build_response_query(credentials, challenge, &client_challenge)
}

fn build_response_query(
    credentials: &Credentials,
    challenge: &AuthChallenge,
    client_challenge: &str,
) -> String {
    let mut response = md5_base64(&format!(
        "{}{}{}",
        credentials.user, challenge.salt, credentials.password
    ));

    let mut query = String::new();
    if let Some(opaque) = &challenge.opaque {
        query.push_str("&opaque=");
        query.push_str(opaque);
        response.push_str(opaque);
    } else if let Some(server_challenge) = &challenge.challenge {
        response.push_str(server_challenge);
    }

    response.push_str(client_challenge);
    let response = md5_base64(&response);

    query.push_str("&challenge=");
    query.push_str(client_challenge);
    query.push_str("&response=");
    query.push_str(&response);
    query
}

/// base64 of the raw MD5 digest
fn md5_base64(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    BASE64.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REJECT_NEEDAUTH: &str = "[ AccessManager.Reject ] : [ authmod=adobe ] : \
        ?reason=needauth&user=alice&salt=abc&challenge=srv1&opaque=op1";

    fn creds() -> Credentials {
        Credentials {
            user: "alice".into(),
            password: "s3cret".into(),
        }
    }

    #[test]
    fn test_md5_base64_known_answers() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_base64(""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(md5_base64("abc"), "kAFQmDzST7DWlj99KOF/cg==");
    }

    #[test]
    fn test_parse_challenge() {
        let challenge = parse_challenge(REJECT_NEEDAUTH).unwrap();
        assert_eq!(challenge.salt, "abc");
        assert_eq!(challenge.challenge.as_deref(), Some("srv1"));
        assert_eq!(challenge.opaque.as_deref(), Some("op1"));
    }

    #[test]
    fn test_parse_challenge_requires_salt() {
        assert!(parse_challenge("?reason=needauth&user=alice").is_err());
        assert!(parse_challenge("no query here").is_err());
    }

    #[test]
    fn test_classification() {
        assert!(matches!(
            classify_rejection(REJECT_NEEDAUTH),
            Rejection::Challenge(_)
        ));
        assert_eq!(
            classify_rejection("[ AccessManager.Reject ] : [ authmod=adobe ] : authenticate"),
            Rejection::NeedsAuthMod
        );
        assert_eq!(
            classify_rejection("?reason=nosuchuser&user=bob"),
            Rejection::Fatal("nosuchuser".into())
        );
        assert_eq!(
            classify_rejection("?reason=authfailed"),
            Rejection::Fatal("authfailed".into())
        );
        assert_eq!(classify_rejection("stream is full"), Rejection::Other);
        // needauth wins over the authmod marker it also contains
        assert!(matches!(
            classify_rejection("authmod=adobe ?reason=needauth&salt=x"),
            Rejection::Challenge(_)
        ));
    }

    #[test]
    fn test_response_uses_opaque_when_present() {
        let challenge = AuthChallenge {
            salt: "abc".into(),
            challenge: Some("srv1".into()),
            opaque: Some("op1".into()),
        };
        let query = build_response_query(&creds(), &challenge, "00c0ffee");

        let digest1 = md5_base64("aliceabcs3cret");
        let expected = md5_base64(&format!("{}op100c0ffee", digest1));
        assert_eq!(
            query,
            format!("&opaque=op1&challenge=00c0ffee&response={}", expected)
        );
    }

    #[test]
    fn test_response_falls_back_to_server_challenge() {
        let challenge = AuthChallenge {
            salt: "abc".into(),
            challenge: Some("srv1".into()),
            opaque: None,
        };
        let query = build_response_query(&creds(), &challenge, "00c0ffee");

        let digest1 = md5_base64("aliceabcs3cret");
        let expected = md5_base64(&format!("{}srv100c0ffee", digest1));
        assert_eq!(
            query,
            format!("&challenge=00c0ffee&response={}", expected)
        );
    }

    #[test]
    fn test_client_challenge_is_eight_hex_chars() {
        let challenge = AuthChallenge {
            salt: "s".into(),
            challenge: None,
            opaque: None,
        };
        let query = challenge_response_query(&creds(), &challenge);
        let challenge_param = query
            .split('&')
            .find_map(|p| p.strip_prefix("challenge="))
            .unwrap();
        assert_eq!(challenge_param.len(), 8);
        assert!(challenge_param.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_auth_mod_query() {
        assert_eq!(auth_mod_query("alice"), "?authmod=adobe&user=alice");
    }
}
