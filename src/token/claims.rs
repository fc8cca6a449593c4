//! Claims carried inside a signed token.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::ldap::Identity;

/// Default token lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Assertion key holding the directory server the identity came from.
pub const ASSERTION_LDAP_SERVER: &str = "ldapServer";

/// Assertion key holding the resolved distinguished name.
pub const ASSERTION_USER_DN: &str = "userDN";

/// Directory attribute listing group memberships.
pub const MEMBER_OF_ATTRIBUTE: &str = "memberOf";

/// Information about an authenticated user, signed into the wire token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub username: String,
    /// Lower-cased group names, de-duplicated, in first-seen order.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub assertions: BTreeMap<String, String>,
    /// Unix epoch milliseconds.
    pub expiration: i64,
}

impl AuthToken {
    /// True once the current time has passed the expiration.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis > self.expiration
    }
}

/// Current time in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Expiration timestamp for a token issued at `issued_at_millis`.
pub fn expiration_after(issued_at_millis: i64, ttl: Duration) -> i64 {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    issued_at_millis.saturating_add(ttl_millis)
}

/// Build the claim set for a freshly authenticated identity.
///
/// The username is the first value of `username_attribute` when it is
/// configured and present on the entry, otherwise the entry's DN.
pub fn token_for_identity(
    identity: &Identity,
    ldap_server: &str,
    username_attribute: Option<&str>,
    ttl: Duration,
) -> AuthToken {
    let username = username_attribute
        .and_then(|attr| identity.first_value(attr))
        .filter(|value| !value.is_empty())
        .unwrap_or(identity.dn.as_str())
        .to_string();

    let mut assertions = BTreeMap::new();
    assertions.insert(ASSERTION_LDAP_SERVER.to_string(), ldap_server.to_string());
    assertions.insert(ASSERTION_USER_DN.to_string(), identity.dn.clone());

    AuthToken {
        username,
        groups: groups_from_member_of(identity.values(MEMBER_OF_ATTRIBUTE)),
        assertions,
        expiration: expiration_after(now_millis(), ttl),
    }
}

/// Extract group names from `memberOf` DNs.
///
/// Each DN contributes its first RDN value if that RDN is a `cn`. Values are
/// lower-cased; repeats are dropped keeping first-seen order.
pub fn groups_from_member_of<S: AsRef<str>>(member_of: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    member_of
        .iter()
        .filter_map(|dn| leading_common_name(dn.as_ref()))
        .filter(|group| seen.insert(group.clone()))
        .collect()
}

/// Lower-cased value of the first RDN when it is `cn=...`.
fn leading_common_name(dn: &str) -> Option<String> {
    let rdn = first_rdn(dn);
    let (kind, value) = rdn.split_once('=')?;
    if !kind.trim().eq_ignore_ascii_case("cn") {
        return None;
    }
    let value = unescape_rdn_value(value.trim());
    if value.is_empty() {
        return None;
    }
    Some(value.to_lowercase())
}

/// Text up to the first unescaped `,` or `+`.
fn first_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (idx, ch) in dn.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' | '+' => return &dn[..idx],
            _ => {}
        }
    }
    dn
}

fn unescape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
