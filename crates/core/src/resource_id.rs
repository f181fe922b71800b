use std::fmt;

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{GatewayError, GatewayResult};

/// Matches a trailing `/<word>:<rest>` suffix where `<rest>` contains no
/// further `/`. Deliberately does not treat every `/` as a sub-resource
/// separator: identifiers may legally contain `/` (e.g. `page:/patient/12345`).
static SUB_RESOURCE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)/([^/:]+):([^/]+)$").expect("valid regex"));

/// Either a root `type:id` resource, or a sub-resource `type:id/subType:subId`.
///
/// Parsing is deterministic and the codec is an exact round-trip:
/// `build(parse(s)) == s` and `parse(build(t, id, sub)) == (t, id, sub)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub resource_type: String,
    pub identifier: String,
    pub sub: Option<SubResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubResource {
    pub sub_type: String,
    pub sub_identifier: String,
}

impl ResourceId {
    #[must_use]
    pub fn root(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
            sub: None,
        }
    }

    #[must_use]
    pub fn with_sub(
        resource_type: impl Into<String>,
        identifier: impl Into<String>,
        sub_type: impl Into<String>,
        sub_identifier: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
            sub: Some(SubResource {
                sub_type: sub_type.into(),
                sub_identifier: sub_identifier.into(),
            }),
        }
    }

    /// Parses `type:id` or `type:id/subType:subId`.
    ///
    /// Fails if `s` contains no `:`. The split is on the *first* `:`; the
    /// remainder is then checked for a trailing `/<word>:<rest>` suffix.
    pub fn parse(s: &str) -> GatewayResult<Self> {
        let (resource_type, remainder) = s
            .split_once(':')
            .ok_or(GatewayError::InvalidResourceType)?;
        if resource_type.is_empty() {
            return Err(GatewayError::InvalidResourceType);
        }

        if let Some(caps) = SUB_RESOURCE_SUFFIX.captures(remainder) {
            let identifier = caps[1].to_string();
            let sub_type = caps[2].to_string();
            let sub_identifier = caps[3].to_string();
            if identifier.is_empty() || sub_type.is_empty() || sub_identifier.is_empty() {
                return Err(GatewayError::InvalidResourceType);
            }
            Ok(Self {
                resource_type: resource_type.to_string(),
                identifier,
                sub: Some(SubResource {
                    sub_type,
                    sub_identifier,
                }),
            })
        } else {
            if remainder.is_empty() {
                return Err(GatewayError::InvalidResourceType);
            }
            Ok(Self {
                resource_type: resource_type.to_string(),
                identifier: remainder.to_string(),
                sub: None,
            })
        }
    }

    /// The `type:id` parent resource, ignoring any sub-part.
    #[must_use]
    pub fn parent(&self) -> ResourceId {
        ResourceId {
            resource_type: self.resource_type.clone(),
            identifier: self.identifier.clone(),
            sub: None,
        }
    }

    #[must_use]
    pub fn is_sub_resource(&self) -> bool {
        self.sub.is_some()
    }

    /// Inverse of `parse`. `build(parse(s)) == s` for every legal `s`.
    #[must_use]
    pub fn build(&self) -> String {
        self.to_string()
    }

    /// Key this resource's lock is stored under in the expiring KV store.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("lock:{self}")
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.identifier)?;
        if let Some(sub) = &self.sub {
            write!(f, "/{}:{}", sub.sub_type, sub.sub_identifier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_root_resource() {
        let r = ResourceId::parse("doc:42").unwrap();
        assert_eq!(r.resource_type, "doc");
        assert_eq!(r.identifier, "42");
        assert!(r.sub.is_none());
    }

    #[test]
    fn parses_sub_resource() {
        let r = ResourceId::parse("doc:42/tab:A").unwrap();
        assert_eq!(r.resource_type, "doc");
        assert_eq!(r.identifier, "42");
        let sub = r.sub.as_ref().unwrap();
        assert_eq!(sub.sub_type, "tab");
        assert_eq!(sub.sub_identifier, "A");
        assert_eq!(r.parent().build(), "doc:42");
    }

    #[test]
    fn identifier_may_contain_slashes_without_becoming_a_sub_resource() {
        // Only a trailing `/<word>:<rest>` triggers sub-resource interpretation.
        let r = ResourceId::parse("page:/patient/12345").unwrap();
        assert_eq!(r.resource_type, "page");
        assert_eq!(r.identifier, "/patient/12345");
        assert!(r.sub.is_none());
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(ResourceId::parse("no-colon-here").is_err());
    }

    #[test]
    fn round_trip_is_exact_for_root_and_sub() {
        for s in ["doc:42", "doc:42/tab:A", "page:/patient/12345"] {
            let parsed = ResourceId::parse(s).unwrap();
            assert_eq!(parsed.build(), s);
        }
    }

    #[test]
    fn round_trip_from_constructor() {
        let r = ResourceId::with_sub("doc", "42", "tab", "A");
        let s = r.build();
        let reparsed = ResourceId::parse(&s).unwrap();
        assert_eq!(reparsed, r);
    }

    #[test]
    fn lock_key_is_namespaced() {
        let r = ResourceId::root("surgery", "1");
        assert_eq!(r.lock_key(), "lock:surgery:1");
    }
}
