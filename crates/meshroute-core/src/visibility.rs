//! Export scope values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a resource may be referenced from.
///
/// Serialized as the string form used in `exportTo`: `*` for public, `.`
/// for the resource's own namespace, anything else is a namespace name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Visibility {
    Public,
    Private,
    Namespace(String),
}

impl Visibility {
    pub fn as_str(&self) -> &str {
        match self {
            Visibility::Public => "*",
            Visibility::Private => ".",
            Visibility::Namespace(ns) => ns,
        }
    }
}

impl From<&str> for Visibility {
    fn from(s: &str) -> Self {
        match s {
            "*" => Visibility::Public,
            "." => Visibility::Private,
            ns => Visibility::Namespace(ns.to_string()),
        }
    }
}

impl From<String> for Visibility {
    fn from(s: String) -> Self {
        match s.as_str() {
            "*" => Visibility::Public,
            "." => Visibility::Private,
            _ => Visibility::Namespace(s),
        }
    }
}

impl From<Visibility> for String {
    fn from(v: Visibility) -> Self {
        match v {
            Visibility::Namespace(ns) => ns,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_known_values() {
        assert_eq!(Visibility::from("*"), Visibility::Public);
        assert_eq!(Visibility::from("."), Visibility::Private);
        assert_eq!(
            Visibility::from("istio-system"),
            Visibility::Namespace("istio-system".into())
        );
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&vec![Visibility::Public, Visibility::Private]).unwrap();
        assert_eq!(json, r#"["*","."]"#);
        let back: Vec<Visibility> = serde_json::from_str(r#"["default"]"#).unwrap();
        assert_eq!(back, vec![Visibility::Namespace("default".into())]);
    }
}
