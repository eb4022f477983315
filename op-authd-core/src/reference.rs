//! Reference grammar and the request fingerprint.
//!
//! A reference is an opaque string whose leading scheme selects a backend.
//! The engine never normalises references: identity is the exact byte
//! string.

use crate::errors::{BackendError, BackendResult};

/// Separates the reference from the flag list inside a fingerprint.
const REF_DELIMITER: char = '\u{1f}';
/// Separates individual flags inside a fingerprint.
const FLAG_DELIMITER: char = '\u{1e}';

/// Recognised reference schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Op,
    Vault,
    Bao,
}

impl Scheme {
    /// Detects the scheme of a reference by its prefix. Returns `None` for
    /// scheme-less references, which route to a configured default.
    pub fn of(reference: &str) -> Option<Scheme> {
        if reference.starts_with("op://") {
            Some(Scheme::Op)
        } else if reference.starts_with("vault://") {
            Some(Scheme::Vault)
        } else if reference.starts_with("bao://") {
            Some(Scheme::Bao)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Op => "op",
            Scheme::Vault => "vault",
            Scheme::Bao => "bao",
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "op" | "opcli" => Ok(Scheme::Op),
            "vault" => Ok(Scheme::Vault),
            "bao" => Ok(Scheme::Bao),
            other => Err(format!("unknown scheme {other:?}")),
        }
    }
}

/// Computes the cache and single-flight key for a request. Two requests
/// share a fingerprint iff they would produce the same upstream call. The
/// delimiters are C0 control characters, which cannot occur in well-formed
/// references or flags, so the composite is injective.
pub fn fingerprint(reference: &str, flags: &[String]) -> String {
    let mut key = String::with_capacity(
        reference.len() + 1 + flags.iter().map(|f| f.len() + 1).sum::<usize>(),
    );
    key.push_str(reference);
    key.push(REF_DELIMITER);
    for (idx, flag) in flags.iter().enumerate() {
        if idx > 0 {
            key.push(FLAG_DELIMITER);
        }
        key.push_str(flag);
    }
    key
}

/// Parsed form of a `vault://logical_path[#field]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRef {
    pub path: String,
    pub field: Option<String>,
}

/// Parses a `vault://` reference into its logical path and optional field
/// projection.
pub fn parse_vault_ref(reference: &str) -> BackendResult<VaultRef> {
    let Some(rest) = reference.strip_prefix("vault://") else {
        return Err(BackendError::invalid_input(
            "reference must start with vault://",
        ));
    };

    let (path, field) = match rest.split_once('#') {
        Some((path, field)) => (path, Some(field.to_string())),
        None => (rest, None),
    };

    if path.is_empty() {
        return Err(BackendError::invalid_input("vault path cannot be empty"));
    }

    Ok(VaultRef {
        path: path.to_string(),
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_detection() {
        assert_eq!(Scheme::of("op://vault/item/field"), Some(Scheme::Op));
        assert_eq!(Scheme::of("vault://secret/data/app"), Some(Scheme::Vault));
        assert_eq!(Scheme::of("bao://secret/data/app"), Some(Scheme::Bao));
        assert_eq!(Scheme::of("plain/path"), None);
        assert_eq!(Scheme::of(""), None);
    }

    #[test]
    fn fingerprint_identity() {
        let a = fingerprint("op://v/i/f", &[]);
        let b = fingerprint("op://v/i/f", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_per_flag_element() {
        let none = fingerprint("op://v/i/f", &[]);
        let one = fingerprint("op://v/i/f", &["--account".into()]);
        let two = fingerprint("op://v/i/f", &["--account".into(), "work".into()]);
        assert_ne!(none, one);
        assert_ne!(one, two);
    }

    #[test]
    fn fingerprint_is_not_fooled_by_joined_flags() {
        // A single flag must never collide with two flags whose
        // concatenation matches it.
        let joined = fingerprint("op://v/i/f", &["--ab".into()]);
        let split = fingerprint("op://v/i/f", &["--a".into(), "b".into()]);
        assert_ne!(joined, split);
    }

    #[test]
    fn vault_ref_with_field() {
        let parsed = parse_vault_ref("vault://secret/data/app#password").unwrap();
        assert_eq!(parsed.path, "secret/data/app");
        assert_eq!(parsed.field.as_deref(), Some("password"));
    }

    #[test]
    fn vault_ref_without_field() {
        let parsed = parse_vault_ref("vault://secret/data/app").unwrap();
        assert_eq!(parsed.path, "secret/data/app");
        assert_eq!(parsed.field, None);
    }

    #[test]
    fn vault_ref_rejects_wrong_scheme_and_empty_path() {
        assert!(parse_vault_ref("op://v/i/f").is_err());
        assert!(parse_vault_ref("vault://").is_err());
        assert!(parse_vault_ref("vault://#field").is_err());
    }
}
