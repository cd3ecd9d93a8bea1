//! Manifest revision identifiers.
//!
//! The orchestrator reports the same revision in two shapes:
//! - fully qualified: `<qualifier>/<family>:<revision>`, for example
//!   `arn:aws:ecs:us-east-1:123456789012:task-definition/web:7`
//! - short: `<family>:<revision>`, for example `web:7`
//!
//! Anything else is kept opaque and only ever equals itself. Whether the
//! orchestrator emits further shapes is unknown; an unrecognised form will
//! never match a recognised one, which makes the deployment poller wait out
//! its budget rather than report a false success.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevisionRef {
    Qualified {
        qualifier: String,
        family: String,
        revision: u32,
    },
    Short {
        family: String,
        revision: u32,
    },
    Opaque(String),
}

impl RevisionRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.rsplit_once('/') {
            Some((qualifier, tail)) if !qualifier.is_empty() => match split_family_revision(tail) {
                Some((family, revision)) => RevisionRef::Qualified {
                    qualifier: qualifier.to_string(),
                    family: family.to_string(),
                    revision,
                },
                None => RevisionRef::Opaque(raw.to_string()),
            },
            Some(_) => RevisionRef::Opaque(raw.to_string()),
            None => match split_family_revision(raw) {
                Some((family, revision)) => RevisionRef::Short { family: family.to_string(), revision },
                None => RevisionRef::Opaque(raw.to_string()),
            },
        }
    }

    /// `(family, revision)` for the recognised forms.
    pub fn family_revision(&self) -> Option<(&str, u32)> {
        match self {
            RevisionRef::Qualified { family, revision, .. } | RevisionRef::Short { family, revision } => {
                Some((family.as_str(), *revision))
            }
            RevisionRef::Opaque(_) => None,
        }
    }

    /// The `family:revision` form, if recognised.
    pub fn to_short_string(&self) -> Option<String> {
        self.family_revision().map(|(family, revision)| format!("{family}:{revision}"))
    }

    /// Equivalence across the two forms.
    ///
    /// Two qualified ids must agree on the qualifier as well; a short id
    /// matches any qualified id with the same family and revision.
    pub fn same_revision(&self, other: &RevisionRef) -> bool {
        match (self, other) {
            (RevisionRef::Opaque(a), RevisionRef::Opaque(b)) => a == b,
            (RevisionRef::Opaque(_), _) | (_, RevisionRef::Opaque(_)) => false,
            (
                RevisionRef::Qualified { qualifier: qa, .. },
                RevisionRef::Qualified { qualifier: qb, .. },
            ) if qa != qb => false,
            _ => self.family_revision() == other.family_revision(),
        }
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionRef::Qualified { qualifier, family, revision } => write!(f, "{qualifier}/{family}:{revision}"),
            RevisionRef::Short { family, revision } => write!(f, "{family}:{revision}"),
            RevisionRef::Opaque(raw) => f.write_str(raw),
        }
    }
}

/// True when both identifiers name the same manifest revision.
pub fn same_revision(a: &str, b: &str) -> bool {
    a == b || RevisionRef::parse(a).same_revision(&RevisionRef::parse(b))
}

fn split_family_revision(s: &str) -> Option<(&str, u32)> {
    let (family, revision) = s.split_once(':')?;
    if family.is_empty() || revision.contains(':') {
        return None;
    }
    let revision = revision.parse::<u32>().ok()?;
    Some((family, revision))
}
