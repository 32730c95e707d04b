//! Manifest / lock file agreement

use super::constraint::VersionConstraint;
use super::lockfile::LockFile;
use super::pyproject::Manifest;
use super::version::Version;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// A required dependency has no pin in the lock file
    Missing { name: String },
    /// The pinned version does not satisfy the manifest constraint
    Unsatisfied {
        name: String,
        constraint: VersionConstraint,
        locked: Version,
    },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::Missing { name } => {
                write!(f, "'{}' is declared in the manifest but not locked", name)
            }
            Inconsistency::Unsatisfied {
                name,
                constraint,
                locked,
            } => write!(
                f,
                "'{}' is locked at {} which does not satisfy '{}'",
                name, locked, constraint
            ),
        }
    }
}

/// Check that every manifest dependency is pinned and that each pin satisfies
/// the declared constraint.
///
/// Optional dependencies are only checked when they are locked. Direct
/// references (path, URL, VCS) carry no version constraint and only need a pin.
pub fn check(manifest: &Manifest, lock: &LockFile) -> Result<(), Vec<Inconsistency>> {
    let mut problems = Vec::new();

    for requirement in &manifest.dependencies {
        match lock.package(&requirement.name) {
            None if requirement.optional || requirement.conditional => {}
            None => problems.push(Inconsistency::Missing {
                name: requirement.name.clone(),
            }),
            Some(locked) if !requirement.constraint.matches(&locked.version) => {
                problems.push(Inconsistency::Unsatisfied {
                    name: requirement.name.clone(),
                    constraint: requirement.constraint.clone(),
                    locked: locked.version.clone(),
                })
            }
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}
