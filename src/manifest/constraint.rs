//! Version constraints
//!
//! Handles the constraint formats found in `pyproject.toml` and `poetry.lock`:
//! - Exact: `==1.2.3`, `=1.2.3`, bare `1.2.3`
//! - Comparison: `>=1.2`, `>1.2`, `<=1.2`, `<1.2`, `!=1.2`
//! - Compatible release: `~=1.4.5` (PEP 440)
//! - Caret / tilde: `^1.2.3`, `~1.2` (Poetry)
//! - Wildcard: `*`, `1.*`, `==1.2.*`, `!=1.2.*`
//! - Conjunction with `,` or whitespace, disjunction with `||`

use super::version::Version;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(===|==|!=|>=|<=|~=|>|<|\^|~|=)?\s*([0-9][0-9A-Za-z.*+!_-]*|\*)").unwrap()
});

/// Comparison operator of a single clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `==1.2.*`
    EqPrefix(Vec<u64>),
    /// `!=1.2.*`
    NotEqPrefix(Vec<u64>),
}

/// One comparison such as `>=1.2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub op: Op,
    pub version: Version,
}

impl Clause {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        match &self.op {
            Op::Eq => candidate == &self.version,
            Op::NotEq => candidate != &self.version,
            Op::Gt => candidate > &self.version,
            Op::Gte => candidate >= &self.version,
            Op::Lte => candidate <= &self.version,
            Op::Lt => {
                // `<2.0` must not admit `2.0rc1`
                candidate < &self.version
                    && !(candidate.is_prerelease()
                        && !self.version.is_prerelease()
                        && candidate.base() == self.version.base())
            }
            Op::EqPrefix(prefix) => {
                candidate.epoch() == self.version.epoch() && candidate.matches_prefix(prefix)
            }
            Op::NotEqPrefix(prefix) => {
                !(candidate.epoch() == self.version.epoch() && candidate.matches_prefix(prefix))
            }
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix_str = |prefix: &[u64]| {
            prefix
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(".")
        };
        match &self.op {
            Op::Eq => write!(f, "=={}", self.version),
            Op::NotEq => write!(f, "!={}", self.version),
            Op::Gt => write!(f, ">{}", self.version),
            Op::Gte => write!(f, ">={}", self.version),
            Op::Lt => write!(f, "<{}", self.version),
            Op::Lte => write!(f, "<={}", self.version),
            Op::EqPrefix(prefix) => write!(f, "=={}.*", prefix_str(prefix)),
            Op::NotEqPrefix(prefix) => write!(f, "!={}.*", prefix_str(prefix)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version constraint '{spec}': {message}")]
pub struct InvalidConstraint {
    pub spec: String,
    pub message: String,
}

/// A constraint in disjunctive normal form: any alternative whose clauses all
/// match satisfies the constraint. An alternative with no clauses matches
/// everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    source: String,
    alternatives: Vec<Vec<Clause>>,
}

impl VersionConstraint {
    /// The constraint that admits every version (`*`)
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            alternatives: vec![vec![]],
        }
    }

    /// The constraint that admits exactly `version`
    pub fn exact(version: Version) -> Self {
        Self {
            source: format!("=={}", version),
            alternatives: vec![vec![Clause::new(Op::Eq, version)]],
        }
    }

    /// Combine several constraints so that any one of them may match
    pub fn union(constraints: Vec<VersionConstraint>) -> Self {
        if constraints.is_empty() {
            return Self::any();
        }
        let source = constraints
            .iter()
            .map(|c| c.source.as_str())
            .collect::<Vec<_>>()
            .join(" || ");
        Self {
            source,
            alternatives: constraints
                .into_iter()
                .flat_map(|c| c.alternatives)
                .collect(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.alternatives.iter().any(|alt| alt.is_empty())
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|alt| alt.iter().all(|clause| clause.matches(version)))
    }

    /// The constraint text as written in the manifest
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if some version starting with `prefix` satisfies the constraint:
    /// `>=3.10.4` admits `3.10`, `<3.10` does not.
    pub fn admits_prefix(&self, prefix: &Version) -> bool {
        let mut candidates = vec![prefix.clone()];
        for clause in self.alternatives.iter().flatten() {
            candidates.push(clause.version.clone());
            let last = clause.version.release().len().saturating_sub(1);
            candidates.extend(clause.version.bump(last));
        }
        candidates
            .iter()
            .any(|c| c.matches_prefix(prefix.release()) && self.matches(c))
    }

    /// Normalized PEP 440 rendering, alternatives joined with `||`
    pub fn normalized(&self) -> String {
        self.alternatives
            .iter()
            .map(|alt| {
                if alt.is_empty() {
                    "*".to_string()
                } else {
                    alt.iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                }
            })
            .collect::<Vec<_>>()
            .join(" || ")
    }
}

fn parse_prefix(spec: &str, raw: &str) -> Result<Vec<u64>, InvalidConstraint> {
    raw.trim_end_matches(".*")
        .split('.')
        .map(|s| s.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| InvalidConstraint {
            spec: spec.to_string(),
            message: format!("bad wildcard '{}'", raw),
        })
}

/// Exclusive upper bound of `^`, `~` and `~=`
fn upper_bound(spec: &str, version: &Version, index: usize) -> Result<Version, InvalidConstraint> {
    version.bump(index).ok_or_else(|| InvalidConstraint {
        spec: spec.to_string(),
        message: format!("no upper bound above '{}'", version),
    })
}

fn parse_clause(spec: &str, op: Option<&str>, raw: &str) -> Result<Vec<Clause>, InvalidConstraint> {
    let invalid = |message: String| InvalidConstraint {
        spec: spec.to_string(),
        message,
    };

    if raw == "*" {
        return match op {
            None | Some("==") | Some("=") | Some(">=") => Ok(vec![]),
            Some(other) => Err(invalid(format!("operator '{}' cannot take '*'", other))),
        };
    }

    if raw.ends_with(".*") {
        let prefix = parse_prefix(spec, raw)?;
        let anchor = Version::from_release(prefix.clone());
        return match op {
            None | Some("==") | Some("=") => Ok(vec![Clause::new(Op::EqPrefix(prefix), anchor)]),
            Some("!=") => Ok(vec![Clause::new(Op::NotEqPrefix(prefix), anchor)]),
            Some(other) => Err(invalid(format!(
                "operator '{}' cannot take a wildcard",
                other
            ))),
        };
    }

    let version: Version = raw
        .parse()
        .map_err(|_| invalid(format!("bad version '{}'", raw)))?;
    let given = version.release().len();

    let clauses = match op {
        None | Some("==") | Some("=") | Some("===") => vec![Clause::new(Op::Eq, version)],
        Some("!=") => vec![Clause::new(Op::NotEq, version)],
        Some(">") => vec![Clause::new(Op::Gt, version)],
        Some(">=") => vec![Clause::new(Op::Gte, version)],
        Some("<") => vec![Clause::new(Op::Lt, version)],
        Some("<=") => vec![Clause::new(Op::Lte, version)],
        Some("^") => {
            let bump_at = version
                .release()
                .iter()
                .position(|s| *s != 0)
                .unwrap_or(given.saturating_sub(1));
            let upper = upper_bound(spec, &version, bump_at)?;
            vec![Clause::new(Op::Gte, version), Clause::new(Op::Lt, upper)]
        }
        Some("~") => {
            let upper = upper_bound(spec, &version, if given >= 2 { 1 } else { 0 })?;
            vec![Clause::new(Op::Gte, version), Clause::new(Op::Lt, upper)]
        }
        Some("~=") => {
            if given < 2 {
                return Err(invalid(
                    "'~=' needs at least two release segments".to_string(),
                ));
            }
            let upper = upper_bound(spec, &version, given - 2)?;
            vec![Clause::new(Op::Gte, version), Clause::new(Op::Lt, upper)]
        }
        Some(other) => return Err(invalid(format!("unknown operator '{}'", other))),
    };

    Ok(clauses)
}

fn parse_conjunction(spec: &str, part: &str) -> Result<Vec<Clause>, InvalidConstraint> {
    let mut clauses = Vec::new();
    let mut consumed = String::new();

    for caps in CLAUSE_RE.captures_iter(part) {
        let op = caps.get(1).map(|m| m.as_str());
        let raw = &caps[2];
        clauses.extend(parse_clause(spec, op, raw)?);
        consumed.push_str(&caps[0]);
    }

    let leftover: String = CLAUSE_RE
        .replace_all(part, "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if !leftover.is_empty() {
        return Err(InvalidConstraint {
            spec: spec.to_string(),
            message: format!("unexpected '{}'", leftover),
        });
    }
    if consumed.is_empty() {
        return Err(InvalidConstraint {
            spec: spec.to_string(),
            message: "empty clause".to_string(),
        });
    }

    Ok(clauses)
}

impl FromStr for VersionConstraint {
    type Err = InvalidConstraint;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }

        let alternatives = trimmed
            .split("||")
            .flat_map(|part| part.split(" | "))
            .map(|part| parse_conjunction(trimmed, part))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: trimmed.to_string(),
            alternatives,
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
