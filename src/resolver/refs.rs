use std::collections::{BTreeMap, BTreeSet};

use crate::model::resolved::{is_full_sha, is_hex};

/// Shortest abbreviated object name accepted as a partial SHA.
const MIN_ABBREV: usize = 4;
const PEELED_SUFFIX: &str = "^{}";

/// Refs advertised by a remote, as listed by `git ls-remote`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRefs {
    refs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefMatch {
    Found { name: String, sha: String },
    Missing,
    Ambiguous(Vec<String>),
}

impl RemoteRefs {
    /// Parses `<sha>\t<ref>` lines. Annotated tags resolve to the commit they
    /// point at through their peeled `^{}` entry.
    pub fn parse(output: &str) -> RemoteRefs {
        let mut refs = BTreeMap::new();
        let mut peeled = BTreeMap::new();
        for line in output.lines() {
            let Some((sha, name)) = line.split_once(|c: char| c.is_whitespace()) else {
                continue;
            };
            let (sha, name) = (sha.trim(), name.trim());
            if !is_full_sha(sha) || name.is_empty() {
                continue;
            }
            let sha = sha.to_ascii_lowercase();
            match name.strip_suffix(PEELED_SUFFIX) {
                Some(name) => peeled.insert(name.to_owned(), sha),
                None => refs.insert(name.to_owned(), sha),
            };
        }
        refs.extend(peeled);
        RemoteRefs { refs }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Matches a committish against the advertised refs.
    ///
    /// Precedence: a full ref name (including `HEAD`), then a tag, then a
    /// branch, then an abbreviated SHA of an advertised tip.
    pub fn resolve(&self, committish: &str) -> RefMatch {
        let candidates = [
            committish.to_owned(),
            format!("refs/tags/{committish}"),
            format!("refs/heads/{committish}"),
        ];
        for name in candidates {
            if let Some(sha) = self.refs.get(&name) {
                return RefMatch::Found {
                    sha: sha.clone(),
                    name,
                };
            }
        }

        if committish.len() < MIN_ABBREV || !is_hex(committish) {
            return RefMatch::Missing;
        }
        let prefix = committish.to_ascii_lowercase();
        let matching: Vec<(&String, &String)> = self
            .refs
            .iter()
            .filter(|(_, sha)| sha.starts_with(&prefix))
            .collect();
        let distinct: BTreeSet<&String> = matching.iter().map(|(_, sha)| *sha).collect();
        match (distinct.len(), matching.first()) {
            (1, Some((name, sha))) => RefMatch::Found {
                name: name.to_string(),
                sha: sha.to_string(),
            },
            (0, _) | (_, None) => RefMatch::Missing,
            _ => RefMatch::Ambiguous(matching.iter().map(|(name, _)| name.to_string()).collect()),
        }
    }
}
