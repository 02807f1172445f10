//! Endpoint descriptions shared by the registry and the backends.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Backend-assigned identity of an endpoint.
///
/// Opaque to callers. Unlike the index it survives catalog refreshes for as
/// long as the device stays present, which is how sessions are matched to
/// endpoints.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NativeId {
    id: Arc<str>,
    /// Display name the id was derived from, for backends without a stable
    /// native identifier. Devices sharing it are indistinguishable.
    name_group: Option<Arc<str>>,
}

impl NativeId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            name_group: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// The display name behind a `name#n` identity, if that is what this is.
    pub fn name_group(&self) -> Option<&str> {
        self.name_group.as_deref()
    }
}

impl fmt::Debug for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeId({})", self.id)
    }
}

/// What a backend reports for one endpoint during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub name: String,
    pub native_id: NativeId,
}

impl DiscoveredEndpoint {
    pub fn new(name: impl Into<String>, native_id: NativeId) -> Self {
        Self {
            name: name.into(),
            native_id,
        }
    }
}

/// A catalog entry. `index` is only valid until the next refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub index: usize,
    pub name: String,
    pub direction: Direction,
    #[serde(skip)]
    pub native_id: NativeId,
}

impl Endpoint {
    pub(crate) fn key(&self) -> EndpointKey {
        (self.direction, self.native_id.clone())
    }
}

pub(crate) type EndpointKey = (Direction, NativeId);

/// Assign `name#n` identities to a list of display names, `n` counting
/// earlier entries with the same name.
///
/// Used by backends whose OS API has no stable identifier beyond the name.
/// Such ids cannot tell same-name devices apart across a refresh, so the
/// registry treats every session in a name group as stale once the group
/// shrinks.
pub(crate) fn name_occurrence_ids<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Vec<NativeId> {
    let mut seen: Vec<(&str, usize)> = Vec::new();
    names
        .into_iter()
        .map(|name| {
            let n = match seen.iter_mut().find(|(s, _)| *s == name) {
                Some((_, count)) => {
                    *count += 1;
                    *count
                }
                None => {
                    seen.push((name, 0));
                    0
                }
            };
            NativeId {
                id: format!("{name}#{n}").into(),
                name_group: Some(name.into()),
            }
        })
        .collect()
}
