use crate::errors::{InitError, ToolError};
use crate::services::endpoint::{DescriptorSource, EndpointDescriptor, HttpMethod, ParamLocation};
use crate::services::logger::Logger;
use crate::stores::sqlite_schema_store::SqliteSchema;
use crate::utils::tool_errors::unknown_name_error;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Read-only operation registry. Built once at startup, shared by reference.
#[derive(Debug)]
pub struct SchemaIndex {
    descriptors: BTreeMap<String, Arc<EndpointDescriptor>>,
    version: Option<i64>,
    fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub descriptor: Arc<EndpointDescriptor>,
    pub score: u32,
}

/// Search outcome, ordered by score (descending) then key (ascending).
/// Every call to [`SearchResults::iter`] walks the same sequence from the top.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    hits: Vec<SearchHit>,
}

impl SearchResults {
    pub fn iter(&self) -> impl Iterator<Item = &SearchHit> + '_ {
        self.hits.iter()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.descriptor.key.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Key,
    Path,
    Method,
    Summary,
}

#[derive(Debug, Clone)]
struct Term {
    field: Option<Field>,
    text: String,
}

impl SchemaIndex {
    /// Index over exactly these descriptors; duplicates and malformed entries are fatal.
    pub fn from_descriptors(descriptors: Vec<EndpointDescriptor>) -> Result<Self, InitError> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            if map.contains_key(&descriptor.key) {
                return Err(InitError::DuplicateOperation(descriptor.key));
            }
            map.insert(descriptor.key.clone(), Arc::new(descriptor));
        }
        let fingerprint = fingerprint(&map);
        Ok(Self {
            descriptors: map,
            version: None,
            fingerprint,
        })
    }

    /// Manifest entries plus database rows. A row repeating a manifest route
    /// (same method and path) is shadowed by the manifest entry.
    pub fn build(
        manifest: Vec<EndpointDescriptor>,
        database: Option<SqliteSchema>,
        logger: &Logger,
    ) -> Result<Self, InitError> {
        let routes: HashSet<(HttpMethod, String)> = manifest
            .iter()
            .map(|d| (d.method, d.path.clone()))
            .collect();
        let mut all = manifest;
        let mut version = None;
        if let Some(database) = database {
            version = database.version;
            let mut shadowed = 0usize;
            for row in database.descriptors {
                if routes.contains(&(row.method, row.path.clone())) {
                    shadowed += 1;
                    continue;
                }
                all.push(row);
            }
            if shadowed > 0 {
                logger.debug(
                    "schema database rows shadowed by manifest",
                    Some(&serde_json::json!({ "shadowed": shadowed })),
                );
            }
        }
        let mut index = Self::from_descriptors(all)?;
        index.version = version;
        Ok(index)
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<EndpointDescriptor>, ToolError> {
        self.descriptors
            .get(key)
            .cloned()
            .ok_or_else(|| unknown_name_error("operation", key, &self.keys()))
    }

    pub fn get(&self, key: &str) -> Option<&Arc<EndpointDescriptor>> {
        self.descriptors.get(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.descriptors.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn count_by_source(&self, source: DescriptorSource) -> usize {
        self.descriptors
            .values()
            .filter(|d| d.source == source)
            .count()
    }

    pub fn search(&self, query: &str) -> SearchResults {
        let terms = parse_query(query);
        let mut hits: Vec<SearchHit> = self
            .descriptors
            .values()
            .filter_map(|descriptor| {
                let mut total = 0u32;
                for term in terms.iter() {
                    total += score_term(descriptor, term)?;
                }
                Some(SearchHit {
                    descriptor: descriptor.clone(),
                    score: total,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.descriptor.key.cmp(&b.descriptor.key))
        });
        SearchResults { hits }
    }

    /// Descriptor whose path template matches a concrete path, with path
    /// arguments bound by parameter name. The most literal template wins.
    pub fn match_path(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Option<(Arc<EndpointDescriptor>, Map<String, Value>)> {
        let concrete: Vec<&str> = split_segments(path);
        let mut best: Option<(usize, &Arc<EndpointDescriptor>, Map<String, Value>)> = None;
        for descriptor in self.descriptors.values().filter(|d| d.method == method) {
            let template = split_segments(&descriptor.path);
            if template.len() != concrete.len() {
                continue;
            }
            let mut literals = 0usize;
            let mut bound = Map::new();
            let mut matched = true;
            for (pattern, actual) in template.iter().zip(concrete.iter()) {
                if let Some(wire) = pattern.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    let name = descriptor
                        .params_in(ParamLocation::Path)
                        .find(|p| p.wire_name() == wire)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| wire.to_string());
                    bound.insert(name, Value::String(percent_decode(actual)));
                } else if pattern == actual {
                    literals += 1;
                } else {
                    matched = false;
                    break;
                }
            }
            if !matched {
                continue;
            }
            // BTreeMap order makes the first candidate the smallest key on ties.
            if best.as_ref().map(|(l, _, _)| literals > *l).unwrap_or(true) {
                best = Some((literals, descriptor, bound));
            }
        }
        best.map(|(_, descriptor, bound)| (descriptor.clone(), bound))
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn percent_decode(segment: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", segment.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

fn fingerprint(map: &BTreeMap<String, Arc<EndpointDescriptor>>) -> String {
    let mut hasher = Sha256::new();
    for (key, descriptor) in map.iter() {
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(descriptor.method.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(descriptor.path.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn parse_query(query: &str) -> Vec<Term> {
    query
        .split_whitespace()
        .filter_map(|raw| {
            let lowered = raw.to_lowercase();
            let (field, text) = match lowered.split_once(':') {
                Some(("key", rest)) => (Some(Field::Key), rest.to_string()),
                Some(("path", rest)) => (Some(Field::Path), rest.to_string()),
                Some(("method", rest)) => (Some(Field::Method), rest.to_string()),
                Some(("summary", rest)) | Some(("description", rest)) => {
                    (Some(Field::Summary), rest.to_string())
                }
                _ => (None, lowered),
            };
            if text.is_empty() {
                None
            } else {
                Some(Term { field, text })
            }
        })
        .collect()
}

fn score_field(descriptor: &EndpointDescriptor, field: Field, text: &str) -> u32 {
    match field {
        Field::Key => {
            let key = descriptor.key.to_lowercase();
            if key == text {
                100
            } else if key.starts_with(text) {
                60
            } else if key.contains(text) {
                40
            } else {
                0
            }
        }
        Field::Path => {
            let path = descriptor.path.to_lowercase();
            if !path.contains(text) {
                return 0;
            }
            let whole_segment = split_segments(&path).iter().any(|s| *s == text);
            if whole_segment {
                40
            } else {
                30
            }
        }
        Field::Method => {
            if descriptor.method.as_str().eq_ignore_ascii_case(text) {
                25
            } else {
                0
            }
        }
        Field::Summary => {
            if descriptor.summary.to_lowercase().contains(text) {
                10
            } else {
                0
            }
        }
    }
}

/// `None` when the term does not match; terms combine with AND.
fn score_term(descriptor: &EndpointDescriptor, term: &Term) -> Option<u32> {
    let score = match term.field {
        Some(field) => score_field(descriptor, field, &term.text),
        None => [Field::Key, Field::Path, Field::Method, Field::Summary]
            .into_iter()
            .map(|field| score_field(descriptor, field, &term.text))
            .sum(),
    };
    if score == 0 {
        None
    } else {
        Some(score)
    }
}
