//! Per-guest slots in the shared browser URL.
//!
//! Each attached guest owns one query parameter `app-<name>` whose value is
//! its encoded full path. The parameter lives in the search string, or in the
//! query part of the hash when the host itself routes by hash.

use url::Url;

use crate::codec::{decode, encode};

type Pairs = Vec<(String, Option<String>)>;

/// Query parameter key for guest `name`.
pub fn slot_key(name: &str) -> String {
    format!("app-{name}")
}

/// A URL with a hash and no search is treated as a hash-routed host.
pub fn is_hash_routed(url: &Url) -> bool {
    url.fragment().is_some_and(|f| !f.is_empty()) && url.query().map_or(true, str::is_empty)
}

fn parse_query(query: &str) -> Pairs {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(v.to_string())),
            None => (part.to_string(), None),
        })
        .collect()
}

fn compose_query(pairs: &Pairs) -> String {
    pairs
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{k}={v}"),
            None => k.clone(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn lookup(pairs: &Pairs, key: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.clone())
}

fn upsert(pairs: &mut Pairs, key: &str, value: String) {
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some((_, v)) => *v = Some(value),
        None => pairs.push((key.to_string(), Some(value))),
    }
}

fn remove(pairs: &mut Pairs, key: &str) -> bool {
    let before = pairs.len();
    pairs.retain(|(k, _)| k != key);
    pairs.len() != before
}

fn split_fragment(url: &Url) -> (String, Pairs) {
    match url.fragment() {
        Some(f) => match f.split_once('?') {
            Some((path, query)) => (path.to_string(), parse_query(query)),
            None => (f.to_string(), Vec::new()),
        },
        None => (String::new(), Vec::new()),
    }
}

fn search_pairs(url: &Url) -> Pairs {
    url.query().map(parse_query).unwrap_or_default()
}

fn write_search(url: &mut Url, pairs: &Pairs) {
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&compose_query(pairs)));
    }
}

fn write_fragment(url: &mut Url, path: &str, pairs: &Pairs) {
    let fragment = if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", compose_query(pairs))
    };
    if fragment.is_empty() {
        url.set_fragment(None);
    } else {
        url.set_fragment(Some(&fragment));
    }
}

/// Read and decode guest `name`'s path from `url`.
///
/// The hash query is consulted before the search string.
pub fn get_micro_path(url: &Url, name: &str) -> Option<String> {
    let key = slot_key(name);
    let (_, hash_pairs) = split_fragment(url);
    lookup(&hash_pairs, &key)
        .or_else(|| lookup(&search_pairs(url), &key))
        .map(|raw| decode(&raw))
}

/// Return `url` with guest `name`'s slot set to the encoded `full_path`.
pub fn set_micro_path(url: &Url, name: &str, full_path: &str) -> Url {
    let key = slot_key(name);
    let value = encode(full_path);
    let mut out = url.clone();
    let (hash_path, mut hash_pairs) = split_fragment(url);
    let mut search = search_pairs(url);
    if is_hash_routed(url) {
        upsert(&mut hash_pairs, &key, value);
        if remove(&mut search, &key) {
            write_search(&mut out, &search);
        }
        write_fragment(&mut out, &hash_path, &hash_pairs);
    } else {
        upsert(&mut search, &key, value);
        write_search(&mut out, &search);
        if remove(&mut hash_pairs, &key) {
            write_fragment(&mut out, &hash_path, &hash_pairs);
        }
    }
    out
}

/// Return `url` with guest `name`'s slot removed from both locations.
pub fn remove_micro_path(url: &Url, name: &str) -> Url {
    let key = slot_key(name);
    let mut out = url.clone();
    let mut search = search_pairs(url);
    if remove(&mut search, &key) {
        write_search(&mut out, &search);
    }
    let (hash_path, mut hash_pairs) = split_fragment(url);
    if remove(&mut hash_pairs, &key) {
        write_fragment(&mut out, &hash_path, &hash_pairs);
    }
    out
}
