//! Namespace-tolerant, case-insensitive identifier lookup. Every
//! object/field name flows through here before the rest of the engine
//! treats it as opaque; resolution happens once, in the Describer, and
//! nowhere else downstream.

use indexmap::IndexMap;

/// `x` with a leading `N__` removed, case-insensitively. Returns `name`
/// unchanged if it doesn't carry that prefix.
pub fn strip(name: &str, namespace: &str) -> String {
    let prefix_len = namespace.len() + 2;
    if name.len() > prefix_len
        && name[..namespace.len()].eq_ignore_ascii_case(namespace)
        && &name[namespace.len()..prefix_len] == "__"
    {
        name[prefix_len..].to_string()
    } else {
        name.to_string()
    }
}

/// Prepend `N__` to `name`, unless `name` already carries some namespace
/// or a custom-field suffix (`__c`, `__r`, `__mdt`) — in which case the
/// literal is preserved untouched.
pub fn add(name: &str, namespace: &str) -> String {
    const CUSTOM_SUFFIXES: [&str; 3] = ["__c", "__r", "__mdt"];
    if CUSTOM_SUFFIXES
        .iter()
        .any(|suffix| name.to_ascii_lowercase().ends_with(suffix))
    {
        return name.to_string();
    }
    if name.contains("__") {
        return name.to_string();
    }
    format!("{namespace}__{name}")
}

/// The fallback chain shared by map lookup, set membership, and array
/// inclusion: try the key as given, then `strip(key, ns)`, then
/// `add(key, ns)`; first hit wins. `try_lookup` is expected to perform its
/// own case-insensitive comparison.
pub fn lookup<T>(mut try_lookup: impl FnMut(&str) -> Option<T>, key: &str, namespace: Option<&str>) -> Option<T> {
    if let Some(found) = try_lookup(key) {
        return Some(found);
    }
    let namespace = namespace?;
    let stripped = strip(key, namespace);
    if stripped != key {
        if let Some(found) = try_lookup(&stripped) {
            return Some(found);
        }
    }
    let added = add(key, namespace);
    if added != key {
        if let Some(found) = try_lookup(&added) {
            return Some(found);
        }
    }
    None
}

/// Namespace- and case-tolerant lookup into a map keyed by lowercased
/// names (the shape the Describer stores object/field descriptions in).
pub fn lookup_map_ci<'a, V>(
    map: &'a IndexMap<String, V>,
    key: &str,
    namespace: Option<&str>,
) -> Option<&'a V> {
    lookup(|k| map.get(&k.to_lowercase()), key, namespace)
}

/// Namespace- and case-tolerant search for `key` among raw header strings
/// (CSV headers are not lowercased on the way in).
pub fn lookup_header_index(headers: &[String], key: &str, namespace: Option<&str>) -> Option<usize> {
    lookup(
        |k| headers.iter().position(|h| h.eq_ignore_ascii_case(k)),
        key,
        namespace,
    )
}

/// Array-inclusion check used for `referenceTo` membership: does `names`
/// contain `key`, tolerating case and namespace prefix/suffix mismatches?
pub fn contains_ci<S: AsRef<str>>(names: &[S], key: &str, namespace: Option<&str>) -> bool {
    lookup(
        |k| names.iter().find(|n| n.as_ref().eq_ignore_ascii_case(k)).map(|_| ()),
        key,
        namespace,
    )
    .is_some()
}
