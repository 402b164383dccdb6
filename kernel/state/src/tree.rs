//! Navigation of the nested JSON tree by dot-path.

use keel_core::{DotPath, KernelError, KernelResult, Payload};
use serde_json::{Map, Value};

pub(crate) fn empty_tree() -> Value {
    Value::Object(Map::new())
}

pub(crate) fn lookup<'a>(tree: &'a Value, path: &DotPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(tree, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Write `value` at `path`, creating missing intermediate objects.
///
/// Fails without touching the tree when an existing intermediate is not an
/// object. Returns the previous value at `path`.
pub(crate) fn write(tree: &mut Value, path: &DotPath, value: Payload) -> KernelResult<Option<Payload>> {
    let segments = path.segments();
    let (leaf, parents) = segments
        .split_last()
        .ok_or_else(|| KernelError::invalid_path(path.to_string(), "path is empty"))?;

    let mut cursor = tree;
    for (depth, segment) in parents.iter().enumerate() {
        let Value::Object(map) = cursor else {
            return Err(collision(path, depth));
        };
        cursor = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let Value::Object(map) = cursor else {
        return Err(collision(path, parents.len()));
    };
    Ok(map.insert(leaf.clone(), value))
}

/// Remove the value at `segments`, pruning parents left empty by the removal.
pub(crate) fn remove(tree: &mut Value, segments: &[String]) -> Option<Payload> {
    let Value::Object(map) = tree else {
        return None;
    };
    match segments {
        [] => None,
        [leaf] => map.remove(leaf),
        [head, rest @ ..] => {
            let child = map.get_mut(head)?;
            let removed = remove(child, rest)?;
            if child.as_object().is_some_and(Map::is_empty) {
                map.remove(head);
            }
            Some(removed)
        }
    }
}

/// Change detection on a leaf: primitives compare by value, containers always
/// count as changed (a new object or array is a new value).
pub(crate) fn differs(old: Option<&Payload>, new: Option<&Payload>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(old), Some(new)) => {
            matches!(new, Value::Object(_) | Value::Array(_)) || old != new
        }
    }
}

fn collision(path: &DotPath, depth: usize) -> KernelError {
    let blocked = path.segments()[..depth].join(".");
    KernelError::invalid_path(
        path.to_string(),
        format!("'{blocked}' holds a non-object value"),
    )
}
