//! Recursive flattening of structured values into bracket-keyed pairs.
//!
//! Maps and lists extend the key (`user[first_name]`, `langs[0]`); sets repeat
//! the bare key once per member (`like=music&like=art`). Consumers parse
//! query strings and form bodies with this exact asymmetry, so it must not be
//! normalized away.

use crate::value::Value;

/// Flatten `value` under `prefix` into ordered (key, value) pairs.
///
/// An empty prefix leaves map keys bare. Values are assumed acyclic.
pub fn flatten(prefix: &str, value: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    flatten_into(prefix, value, &mut pairs);
    pairs
}

/// Flatten several named values in order, each under its own key.
pub fn flatten_all<'a, I>(entries: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut pairs = Vec::new();
    for (key, value) in entries {
        flatten_into(key, value, &mut pairs);
    }
    pairs
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Map(map) => {
            for (child, nested) in map {
                let key = if prefix.is_empty() {
                    child.clone()
                } else {
                    format!("{prefix}[{child}]")
                };
                flatten_into(&key, nested, out);
            }
        }
        Value::List(items) => {
            for (index, nested) in items.iter().enumerate() {
                flatten_into(&format!("{prefix}[{index}]"), nested, out);
            }
        }
        Value::Set(members) => {
            for nested in members {
                flatten_into(prefix, nested, out);
            }
        }
        scalar => {
            if let Some(text) = scalar.as_scalar_string() {
                out.push((prefix.to_string(), text));
            }
        }
    }
}
