//! Approximate in-memory size of a JSON payload
//!
//! Sizes follow a fixed table rather than the encoded length so that the
//! numbers in the metrics documents stay comparable across backends:
//!
//! | value  | bytes                                   |
//! |--------|-----------------------------------------|
//! | null   | 0                                       |
//! | bool   | 4                                       |
//! | number | 8                                       |
//! | string | 2 per UTF-16 code unit                  |
//! | object | sum of key and value sizes              |
//! | array  | sum of index-as-string and element sizes |

use serde_json::Value;

/// Estimate the size of `value` in bytes
pub fn estimate_size(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 4,
        Value::Number(_) => 8,
        Value::String(s) => str_size(s),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| str_size(&i.to_string()) + estimate_size(item))
            .sum(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| str_size(k) + estimate_size(v))
            .sum(),
    }
}

fn str_size(s: &str) -> u64 {
    2 * s.encode_utf16().count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(estimate_size(&json!(null)), 0);
        assert_eq!(estimate_size(&json!(true)), 4);
        assert_eq!(estimate_size(&json!(1.5)), 8);
        assert_eq!(estimate_size(&json!("abc")), 6);
    }

    #[test]
    fn test_utf16_units() {
        // one astral char is two UTF-16 code units
        assert_eq!(estimate_size(&json!("😀")), 4);
    }

    #[test]
    fn test_object() {
        // "id" (4) + 8, "name" (8) + "Al" (4)
        assert_eq!(estimate_size(&json!({"id": 1, "name": "Al"})), 24);
    }

    #[test]
    fn test_array_counts_indices() {
        // "0" (2) + 8, "1" (2) + 8
        assert_eq!(estimate_size(&json!([1, 2])), 20);
    }
}
