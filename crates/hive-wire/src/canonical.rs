use serde::Serialize;

/// Canonical JSON: object keys sorted, compact separators, UTF-8.
///
/// serde_json's default `Map` is a BTreeMap, so converting through `Value`
/// sorts every object level; `to_string` emits compact separators. All
/// signing payloads and content hashes go through this single function.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).expect("canonical_json: serializable value");
    serde_json::to_string(&v).expect("canonical_json: Value serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted() {
        let v = json!({"zeta": 1, "alpha": 2, "mid": {"b": 1, "a": 2}});
        assert_eq!(canonical_json(&v), r#"{"alpha":2,"mid":{"a":2,"b":1},"zeta":1}"#);
    }

    #[test]
    fn separators_are_compact() {
        let v = json!({"a": [1, 2, 3], "b": "x"});
        assert_eq!(canonical_json(&v), r#"{"a":[1,2,3],"b":"x"}"#);
    }
}
