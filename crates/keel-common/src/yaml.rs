//! YAML document loading
//!
//! Parses with yaml-rust2 and converts to `serde_json::Value` so that typed
//! deserialization goes through serde_json with `deny_unknown_fields`.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Parse a single-document YAML source into a JSON value.
///
/// Empty input yields `Value::Null`. More than one document is rejected: a
/// schema is one document, and silently ignoring a second one would hide
/// half of an author's edits.
pub fn parse_document(input: &str, origin: &str) -> Result<Value, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::Yaml {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;

    let mut docs = docs.into_iter();
    let first = docs.next();
    if docs.next().is_some() {
        return Err(Error::Yaml {
            origin: origin.to_string(),
            message: "expected a single YAML document, found several".to_string(),
        });
    }

    match first {
        Some(doc) => to_json(doc, origin),
        None => Ok(Value::Null),
    }
}

fn to_json(yaml: Yaml, origin: &str) -> Result<Value, Error> {
    let err = |message: &str| Error::Yaml {
        origin: origin.to_string(),
        message: message.to_string(),
    };

    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(raw) => {
            let f: f64 = raw
                .parse()
                .map_err(|_| err(&format!("invalid number '{}'", raw)))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| err(&format!("non-finite number '{}'", raw)))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(items) => items
            .into_iter()
            .map(|item| to_json(item, origin))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(hash) => {
            let mut map = Map::new();
            for (k, v) in hash {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Real(r) => r,
                    _ => return Err(err("mapping keys must be scalars")),
                };
                map.insert(key, to_json(v, origin)?);
            }
            Ok(Value::Object(map))
        }
        Yaml::Alias(_) => Err(err("YAML aliases are not supported")),
        Yaml::BadValue => Err(err("bad YAML value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_mapping() {
        let value = parse_document("a:\n  b: [1, two, true]\n", "test").unwrap();
        assert_eq!(value["a"]["b"][0], 1);
        assert_eq!(value["a"]["b"][1], "two");
        assert_eq!(value["a"]["b"][2], true);
    }

    #[test]
    fn test_empty_input_is_null() {
        assert_eq!(parse_document("", "test").unwrap(), Value::Null);
    }

    #[test]
    fn test_multiple_documents_rejected() {
        let err = parse_document("a: 1\n---\nb: 2\n", "keel.yaml").unwrap_err();
        assert!(err.to_string().contains("single YAML document"));
        assert!(err.to_string().contains("keel.yaml"));
    }

    #[test]
    fn test_syntax_error_names_origin() {
        let err = parse_document("a: [1, 2\n", "broken.yaml").unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_integer_keys_become_strings() {
        let value = parse_document("8080: http\n", "test").unwrap();
        assert_eq!(value["8080"], "http");
    }
}
