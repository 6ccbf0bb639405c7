//
// props.rs
// seg2dcm
//
// Typed parser for the free-text property maps forwarded through
// configuration: `key=value` pairs joined by `;`, with `~` standing in for a
// space, `a,b,c` for a list and `sub:rest` for a keyed 2-tuple.
//

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// A parsed configuration property value. Serializes the way the metadata
/// contract expects: numbers as numbers, lists as arrays, tuples as
/// `[key, value]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<PropValue>),
    Tuple(String, Box<PropValue>),
}

pub type PropMap = BTreeMap<String, PropValue>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropParseError {
    #[error("property pair {0:?} is missing '='")]
    MissingEquals(String),
    #[error("property pair {0:?} has an empty key")]
    EmptyKey(String),
}

/// Parse a `key=value;key=value` encoded property map. An empty or
/// whitespace-only input yields an empty map; any malformed pair is a
/// configuration error surfaced before a single case is touched.
pub fn parse(raw: &str) -> Result<PropMap, PropParseError> {
    let raw = raw.trim();
    let mut props = PropMap::new();
    if raw.is_empty() {
        return Ok(props);
    }

    for pair in raw.split(';') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| PropParseError::MissingEquals(pair.to_string()))?;
        let key = unescape(key);
        if key.is_empty() {
            return Err(PropParseError::EmptyKey(pair.to_string()));
        }
        props.insert(key, parse_value(value));
    }
    Ok(props)
}

/// `~` is the transport encoding for a space inside keys and values.
fn unescape(text: &str) -> String {
    text.replace('~', " ")
}

fn parse_value(text: &str) -> PropValue {
    if let Some((sub_key, rest)) = text.split_once(':') {
        return PropValue::Tuple(unescape(sub_key), Box::new(parse_list_or_scalar(rest)));
    }
    parse_list_or_scalar(text)
}

fn parse_list_or_scalar(text: &str) -> PropValue {
    let items: Vec<&str> = text.split(',').collect();
    if items.len() > 1 {
        PropValue::List(items.into_iter().map(parse_scalar).collect())
    } else {
        parse_scalar(text)
    }
}

fn parse_scalar(text: &str) -> PropValue {
    let text = unescape(text);
    if let Ok(number) = text.parse::<i64>() {
        return PropValue::Int(number);
    }
    if let Ok(number) = text.parse::<f64>() {
        return PropValue::Float(number);
    }
    PropValue::Text(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_empty_map() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("   ").unwrap().is_empty());
    }

    #[test]
    fn scalars_are_typed() {
        let props = parse("SeriesNumber=301;ContentLabel=TUMOR;Threshold=0.5").unwrap();
        assert_eq!(props["SeriesNumber"], PropValue::Int(301));
        assert_eq!(props["ContentLabel"], PropValue::Text("TUMOR".into()));
        assert_eq!(props["Threshold"], PropValue::Float(0.5));
    }

    #[test]
    fn tilde_encodes_spaces() {
        let props = parse("ContentDescription=liver~tumor~burden").unwrap();
        assert_eq!(
            props["ContentDescription"],
            PropValue::Text("liver tumor burden".into())
        );
    }

    #[test]
    fn comma_values_become_lists() {
        let props = parse("rgb=255,0,128").unwrap();
        assert_eq!(
            props["rgb"],
            PropValue::List(vec![
                PropValue::Int(255),
                PropValue::Int(0),
                PropValue::Int(128)
            ])
        );
    }

    #[test]
    fn colon_values_become_keyed_tuples() {
        let props = parse("override=SegmentLabel:liver,spleen").unwrap();
        assert_eq!(
            props["override"],
            PropValue::Tuple(
                "SegmentLabel".into(),
                Box::new(PropValue::List(vec![
                    PropValue::Text("liver".into()),
                    PropValue::Text("spleen".into())
                ]))
            )
        );
    }

    #[test]
    fn tuple_with_scalar_payload() {
        let props = parse("override=SegmentLabel:liver").unwrap();
        assert_eq!(
            props["override"],
            PropValue::Tuple(
                "SegmentLabel".into(),
                Box::new(PropValue::Text("liver".into()))
            )
        );
    }

    #[test]
    fn missing_equals_is_rejected() {
        let err = parse("ContentLabel").unwrap_err();
        assert_eq!(err, PropParseError::MissingEquals("ContentLabel".into()));
    }

    #[test]
    fn tuple_serializes_as_pair() {
        let value = PropValue::Tuple("a".into(), Box::new(PropValue::Int(2)));
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["a",2]"#);
    }
}
