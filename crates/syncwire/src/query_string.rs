//! Form-encoded query string parsing with bracketed nested keys.
//!
//! `a[b]=1` builds `{"a": {"b": "1"}}`, `a[]=1&a[]=2` builds
//! `{"a": ["1", "2"]}` and a repeated plain key collects its values into an
//! array. Every scalar stays a string.

use serde_json::{Map, Value};
use syncwire_types::Params;

/// Highest explicit array index honored; larger indices become object keys.
const MAX_ARRAY_INDEX: usize = 20;

/// Bracket segments split off a key. Anything deeper stays one literal segment.
const MAX_DEPTH: usize = 5;

/// Parses `query` (without the leading `?`) into nested parameters.
pub fn parse(query: &str) -> Params {
    let mut params = Params::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(raw_key);
        if key.is_empty() {
            continue;
        }
        let (root, path) = split_key(&key);
        let slot = params.entry(root.to_string()).or_insert(Value::Null);
        assign(slot, &path, decode(raw_value));
    }
    params
}

fn decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// `a[b][]` splits into `("a", ["b", ""])`.
///
/// Past [`MAX_DEPTH`] segments the remainder is kept verbatim, so
/// `a[1][2][3][4][5][6][7]` ends in the segment `"[6][7]"`.
fn split_key(key: &str) -> (&str, Vec<&str>) {
    let open = match key.find('[') {
        Some(open) if open > 0 => open,
        _ => return (key, Vec::new()),
    };
    let (root, mut rest) = key.split_at(open);
    let mut path = Vec::new();
    while path.len() < MAX_DEPTH {
        let Some(inner) = rest.strip_prefix('[') else {
            break;
        };
        let Some(close) = inner.find(']') else {
            break;
        };
        path.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    if !rest.is_empty() {
        path.push(rest);
    }
    (root, path)
}

fn assign(slot: &mut Value, path: &[&str], value: String) {
    let Some((segment, rest)) = path.split_first() else {
        append(slot, Value::String(value));
        return;
    };

    if segment.is_empty() {
        let items = as_array(slot);
        if rest.is_empty() {
            items.push(Value::String(value));
        } else {
            items.push(Value::Null);
            if let Some(last) = items.last_mut() {
                assign(last, rest, value);
            }
        }
        return;
    }

    if let Ok(index) = segment.parse::<usize>() {
        if index <= MAX_ARRAY_INDEX && matches!(slot, Value::Null | Value::Array(_)) {
            let items = as_array(slot);
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            assign(&mut items[index], rest, value);
            return;
        }
    }

    let fields = as_object(slot);
    let child = fields.entry((*segment).to_string()).or_insert(Value::Null);
    assign(child, rest, value);
}

/// Sets a leaf, turning a repeated key into an array.
fn append(slot: &mut Value, value: Value) {
    match slot {
        Value::Null => *slot = value,
        Value::Array(items) => items.push(value),
        other => {
            let previous = other.take();
            *other = Value::Array(vec![previous, value]);
        }
    }
}

fn as_array(slot: &mut Value) -> &mut Vec<Value> {
    if !slot.is_array() {
        *slot = match slot.take() {
            Value::Null => Value::Array(Vec::new()),
            Value::Object(fields) => Value::Array(fields.into_iter().map(|(_, v)| v).collect()),
            scalar => Value::Array(vec![scalar]),
        };
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!("slot was just made an array"),
    }
}

fn as_object(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = match slot.take() {
            Value::Array(items) => Value::Object(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            ),
            _ => Value::Object(Map::new()),
        };
    }
    match slot {
        Value::Object(fields) => fields,
        _ => unreachable!("slot was just made an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("postId=1", json!({"postId": "1"}); "plain pair")]
    #[test_case("a=1&b=2", json!({"a": "1", "b": "2"}); "two pairs")]
    #[test_case("a=1&a=2", json!({"a": ["1", "2"]}); "repeated key")]
    #[test_case("a[b]=1&a[c]=2", json!({"a": {"b": "1", "c": "2"}}); "nested object")]
    #[test_case("a[b][c]=x", json!({"a": {"b": {"c": "x"}}}); "deep nesting")]
    #[test_case("a[b][c][d][e][f][g][h]=x", json!({"a": {"b": {"c": {"d": {"e": {"f": {"[g][h]": "x"}}}}}}}); "nesting past the depth cap")]
    #[test_case("ids[]=1&ids[]=2", json!({"ids": ["1", "2"]}); "array push")]
    #[test_case("ids[1]=b&ids[0]=a", json!({"ids": ["a", "b"]}); "indexed array")]
    #[test_case("a[][b]=1", json!({"a": [{"b": "1"}]}); "array of objects")]
    #[test_case("a[100]=x", json!({"a": {"100": "x"}}); "large index is a key")]
    #[test_case("q=hello+world&e=%40x%2Fy", json!({"q": "hello world", "e": "@x/y"}); "decoding")]
    #[test_case("a%5Bb%5D=1", json!({"a": {"b": "1"}}); "encoded brackets")]
    #[test_case("flag&=x&&", json!({"flag": ""}); "bare and empty pairs")]
    #[test_case("[x]=1", json!({"[x]": "1"}); "leading bracket is literal")]
    #[test_case("a[b=1", json!({"a": {"[b": "1"}}); "unterminated bracket")]
    #[test_case("$limit=2&author[$in][]=1", json!({"$limit": "2", "author": {"$in": ["1"]}}); "query operators")]
    fn parses(query: &str, expected: Value) {
        assert_eq!(Value::Object(parse(query)), expected);
    }

    #[test]
    fn pathological_nesting_is_bounded() {
        let params = parse(&format!("a{}=x", "[b]".repeat(200_000)));

        let mut node = &params["a"];
        for _ in 0..MAX_DEPTH {
            node = &node["b"];
        }
        let (leaf_key, leaf) = node.as_object().unwrap().iter().next().unwrap();
        assert_eq!(leaf_key.len(), 3 * (200_000 - MAX_DEPTH));
        assert_eq!(leaf, &json!("x"));
    }

    #[test]
    fn empty_query_is_empty() {
        assert!(parse("").is_empty());
    }
}
