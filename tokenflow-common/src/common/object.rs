use std::collections::HashMap;

use numtoa::NumToA;

use crate::prelude::{fmt_err, ErrorCode, FlowResult, InlineStr};

/// Dynamically typed value held by process variables and event payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Int(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    String(InlineStr),
    Map(HashMap<InlineStr, Object>),
    List(Vec<Object>),
    Null,
}

impl Object {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> FlowResult<bool> {
        match self {
            Self::Boolean(v) => Ok(*v),
            _ => fmt_err!(IllegalArgument, "not a bool {:?}", self),
        }
    }

    pub fn as_i64(&self) -> FlowResult<i64> {
        match self {
            Self::Int(v) => Ok(*v as i64),
            Self::Long(v) => Ok(*v),
            _ => fmt_err!(IllegalArgument, "not an integer {:?}", self),
        }
    }

    pub fn as_f64(&self) -> FlowResult<f64> {
        match self {
            Self::Int(v) => Ok(*v as f64),
            Self::Long(v) => Ok(*v as f64),
            Self::Double(v) => Ok(*v),
            _ => fmt_err!(IllegalArgument, "not a number {:?}", self),
        }
    }

    pub fn as_string(&self) -> FlowResult<&InlineStr> {
        match self {
            Self::String(v) => Ok(v),
            _ => fmt_err!(IllegalArgument, "not a string {:?}", self),
        }
    }

    pub fn to_inline_str(&self) -> InlineStr {
        match self {
            Object::Int(v) => (*v).numtoa_str(10, &mut [0; 16]).into(),
            Object::Long(v) => (*v).numtoa_str(10, &mut [0; 32]).into(),
            Object::Double(v) => v.to_string().into(),
            Object::Boolean(v) => {
                if *v {
                    "true".into()
                } else {
                    "false".into()
                }
            }
            Object::String(v) => v.clone(),
            Object::Map(_) | Object::List(_) => self.to_json().to_string().into(),
            Object::Null => "".into(),
        }
    }
}

/// json <-> object
impl Object {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Object::Int(v) => serde_json::Value::Number((*v).into()),
            Object::Long(v) => serde_json::Value::Number((*v).into()),
            Object::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Object::Boolean(v) => serde_json::Value::Bool(*v),
            Object::String(v) => serde_json::Value::String(v.to_string()),
            Object::Map(v) => {
                let mut map = serde_json::Map::with_capacity(v.len());
                for (k, v) in v {
                    map.insert(k.to_string(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            Object::List(v) => serde_json::Value::Array(v.iter().map(Object::to_json).collect()),
            Object::Null => serde_json::Value::Null,
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Object {
        match json {
            serde_json::Value::Bool(v) => (*v).into(),
            serde_json::Value::Number(v) => {
                if let Some(v) = v.as_i64() {
                    if v < i32::MAX as i64 && v > i32::MIN as i64 {
                        Object::Int(v as i32)
                    } else {
                        Object::Long(v)
                    }
                } else {
                    Object::Double(v.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(v) => v.into(),
            serde_json::Value::Object(v) => Object::Map(Self::convert_jsonmap_to_hashmap(v)),
            serde_json::Value::Array(v) => Object::List(v.iter().map(Self::from_json).collect()),
            serde_json::Value::Null => Object::Null,
        }
    }

    pub fn convert_jsonmap_to_hashmap(
        jsonmap: &serde_json::Map<String, serde_json::Value>,
    ) -> HashMap<InlineStr, Object> {
        let mut map = HashMap::with_capacity(jsonmap.len());
        for (k, v) in jsonmap {
            map.insert(k.into(), Self::from_json(v));
        }
        map
    }
}

impl From<i32> for Object {
    fn from(value: i32) -> Self {
        Object::Int(value)
    }
}
impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Long(value)
    }
}
impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Double(value)
    }
}
impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}
impl From<InlineStr> for Object {
    fn from(value: InlineStr) -> Self {
        Object::String(value)
    }
}
impl From<&InlineStr> for Object {
    fn from(value: &InlineStr) -> Self {
        Object::String(value.clone())
    }
}
impl From<&str> for Object {
    fn from(value: &str) -> Self {
        Object::String(InlineStr::from(value))
    }
}
impl From<&String> for Object {
    fn from(value: &String) -> Self {
        Object::String(InlineStr::from(value.as_str()))
    }
}
impl From<String> for Object {
    fn from(value: String) -> Self {
        Object::String(InlineStr::from(value))
    }
}
impl From<Vec<Object>> for Object {
    fn from(value: Vec<Object>) -> Self {
        Object::List(value)
    }
}
impl From<HashMap<InlineStr, Object>> for Object {
    fn from(value: HashMap<InlineStr, Object>) -> Self {
        Object::Map(value)
    }
}
impl From<&serde_json::Value> for Object {
    fn from(value: &serde_json::Value) -> Self {
        Object::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_numbers_keep_their_width() {
        let json = serde_json::json!({"small": 7, "big": 9_000_000_000_i64, "ratio": 0.5});
        let object = Object::from_json(&json);
        let Object::Map(map) = object else {
            panic!("expected a map");
        };
        assert_eq!(map.get("small"), Some(&Object::Int(7)));
        assert_eq!(map.get("big"), Some(&Object::Long(9_000_000_000)));
        assert_eq!(map.get("ratio"), Some(&Object::Double(0.5)));
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(Object::Int(3).as_i64().ok(), Some(3));
        assert_eq!(Object::Long(3).as_f64().ok(), Some(3.0));
        assert!(Object::from("x").as_i64().is_err());
        assert_eq!(Object::Boolean(true).to_inline_str().as_str(), "true");
    }
}
