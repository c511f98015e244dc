use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::Guid;

/// A decoded payload field value.
///
/// Small integers and booleans are inline variants; strings are interned
/// `Arc<str>` handles shared across the trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(Arc<str>),
    Guid(Guid),
    Object(Payload),
    Array(Vec<PayloadValue>),
}

/// An event payload: field name to value, in definition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: Vec<(Arc<str>, PayloadValue)>,
}

impl Payload {
    pub fn new() -> Self {
        Payload::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Payload {
            fields: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, name: Arc<str>, value: PayloadValue) {
        self.fields.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&PayloadValue> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &PayloadValue)> {
        self.fields.iter().map(|(n, v)| (n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name.as_ref(), value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_by_name() {
        let mut payload = Payload::new();
        payload.push(Arc::from("TaskID"), PayloadValue::I32(4));
        payload.push(Arc::from("Behavior"), PayloadValue::I32(2));

        assert_eq!(payload.get("TaskID"), Some(&PayloadValue::I32(4)));
        assert_eq!(payload.get("Missing"), None);
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn test_serializes_as_map() {
        let mut inner = Payload::new();
        inner.push(Arc::from("x"), PayloadValue::U8(7));

        let mut payload = Payload::new();
        payload.push(Arc::from("name"), PayloadValue::String(Arc::from("hi")));
        payload.push(Arc::from("obj"), PayloadValue::Object(inner));

        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"name":"hi","obj":{"x":7}}"#);
    }
}
