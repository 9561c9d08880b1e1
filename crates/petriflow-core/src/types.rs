use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque structured payload carried by cases and work items
///
/// Net data, work-item snapshots and task outputs are all JSON objects
/// wrapped in this type. Business logic never inspects it; only split
/// predicates, the splitter key of multi-instance tasks and the output
/// validator read from it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct DataPacket {
    /// The inner JSON value
    pub value: Value,
}

impl DataPacket {
    /// Create a new data packet from a JSON value
    #[inline]
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Create a null data packet
    #[inline]
    pub fn null() -> Self {
        Self { value: Value::Null }
    }

    /// Create an empty object packet
    #[inline]
    pub fn empty() -> Self {
        Self {
            value: Value::Object(Map::new()),
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Check if the data packet is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Try to view the packet as an object
    #[inline]
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.value.as_object()
    }

    /// Look up a top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.as_object().and_then(|obj| obj.get(key))
    }

    /// Deserialize the packet into a typed value
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create a data packet from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Create an object data packet with a single key-value pair
    #[inline]
    pub fn singleton(key: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        Self::new(Value::Object(map))
    }

    /// Shallow-merge this packet's fields into `target`
    ///
    /// Non-object packets are ignored. A non-object target is replaced by an
    /// empty object first.
    pub fn merge_into(&self, target: &mut DataPacket) {
        let Some(fields) = self.value.as_object() else {
            return;
        };
        if !target.value.is_object() {
            target.value = Value::Object(Map::new());
        }
        if let Value::Object(dest) = &mut target.value {
            for (key, value) in fields {
                dest.insert(key.clone(), value.clone());
            }
        }
    }

    /// Return a copy of `self` with `other` merged on top
    pub fn merged(&self, other: &DataPacket) -> DataPacket {
        let mut out = self.clone();
        other.merge_into(&mut out);
        out
    }
}

impl From<Value> for DataPacket {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_packet_serializes_transparently() {
        let packet = DataPacket::new(json!({"amount": 12}));
        let serialized = serde_json::to_string(&packet).unwrap();
        assert_eq!(serialized, r#"{"amount":12}"#);
    }

    #[test]
    fn test_get_field() {
        let packet = DataPacket::new(json!({"route": "express"}));
        assert_eq!(packet.get("route"), Some(&json!("express")));
        assert_eq!(packet.get("missing"), None);
        assert_eq!(DataPacket::null().get("route"), None);
    }

    #[test]
    fn test_merge_overwrites_top_level_fields() {
        let base = DataPacket::new(json!({"a": 1, "b": {"x": 1}}));
        let update = DataPacket::new(json!({"b": 2, "c": 3}));

        let merged = base.merged(&update);
        assert_eq!(merged.into_value(), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_merge_into_null_target() {
        let mut target = DataPacket::null();
        DataPacket::singleton("k", json!(true)).merge_into(&mut target);
        assert_eq!(target.into_value(), json!({"k": true}));
    }

    #[test]
    fn test_non_object_merge_is_ignored() {
        let mut target = DataPacket::new(json!({"a": 1}));
        DataPacket::new(json!([1, 2])).merge_into(&mut target);
        assert_eq!(target.into_value(), json!({"a": 1}));
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Order {
            id: u32,
        }

        let packet = DataPacket::from(&Order { id: 7 }).unwrap();
        let order: Order = packet.to().unwrap();
        assert_eq!(order, Order { id: 7 });
    }
}
