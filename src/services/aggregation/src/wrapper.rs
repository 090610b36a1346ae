//! Uniform view over heterogeneous backend payloads
//!
//! Every backend answers with a JSON object whose shape differs per service
//! and per release. `ApiResource` projects an ordered set of permitted
//! attribute names over that object; reads fall through to the payload and a
//! miss is `ApiError::MissingAttribute`. Typed wrappers are thin newtypes
//! declared with `api_wrapper!`.

use horizon_shared::{ApiError, ApiResult};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Attribute names a wrapper permits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrSet {
    /// Only the listed attributes, in this order
    Fixed(&'static [&'static str]),
    /// Every key of the payload (dict-style wrappers)
    Open,
}

impl AttrSet {
    pub fn permits(&self, attr: &str) -> bool {
        match self {
            AttrSet::Fixed(attrs) => attrs.contains(&attr),
            AttrSet::Open => true,
        }
    }
}

/// Attribute projection over one backend object
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResource {
    kind: &'static str,
    attrs: AttrSet,
    payload: Map<String, Value>,
}

impl ApiResource {
    /// Wrap a payload; anything but a JSON object is rejected
    pub fn new(kind: &'static str, attrs: AttrSet, payload: Value) -> ApiResult<Self> {
        match payload {
            Value::Object(payload) => Ok(Self::from_map(kind, attrs, payload)),
            other => Err(ApiError::BackendUnavailable {
                service: kind.to_string(),
                status: None,
                message: format!("expected an object, got {}", json_type(&other)),
            }),
        }
    }

    pub fn from_map(kind: &'static str, attrs: AttrSet, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            attrs,
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn attrs(&self) -> AttrSet {
        self.attrs
    }

    /// Read a permitted attribute
    pub fn get(&self, attr: &str) -> ApiResult<&Value> {
        if !self.attrs.permits(attr) {
            return Err(ApiError::missing(self.kind, attr));
        }
        self.payload
            .get(attr)
            .ok_or_else(|| ApiError::missing(self.kind, attr))
    }

    /// Read a permitted attribute, treating absence and null alike
    pub fn get_opt(&self, attr: &str) -> Option<&Value> {
        self.get(attr).ok().filter(|v| !v.is_null())
    }

    /// Read a string attribute
    pub fn get_str(&self, attr: &str) -> ApiResult<&str> {
        match self.get(attr)? {
            Value::String(s) => Ok(s),
            _ => Err(ApiError::missing(self.kind, attr)),
        }
    }

    /// Read a string attribute if present
    pub fn opt_str(&self, attr: &str) -> Option<&str> {
        self.get_opt(attr).and_then(Value::as_str)
    }

    /// Read an integer attribute, coercing numeric strings and truncating
    /// floats
    pub fn get_i64(&self, attr: &str) -> ApiResult<i64> {
        coerce_i64(self.get(attr)?).ok_or_else(|| ApiError::missing(self.kind, attr))
    }

    /// Identifier rendered as a string; numeric ids are accepted
    pub fn id(&self) -> ApiResult<String> {
        match self.get("id")? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(ApiError::missing(self.kind, "id")),
        }
    }

    /// Display name, empty when missing
    pub fn name(&self) -> &str {
        self.opt_str("name").unwrap_or("")
    }

    /// Write `"(<id prefix>)"` into `name` when it is missing or empty.
    ///
    /// A `len` of `None` uses the whole id. Never touches a non-empty name,
    /// and does nothing when the projection has no `name`.
    pub fn set_id_as_name_if_empty(&mut self, len: Option<usize>) {
        if !self.attrs.permits("name") || !self.name().is_empty() {
            return;
        }
        let id = match self.id() {
            Ok(id) => id,
            Err(_) => return,
        };
        let prefix: String = match len {
            Some(len) => id.chars().take(len).collect(),
            None => id,
        };
        self.payload
            .insert("name".to_string(), Value::String(format!("({})", prefix)));
    }

    /// Store a derived field computed at construction time
    pub(crate) fn derive(&mut self, attr: &str, value: Value) {
        self.payload.insert(attr.to_string(), value);
    }

    /// Raw payload, including attributes outside the projection
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Permitted attributes present on the payload, in projection order
    pub fn projection(&self) -> Vec<(&str, &Value)> {
        match self.attrs {
            AttrSet::Fixed(attrs) => attrs
                .iter()
                .filter_map(|attr| self.payload.get(*attr).map(|v| (*attr, v)))
                .collect(),
            AttrSet::Open => self
                .payload
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
        }
    }
}

impl Serialize for ApiResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let projection = self.projection();
        let mut map = serializer.serialize_map(Some(projection.len()))?;
        for (attr, value) in projection {
            map.serialize_entry(attr, value)?;
        }
        map.end()
    }
}

/// Typed wrapper over an `ApiResource`
pub trait ResourceWrapper: Sized {
    const KIND: &'static str;
    const ATTRS: AttrSet;

    fn from_resource(resource: ApiResource) -> Self;

    fn resource(&self) -> &ApiResource;

    fn wrap(payload: Value) -> ApiResult<Self> {
        ApiResource::new(Self::KIND, Self::ATTRS, payload).map(Self::from_resource)
    }

    fn wrap_all(payloads: Vec<Value>) -> ApiResult<Vec<Self>> {
        payloads.into_iter().map(Self::wrap).collect()
    }
}

/// Declare a newtype wrapper with a fixed or open attribute set
#[macro_export]
macro_rules! api_wrapper {
    ($(#[$meta:meta])* $name:ident, $kind:expr, open) => {
        $crate::api_wrapper!(@define $(#[$meta])* $name, $kind, $crate::wrapper::AttrSet::Open);
    };
    ($(#[$meta:meta])* $name:ident, $kind:expr, [$($attr:expr),* $(,)?]) => {
        $crate::api_wrapper!(@define $(#[$meta])* $name, $kind,
            $crate::wrapper::AttrSet::Fixed(&[$($attr),*]));
    };
    (@define $(#[$meta:meta])* $name:ident, $kind:expr, $attrs:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize)]
        #[serde(transparent)]
        pub struct $name($crate::wrapper::ApiResource);

        impl $crate::wrapper::ResourceWrapper for $name {
            const KIND: &'static str = $kind;
            const ATTRS: $crate::wrapper::AttrSet = $attrs;

            fn from_resource(resource: $crate::wrapper::ApiResource) -> Self {
                Self(resource)
            }

            fn resource(&self) -> &$crate::wrapper::ApiResource {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = $crate::wrapper::ApiResource;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }
    };
}

/// Integer view of a JSON value: numbers, floats (truncated) and numeric
/// strings
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

/// Pull a list out of an envelope such as `{"servers": [...]}`
pub(crate) fn take_list(mut body: Value, service: &str, key: &str) -> ApiResult<Vec<Value>> {
    match body.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(ApiError::unavailable(
            service,
            format!("response has no '{}' list", key),
        )),
        Some(other) => Err(ApiError::unavailable(
            service,
            format!("'{}' is {}, expected a list", key, json_type(&other)),
        )),
    }
}

/// Pull one object out of an envelope such as `{"server": {...}}`
pub(crate) fn take_object(mut body: Value, service: &str, key: &str) -> ApiResult<Value> {
    match body.get_mut(key).map(Value::take) {
        Some(object @ Value::Object(_)) => Ok(object),
        _ => Err(ApiError::unavailable(
            service,
            format!("response has no '{}' object", key),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    api_wrapper!(Thing, "Thing", ["id", "name", "size"]);
    api_wrapper!(OpenThing, "OpenThing", open);
    api_wrapper!(Nameless, "Nameless", ["id", "size"]);

    #[test]
    fn test_projection_rejects_unlisted_attributes() {
        let thing = Thing::wrap(json!({"id": "abc", "name": "x", "secret": 1})).unwrap();

        assert_eq!(thing.get("name").unwrap(), &json!("x"));
        assert_eq!(
            thing.get("secret").unwrap_err(),
            ApiError::missing("Thing", "secret")
        );
        assert_eq!(
            thing.get("size").unwrap_err(),
            ApiError::missing("Thing", "size")
        );

        let open = OpenThing::wrap(json!({"secret": 1})).unwrap();
        assert_eq!(open.get("secret").unwrap(), &json!(1));
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(Thing::wrap(json!([1, 2])).is_err());
    }

    #[test]
    fn test_integer_coercion() {
        let thing = Thing::wrap(json!({"id": 7, "size": "40"})).unwrap();
        assert_eq!(thing.get_i64("size").unwrap(), 40);
        assert_eq!(thing.id().unwrap(), "7");

        assert_eq!(coerce_i64(&json!(2.9)), Some(2));
        assert_eq!(coerce_i64(&json!(" 12 ")), Some(12));
        assert_eq!(coerce_i64(&json!("twelve")), None);
        assert_eq!(coerce_i64(&Value::Null), None);
    }

    #[test]
    fn test_set_id_as_name_if_empty() {
        let mut thing = Thing::wrap(json!({"id": "0123456789abcdef", "name": ""})).unwrap();
        thing.set_id_as_name_if_empty(Some(8));
        assert_eq!(thing.name(), "(01234567)");

        // idempotent: the name is now non-empty
        thing.set_id_as_name_if_empty(Some(4));
        assert_eq!(thing.name(), "(01234567)");

        let mut named = Thing::wrap(json!({"id": "0123", "name": "web"})).unwrap();
        named.set_id_as_name_if_empty(Some(8));
        assert_eq!(named.name(), "web");

        let mut missing = Thing::wrap(json!({"id": "0123"})).unwrap();
        missing.set_id_as_name_if_empty(None);
        assert_eq!(missing.name(), "(0123)");
    }

    #[test]
    fn test_id_as_name_skips_projection_without_name() {
        let mut nameless = Nameless::wrap(json!({"id": "0123456789"})).unwrap();
        nameless.set_id_as_name_if_empty(Some(4));

        assert!(nameless.payload().get("name").is_none());
        assert_eq!(
            nameless.get("name").unwrap_err(),
            ApiError::missing("Nameless", "name")
        );

        let mut open = OpenThing::wrap(json!({"id": "0123456789"})).unwrap();
        open.set_id_as_name_if_empty(Some(4));
        assert_eq!(open.name(), "(0123)");
    }

    #[test]
    fn test_serialize_uses_projection_order() {
        let thing = Thing::wrap(json!({"size": 1, "secret": true, "id": "a"})).unwrap();
        let rendered = serde_json::to_string(&thing).unwrap();
        assert_eq!(rendered, r#"{"id":"a","size":1}"#);
    }

    #[test]
    fn test_envelopes() {
        let items = take_list(json!({"servers": [{"id": "a"}]}), "compute", "servers").unwrap();
        assert_eq!(items.len(), 1);
        assert!(take_list(json!({}), "compute", "servers").is_err());
        assert!(take_object(json!({"server": []}), "compute", "server").is_err());
    }
}
