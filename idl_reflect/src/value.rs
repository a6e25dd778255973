/* Decoded values - a tree mirroring the decode plan */

use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Value {
    Unsigned {
        value: u64,
    },
    Signed {
        value: i64,
    },

    /* Enum field: raw bits plus the member name when one matches exactly */
    Enum {
        bits: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member: Option<String>,
    },

    Struct {
        fields: Vec<(String, Value)>,
    },

    Array {
        elements: Vec<Value>,
    },

    /* Active switch arm; `value` is absent for an empty arm */
    Switch {
        case: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<Value>>,
    },

    /* Pointees reached through the same offset share one allocation */
    Pointer {
        offset: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Arc<Value>>,
    },
}

impl Value {
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct { fields } => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Follows a dotted path of field names, looking through switches and
    /// non-null pointers on the way.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |value, name| value.payload()?.field(name))
    }

    /// The value behind switches and pointers, or `self`.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Value::Switch { value, .. } => value.as_deref()?.payload(),
            Value::Pointer { target, .. } => target.as_deref()?.payload(),
            other => Some(other),
        }
    }

    /// Integer content as zero-extended bits of its two's complement form.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned { value } => Some(*value),
            Value::Signed { value } => u64::try_from(*value).ok(),
            Value::Enum { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed { value } => Some(*value),
            Value::Unsigned { value } => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::Array { elements } => Some(elements),
            _ => None,
        }
    }

    /// Array of byte-sized unsigned values as bytes.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        self.elements()?
            .iter()
            .map(|e| e.as_u64().and_then(|v| u8::try_from(v).ok()))
            .collect()
    }

    pub fn case(&self) -> Option<&str> {
        match self {
            Value::Switch { case, .. } => Some(case),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&Arc<Value>> {
        match self {
            Value::Pointer { target, .. } => target.as_ref(),
            _ => None,
        }
    }
    /// JSON in the serde layout, except that a pointee shared by several
    /// pointers is written in full only at its first reference. Later
    /// references carry `"target": {"ref": offset}` instead, so output stays
    /// linear in the decoded size.
    pub fn to_json_shared(&self) -> Json {
        let mut written = HashSet::new();
        self.json_into(&mut written)
    }

    fn json_into(&self, written: &mut HashSet<*const Value>) -> Json {
        match self {
            Value::Unsigned { value } => json!({ "kind": "unsigned", "value": value }),
            Value::Signed { value } => json!({ "kind": "signed", "value": value }),
            Value::Enum { bits, member } => {
                let mut out = json!({ "kind": "enum", "bits": bits });
                if let (Some(member), Json::Object(map)) = (member, &mut out) {
                    map.insert("member".into(), Json::from(member.as_str()));
                }
                out
            }
            Value::Struct { fields } => {
                let fields: Vec<Json> = fields
                    .iter()
                    .map(|(name, value)| json!([name, value.json_into(written)]))
                    .collect();
                json!({ "kind": "struct", "fields": fields })
            }
            Value::Array { elements } => {
                let elements: Vec<Json> = elements.iter().map(|e| e.json_into(written)).collect();
                json!({ "kind": "array", "elements": elements })
            }
            Value::Switch { case, value } => {
                let mut map = JsonMap::new();
                map.insert("kind".into(), Json::from("switch"));
                map.insert("case".into(), Json::from(case.as_str()));
                if let Some(value) = value {
                    map.insert("value".into(), value.json_into(written));
                }
                Json::Object(map)
            }
            Value::Pointer { offset, target } => {
                let mut map = JsonMap::new();
                map.insert("kind".into(), Json::from("pointer"));
                map.insert("offset".into(), Json::from(*offset));
                if let Some(target) = target {
                    let body = if written.insert(Arc::as_ptr(target)) {
                        target.json_into(written)
                    } else {
                        json!({ "ref": offset })
                    };
                    map.insert("target".into(), body);
                }
                Json::Object(map)
            }
        }
    }
}
