use serde::{Deserialize, Serialize};

/// Raw stored value of a feature state. Only the member selected by `value_type` is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FeatureStateValue {
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub integer_value: Option<i64>,
    #[serde(default)]
    pub boolean_value: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Integer(i64),
    String(String),
    #[default]
    Null,
}

pub fn typed_value_of(raw: Option<&FeatureStateValue>) -> FlagValue {
    let Some(raw) = raw else {
        return FlagValue::Null;
    };

    match raw.value_type.as_deref() {
        Some("bool") => raw.boolean_value.map_or(FlagValue::Null, FlagValue::Bool),
        Some("int") => raw.integer_value.map_or(FlagValue::Null, FlagValue::Integer),
        _ => raw
            .string_value
            .clone()
            .map_or(FlagValue::Null, FlagValue::String),
    }
}
