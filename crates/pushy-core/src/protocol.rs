use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::info::VersionInfo;
use pushy_platform::Platform;

/// Body of `POST {updateUrl}/api/update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub project_id: String,
    pub wgt_version: String,
    pub wgt_version_code: u64,
    pub native_version: String,
    pub native_version_code: u64,
    pub platform: Platform,
    pub system_info: Value,
}

impl UpdateRequest {
    #[must_use]
    pub fn new(project_id: &str, info: &VersionInfo) -> Self {
        Self {
            project_id: project_id.to_string(),
            wgt_version: info.resource_version_name.clone(),
            wgt_version_code: info.resource_version_code,
            native_version: info.native_version_name.clone(),
            native_version_code: info.native_version_code,
            platform: info.platform,
            system_info: info.system_info_json(),
        }
    }
}

/// How the server wants a package rolled out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateType {
    /// Ask the user first.
    UserConfirm,
    /// Install without asking.
    Forced,
    /// Download and install in the background, no UI.
    Silent,
    /// Anything the client does not understand. Dispatch ignores it.
    #[default]
    Unknown,
}

impl UpdateType {
    #[must_use]
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => UpdateType::UserConfirm,
            2 => UpdateType::Forced,
            3 => UpdateType::Silent,
            _ => UpdateType::Unknown,
        }
    }

    #[must_use]
    pub fn code(self) -> u64 {
        match self {
            UpdateType::UserConfirm => 1,
            UpdateType::Forced => 2,
            UpdateType::Silent => 3,
            UpdateType::Unknown => 0,
        }
    }
}

impl Serialize for UpdateType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.code())
    }
}

impl<'de> Deserialize<'de> for UpdateType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(code_from_value(&value).map_or(UpdateType::Unknown, UpdateType::from_code))
    }
}

/// A native or resource package offered by the server.
///
/// Version codes are accepted as numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    #[serde(deserialize_with = "version_code")]
    pub version_code: u64,
    #[serde(default, rename = "url")]
    pub download_url: String,
    #[serde(default)]
    pub update_type: UpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default, rename = "version", skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    /// Native baseline a resource package was built against.
    #[serde(
        default,
        deserialize_with = "optional_version_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub native_version_code: Option<u64>,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn code_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| *float >= 0.0 && float.fract() == 0.0)
                .map(|float| float as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn version_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    code_from_value(&value)
        .ok_or_else(|| D::Error::custom(format!("invalid version code: {value}")))
}

fn optional_version_code<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => code_from_value(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid version code: {value}"))),
    }
}
