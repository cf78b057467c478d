use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Operating system family the host application runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
    #[default]
    Other,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Other
        }
    }

    /// Parses a runtime-reported platform name. Anything that is not
    /// android or ios maps to [`Platform::Other`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "android" => Platform::Android,
            "ios" => Platform::Ios,
            _ => Platform::Other,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Other => "other",
        }
    }

    /// Whether native packages are installed by the app itself instead of
    /// being handed to a store or browser.
    #[must_use]
    pub fn installs_native_in_app(self) -> bool {
        matches!(self, Platform::Android)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Platform::from_name(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::Platform;

    #[test]
    fn from_name_is_case_insensitive() {
        assert_eq!(Platform::from_name("Android"), Platform::Android);
        assert_eq!(Platform::from_name(" iOS "), Platform::Ios);
        assert_eq!(Platform::from_name("windows"), Platform::Other);
        assert_eq!(Platform::from_name(""), Platform::Other);
    }

    #[test]
    fn only_android_installs_native_packages_in_app() {
        assert!(Platform::Android.installs_native_in_app());
        assert!(!Platform::Ios.installs_native_in_app());
        assert!(!Platform::Other.installs_native_in_app());
    }

    #[test]
    fn serde_uses_lowercase_names_and_falls_back_to_other() {
        let value = serde_json::to_value(Platform::Ios).expect("platform should serialize");
        assert_eq!(value, serde_json::json!("ios"));

        let parsed: Platform =
            serde_json::from_value(serde_json::json!("devtools")).expect("unknown name parses");
        assert_eq!(parsed, Platform::Other);
    }
}
