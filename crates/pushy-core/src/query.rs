use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::info::VersionInfo;
use crate::outcome::{StatusCode, UpdateOutcome};
use crate::protocol::{PackageDescriptor, UpdateRequest};
use crate::transport::UpdateTransport;

#[must_use]
pub fn update_endpoint(base_url: &str) -> String {
    format!("{}/api/update", base_url.trim_end_matches('/'))
}

/// Ask the update endpoint about newer packages.
///
/// Never fails: transport errors come back as
/// [`StatusCode::TransportFailed`] with the error attached.
pub async fn check_for_update(
    transport: &dyn UpdateTransport,
    info: &VersionInfo,
    config: &Config,
) -> UpdateOutcome {
    let url = update_endpoint(&config.update_url);
    let request = UpdateRequest::new(&config.project_id, info);
    debug!("Checking for updates at {url}");

    match transport.post_update(&url, &request).await {
        Ok(body) => classify_response(info, body),
        Err(error) => {
            warn!("Update request failed: {error}");
            UpdateOutcome::new(StatusCode::TransportFailed).with_error(error)
        }
    }
}

/// Map a decoded response body onto an outcome.
///
/// A newer native package wins over a resource package. A resource package
/// only qualifies when it was built for the installed native version.
#[must_use]
pub fn classify_response(info: &VersionInfo, body: Value) -> UpdateOutcome {
    if !body.get("success").is_some_and(is_truthy) {
        let outcome = UpdateOutcome::new(StatusCode::ServerRejected);
        let outcome = match body.get("message").and_then(Value::as_str) {
            Some(message) => outcome.with_message(message),
            None => outcome,
        };
        return outcome.with_response(body);
    }

    let data = body.get("data");
    let native = package_at(data, "native");
    let wgt = package_at(data, "wgt");

    if let Some(native) = native.filter(|package| package.version_code > info.native_version_code)
    {
        return UpdateOutcome::new(StatusCode::NativeUpdateRequired)
            .with_data(native)
            .with_response(body);
    }

    if let Some(wgt) = wgt.filter(|package| {
        package.native_version_code == Some(info.native_version_code)
            && package.version_code > info.resource_version_code
    }) {
        return UpdateOutcome::new(StatusCode::ResourceUpdateRequired)
            .with_data(wgt)
            .with_response(body);
    }

    UpdateOutcome::new(StatusCode::NoUpdateAvailable).with_response(body)
}

/// Servers send `success` as a bool, a number or a string, so any value
/// that is not empty, zero or false counts.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.abs() > 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn package_at(data: Option<&Value>, key: &str) -> Option<PackageDescriptor> {
    let raw = data?.get(key)?;
    if raw.is_null() {
        return None;
    }
    match PackageDescriptor::deserialize(raw) {
        Ok(package) => Some(package),
        Err(error) => {
            warn!("Ignoring malformed `{key}` package in update response: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Map, Value, json};

    use super::{check_for_update, classify_response, update_endpoint};
    use crate::config::Config;
    use crate::info::VersionInfo;
    use crate::outcome::StatusCode;
    use crate::protocol::UpdateRequest;
    use crate::transport::{TransportError, UpdateTransport};
    use pushy_platform::Platform;

    fn local(native: u64, resource: u64) -> VersionInfo {
        VersionInfo {
            app_id: "__UNI__ABC".to_string(),
            native_version_name: "1.0.0".to_string(),
            native_version_code: native,
            resource_version_name: "1.0.0".to_string(),
            resource_version_code: resource,
            platform: Platform::Android,
            device_uuid: None,
            system_info: Map::new(),
        }
    }

    #[test]
    fn endpoint_appends_api_path() {
        assert_eq!(
            update_endpoint("https://api.example.com"),
            "https://api.example.com/api/update"
        );
        assert_eq!(
            update_endpoint("https://api.example.com/"),
            "https://api.example.com/api/update"
        );
    }

    #[test]
    fn qualifying_resource_package_is_required() {
        let outcome = classify_response(
            &local(10, 5),
            json!({
                "success": true,
                "data": { "wgt": {
                    "nativeVersionCode": 10,
                    "versionCode": 7,
                    "url": "https://x/y.wgt",
                    "updateType": 1
                }}
            }),
        );

        assert_eq!(outcome.status_code, StatusCode::ResourceUpdateRequired);
        assert_eq!(outcome.data.map(|package| package.version_code), Some(7));
    }

    #[test]
    fn empty_data_means_no_update() {
        let outcome = classify_response(&local(10, 5), json!({ "success": true, "data": {} }));
        assert_eq!(outcome.status_code, StatusCode::NoUpdateAvailable);
        assert!(outcome.data.is_none());
    }

    #[test]
    fn native_update_wins_over_resource_update() {
        let outcome = classify_response(
            &local(10, 5),
            json!({
                "success": true,
                "data": {
                    "native": { "versionCode": 11, "url": "https://x/app.apk", "updateType": 2 },
                    "wgt": { "nativeVersionCode": 10, "versionCode": 9, "url": "https://x/y.wgt" }
                }
            }),
        );

        assert_eq!(outcome.status_code, StatusCode::NativeUpdateRequired);
        assert_eq!(outcome.data.map(|package| package.version_code), Some(11));
    }

    #[test]
    fn resource_package_for_other_native_baseline_is_ignored() {
        let outcome = classify_response(
            &local(10, 5),
            json!({
                "success": true,
                "data": { "wgt": { "nativeVersionCode": 9, "versionCode": 50, "url": "u" } }
            }),
        );
        assert_eq!(outcome.status_code, StatusCode::NoUpdateAvailable);
    }

    #[test]
    fn same_or_older_versions_are_not_updates() {
        let outcome = classify_response(
            &local(10, 5),
            json!({
                "success": true,
                "data": {
                    "native": { "versionCode": 10, "url": "a" },
                    "wgt": { "nativeVersionCode": 10, "versionCode": 5, "url": "b" }
                }
            }),
        );
        assert_eq!(outcome.status_code, StatusCode::NoUpdateAvailable);
    }

    #[test]
    fn unsuccessful_response_passes_server_message_through() {
        let outcome = classify_response(
            &local(10, 5),
            json!({ "success": false, "message": "project not found" }),
        );

        assert_eq!(outcome.status_code, StatusCode::ServerRejected);
        assert_eq!(outcome.message, "project not found");
        assert!(outcome.response.is_some());
    }

    #[test]
    fn malformed_bodies_still_classify() {
        for body in [
            json!("oops"),
            json!(null),
            json!([1, 2]),
            json!({ "success": 0 }),
            json!({ "success": "" }),
            json!({ "success": null }),
        ] {
            let outcome = classify_response(&local(10, 5), body);
            assert_eq!(outcome.status_code, StatusCode::ServerRejected);
        }

        let outcome = classify_response(
            &local(10, 5),
            json!({ "success": true, "data": { "native": { "url": "no code" } } }),
        );
        assert_eq!(outcome.status_code, StatusCode::NoUpdateAvailable);

        let outcome = classify_response(&local(10, 5), json!({ "success": true }));
        assert_eq!(outcome.status_code, StatusCode::NoUpdateAvailable);
    }

    #[test]
    fn truthy_success_flags_are_accepted() {
        for flag in [json!(1), json!("true"), json!("1")] {
            let outcome = classify_response(
                &local(10, 5),
                json!({
                    "success": flag,
                    "data": { "wgt": { "nativeVersionCode": 10, "versionCode": 6, "url": "u.wgt" } }
                }),
            );
            assert_eq!(outcome.status_code, StatusCode::ResourceUpdateRequired);
        }
    }

    struct RecordingTransport {
        reply: Result<Value, String>,
        seen: Mutex<Vec<(String, UpdateRequest)>>,
    }

    #[async_trait]
    impl UpdateTransport for RecordingTransport {
        async fn post_update(
            &self,
            url: &str,
            request: &UpdateRequest,
        ) -> Result<Value, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), request.clone()));
            self.reply.clone().map_err(TransportError::other)
        }
    }

    fn config() -> Config {
        Config {
            project_id: "project-1".to_string(),
            update_url: "https://api.example.com".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn sends_project_and_version_facts() {
        let transport = RecordingTransport {
            reply: Ok(json!({ "success": true, "data": {} })),
            seen: Mutex::new(Vec::new()),
        };

        let outcome = check_for_update(&transport, &local(10, 5), &config()).await;
        assert_eq!(outcome.status_code, StatusCode::NoUpdateAvailable);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (url, request) = &seen[0];
        assert_eq!(url, "https://api.example.com/api/update");
        let body = serde_json::to_value(request).expect("request should serialize");
        assert_eq!(body["projectId"], "project-1");
        assert_eq!(body["nativeVersionCode"], 10);
        assert_eq!(body["wgtVersionCode"], 5);
        assert_eq!(body["platform"], "android");
        assert_eq!(body["systemInfo"]["platform"], "android");
    }

    #[tokio::test]
    async fn transport_failure_becomes_an_outcome() {
        let transport = RecordingTransport {
            reply: Err("timeout".to_string()),
            seen: Mutex::new(Vec::new()),
        };

        let outcome = check_for_update(&transport, &local(10, 5), &config()).await;

        assert_eq!(outcome.status_code, StatusCode::TransportFailed);
        assert_eq!(outcome.error_message().as_deref(), Some("timeout"));
    }
}
