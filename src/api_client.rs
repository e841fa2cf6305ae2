//! Blocking connector for the AppSheet REST API (v2).
//!
//! Every table operation is one `POST` to
//! `{base}/apps/{app_id}/tables/{table}/Action` carrying
//! `{"Action": .., "Rows": [..], "Properties": {..}}`. The response body is
//! decoded as JSON whatever the HTTP status; only transport and decoding
//! failures come back as errors.

use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.appsheet.com/api/v2";

/// Header carrying the application access key.
pub const ACCESS_KEY_HEADER: &str = "ApplicationAccessKey";

/// One record, keyed by column name. The table's key column(s) identify it.
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("'{0}' cannot be used as a URL path segment")]
    InvalidSegment(String),

    #[error("request to AppSheet failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("AppSheet response is not valid JSON (HTTP {status}): {source}")]
    Parse {
        status: u16,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-call directives such as `Locale`, `Timezone` or `Selector`.
///
/// Keys are sent exactly as given, so anything the service accepts can be
/// set through [`Properties::insert`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn locale(self, locale: &str) -> Self {
        self.insert("Locale", locale)
    }

    /// `"lat, long"` used for location-based expressions.
    pub fn location(self, location: &str) -> Self {
        self.insert("Location", location)
    }

    pub fn timezone(self, timezone: &str) -> Self {
        self.insert("Timezone", timezone)
    }

    pub fn user_id(self, user_id: &str) -> Self {
        self.insert("UserId", user_id)
    }

    pub fn run_as_user_email(self, email: &str) -> Self {
        self.insert("RunAsUserEmail", email)
    }

    /// Expression choosing (and ordering) the rows a `Find` returns,
    /// e.g. `Filter(People, [Age] >= 21)`.
    pub fn selector(self, expression: &str) -> Self {
        self.insert("Selector", expression)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Body of every table action request.
#[derive(Debug, Serialize)]
pub struct ActionRequest<'a> {
    #[serde(rename = "Action")]
    pub action: &'a str,
    #[serde(rename = "Rows")]
    pub rows: &'a [Row],
    #[serde(rename = "Properties")]
    pub properties: &'a Properties,
}

#[derive(Clone)]
pub struct Connector {
    app_id: String,
    access_key: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

/// Connect to an AppSheet app.
///
/// The API must be enabled for the app (Settings > Integrations, "IN: from
/// cloud services to your app") and `access_key` must be one of its
/// unexpired Application Access Keys.
pub fn connect(app_id: &str, access_key: &str) -> Connector {
    Connector::new(app_id, access_key)
}

impl Connector {
    pub fn new(app_id: &str, access_key: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            access_key: access_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Send requests to another API root, e.g. a regional endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Add rows. Key columns may be omitted when they have an initial value
    /// such as `UNIQUEID()`.
    pub fn add(
        &self,
        table: &str,
        rows: &[Row],
        properties: Option<&Properties>,
    ) -> Result<Value, ConnectorError> {
        self.execute(table, "Add", rows, properties)
    }

    /// Delete the rows identified by their key columns.
    pub fn delete(
        &self,
        table: &str,
        rows: &[Row],
        properties: Option<&Properties>,
    ) -> Result<Value, ConnectorError> {
        self.execute(table, "Delete", rows, properties)
    }

    /// Update rows; each row must carry its key column values.
    pub fn edit(
        &self,
        table: &str,
        rows: &[Row],
        properties: Option<&Properties>,
    ) -> Result<Value, ConnectorError> {
        self.execute(table, "Edit", rows, properties)
    }

    /// Read rows, either by key (`rows`) or with a `Selector` property and
    /// no rows.
    pub fn find(
        &self,
        table: &str,
        rows: &[Row],
        properties: Option<&Properties>,
    ) -> Result<Value, ConnectorError> {
        self.execute(table, "Find", rows, properties)
    }

    /// Invoke a named app action on the given rows. The name is not checked
    /// against the app's actions.
    pub fn invoke(
        &self,
        table: &str,
        rows: &[Row],
        action: &str,
        properties: Option<&Properties>,
    ) -> Result<Value, ConnectorError> {
        self.execute(table, action, rows, properties)
    }

    /// `{base}/apps/{app_id}/tables/{table}/Action`, with the app id and
    /// table name percent-encoded as single path segments.
    pub fn action_url(&self, table: &str) -> Result<Url, ConnectorError> {
        // Dot segments are normalised away by URL parsing, even when encoded
        for segment in [self.app_id.as_str(), table] {
            if matches!(segment, "" | "." | "..") {
                return Err(ConnectorError::InvalidSegment(segment.to_string()));
            }
        }

        let invalid_base = |reason: String| ConnectorError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid_base(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid_base("URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(["apps", self.app_id.as_str(), "tables", table, "Action"]);
        Ok(url)
    }

    pub(crate) fn build_request(
        &self,
        table: &str,
        action: &str,
        rows: &[Row],
        properties: Option<&Properties>,
    ) -> Result<reqwest::blocking::Request, ConnectorError> {
        let empty = Properties::default();
        let body = ActionRequest {
            action,
            rows,
            properties: properties.unwrap_or(&empty),
        };
        let payload = serde_json::to_vec(&body).map_err(ConnectorError::Encode)?;

        let request = self
            .client
            .post(self.action_url(table)?)
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .build()?;
        Ok(request)
    }

    fn execute(
        &self,
        table: &str,
        action: &str,
        rows: &[Row],
        properties: Option<&Properties>,
    ) -> Result<Value, ConnectorError> {
        debug!(target: "appsheet", "{} on table '{}' ({} rows)", action, table, rows.len());

        let request = self.build_request(table, action, rows, properties)?;
        let response = self.client.execute(request).map_err(|e| {
            warn!(target: "appsheet", "{} on '{}' failed: {}", action, table, e);
            ConnectorError::Transport(e)
        })?;

        let status = response.status();
        debug!(target: "appsheet", "{} on '{}' returned HTTP {}", action, table, status);
        if !status.is_success() {
            warn!(target: "appsheet", "AppSheet answered {} for {} on '{}'", status, action, table);
        }

        let text = response.text()?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(source) => {
                warn!(target: "appsheet", "could not decode response for {} on '{}': {}", action, table, source);
                Err(ConnectorError::Parse {
                    status: status.as_u16(),
                    body: text,
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("app_id", &self.app_id)
            .field("access_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn body_of(request: &reqwest::blocking::Request) -> Value {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_request_body_matches_operation() {
        let conn = connect("app-123", "secret");
        let rows = vec![row(json!({"id": 1, "name": "Ada"}))];
        let props = Properties::new().locale("en-GB").timezone("UTC");

        for action in ["Add", "Delete", "Edit", "Find"] {
            let request = conn
                .build_request("People", action, &rows, Some(&props))
                .unwrap();
            assert_eq!(
                body_of(&request),
                json!({
                    "Action": action,
                    "Rows": [{"id": 1, "name": "Ada"}],
                    "Properties": {"Locale": "en-GB", "Timezone": "UTC"}
                })
            );
        }
    }

    #[test]
    fn test_missing_properties_serialize_as_empty_object() {
        let conn = connect("app-123", "secret");
        let request = conn.build_request("People", "Find", &[], None).unwrap();
        assert_eq!(
            body_of(&request),
            json!({"Action": "Find", "Rows": [], "Properties": {}})
        );
    }

    #[test]
    fn test_body_key_order_is_fixed() {
        let conn = connect("app", "key");
        let request = conn.build_request("T", "Add", &[], None).unwrap();
        let raw = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(
            std::str::from_utf8(raw).unwrap(),
            r#"{"Action":"Add","Rows":[],"Properties":{}}"#
        );
    }

    #[test]
    fn test_url_and_headers() {
        let conn = connect("0a1b2c3d-app", "V2-abc-key");
        let request = conn.build_request("Orders", "Edit", &[], None).unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://api.appsheet.com/api/v2/apps/0a1b2c3d-app/tables/Orders/Action"
        );
        assert_eq!(request.headers()[ACCESS_KEY_HEADER], "V2-abc-key");
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_custom_action_name_sent_verbatim() {
        let conn = connect("app", "key");
        let rows = vec![row(json!({"id": "r-7"}))];
        let request = conn
            .build_request("Tasks", "Mark Complete (bulk)", &rows, None)
            .unwrap();
        assert_eq!(body_of(&request)["Action"], "Mark Complete (bulk)");
    }

    #[test]
    fn test_find_with_selector_and_no_rows() {
        let conn = connect("app", "key");
        let props = Properties::new().selector("Filter(People, [Age] >= 21)");
        let request = conn.build_request("People", "Find", &[], Some(&props)).unwrap();
        let body = body_of(&request);
        assert_eq!(body["Rows"], json!([]));
        assert_eq!(body["Properties"]["Selector"], "Filter(People, [Age] >= 21)");
    }

    #[test]
    fn test_base_url_override_trims_trailing_slash() {
        let conn = connect("app", "key").with_base_url("https://eu.appsheet.com/api/v2/");
        assert_eq!(
            conn.action_url("People").unwrap().as_str(),
            "https://eu.appsheet.com/api/v2/apps/app/tables/People/Action"
        );
    }

    #[test]
    fn test_reserved_characters_stay_inside_table_segment() {
        let conn = connect("app", "key");
        let cases = [
            ("Order #", "/api/v2/apps/app/tables/Order%20%23/Action"),
            ("Sales?2024", "/api/v2/apps/app/tables/Sales%3F2024/Action"),
            ("In/Out", "/api/v2/apps/app/tables/In%2FOut/Action"),
        ];
        for (table, expected) in cases {
            let request = conn.build_request(table, "Find", &[], None).unwrap();
            assert_eq!(request.url().path(), expected, "table {:?}", table);
            assert_eq!(request.url().query(), None);
            assert_eq!(request.url().fragment(), None);
        }
    }

    #[test]
    fn test_dot_and_empty_table_names_are_rejected() {
        let conn = connect("app", "key");
        for table in ["..", ".", ""] {
            match conn.build_request(table, "Find", &[], None) {
                Err(ConnectorError::InvalidSegment(segment)) => assert_eq!(segment, table),
                other => panic!("expected invalid segment for {:?}, got {:?}", table, other),
            }
        }
    }

    #[test]
    fn test_unusable_base_url_is_an_error() {
        let conn = connect("app", "key").with_base_url("not a url");
        assert!(matches!(
            conn.find("People", &[], None),
            Err(ConnectorError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_row_keys_keep_caller_order() {
        let conn = connect("app", "key");
        let rows = vec![row(json!({"zeta": 1, "alpha": 2}))];
        let props = Properties::from(row(json!({"Timezone": "UTC", "Locale": "en-US"})));
        let request = conn.build_request("T", "Add", &rows, Some(&props)).unwrap();
        let raw = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(
            std::str::from_utf8(raw).unwrap(),
            r#"{"Action":"Add","Rows":[{"zeta":1,"alpha":2}],"Properties":{"Timezone":"UTC","Locale":"en-US"}}"#
        );
    }

    #[test]
    fn test_location_property() {
        let props = Properties::new().location("47.623098, -122.330184");
        assert_eq!(props.get("Location"), Some(&json!("47.623098, -122.330184")));
    }

    #[test]
    fn test_connector_is_shareable_across_threads() {
        fn assert_send_sync_clone<T: Send + Sync + Clone>() {}
        assert_send_sync_clone::<Connector>();
    }

    #[test]
    fn test_debug_redacts_access_key() {
        let conn = connect("app", "super-secret");
        let printed = format!("{:?}", conn);
        assert!(printed.contains("app"));
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_properties_passthrough_of_unknown_keys() {
        let props = Properties::new()
            .user_id("u-1")
            .insert("Custom", json!({"nested": true}));
        assert_eq!(props.get("UserId"), Some(&json!("u-1")));
        assert_eq!(props.get("Custom"), Some(&json!({"nested": true})));
        assert_eq!(
            serde_json::to_value(&props).unwrap(),
            json!({"UserId": "u-1", "Custom": {"nested": true}})
        );
    }

    #[test]
    fn test_connection_refused_is_returned_as_error() {
        let conn = connect("app", "key").with_base_url("http://127.0.0.1:1");
        match conn.find("People", &[], None) {
            Err(ConnectorError::Transport(_)) => {}
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
