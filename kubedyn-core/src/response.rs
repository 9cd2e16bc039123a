//! Generic api response types
use serde::{Deserialize, Serialize};

/// A Kubernetes status object
///
/// Returned by the api server for deletes, evictions and failures; only the
/// commonly populated fields are modeled.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Status {
    /// Suggested HTTP return code (0 if unset)
    #[serde(default)]
    pub code: u16,

    /// Status of the operation
    ///
    /// One of: `Success` or `Failure`
    #[serde(default)]
    pub status: String,

    /// A human-readable description of the status of this operation
    #[serde(default)]
    pub message: String,

    /// A machine-readable description of why this operation is in the "Failure" status
    ///
    /// A Reason clarifies an HTTP status code but does not override it.
    #[serde(default)]
    pub reason: String,

    /// Extended data associated with the reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

/// Status details object on the [`Status`] object
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusDetails {
    /// The name attribute of the resource associated with the status
    pub name: String,

    /// The group attribute of the resource associated with the status
    pub group: String,

    /// The kind attribute of the resource associated with the status
    pub kind: String,

    /// UID of the resource (when there is a single resource which can be described)
    pub uid: String,

    /// The Causes vector includes more details associated with the failure
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,

    /// If specified, the time in seconds before the operation should be retried
    pub retry_after_seconds: u32,
}

/// Status cause object on the [`StatusDetails`] object
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StatusCause {
    /// A machine-readable description of the cause of the error
    pub reason: String,

    /// A human-readable description of the cause of the error
    pub message: String,

    /// The field of the resource that has caused this error, as named by its JSON serialization
    pub field: String,
}

#[cfg(test)]
mod test {
    use super::Status;

    // ensure our status schema is sensible
    #[test]
    fn delete_deserialize_test() {
        let statusresp = r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Success","details":{"name":"some-app","group":"clux.dev","kind":"foos","uid":"1234-some-uid"}}"#;
        let s: Status = serde_json::from_str::<Status>(statusresp).unwrap();
        assert_eq!(s.details.unwrap().name, "some-app");

        let statusnoname = r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Success","details":{"group":"clux.dev","kind":"foos","uid":"1234-some-uid"}}"#;
        let s2: Status = serde_json::from_str::<Status>(statusnoname).unwrap();
        assert_eq!(s2.details.unwrap().name, "");
    }
}
