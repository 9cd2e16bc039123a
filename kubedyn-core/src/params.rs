//! Request parameter types for the operation verbs.
use crate::error::Error;
use serde::Serialize;

/// Default field manager recorded by server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "kubedyn";

/// Common query parameters used by list and deletecollection calls
#[derive(Default, Clone, Debug)]
pub struct ListParams {
    /// Timeout for the list call in seconds
    ///
    /// This limits the duration of the call, regardless of any activity or inactivity.
    pub timeout: Option<u32>,

    /// Limit the number of results
    ///
    /// If there are more results, the server will respond with a continue token.
    pub limit: Option<u32>,

    /// Fetch a second page of results using a continue token from a previous response
    pub continue_token: Option<String>,
}

impl ListParams {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(to) = &self.timeout {
            // https://github.com/kubernetes/kubernetes/issues/6513
            if *to >= 295 {
                return Err(Error::Validation("ListParams::timeout must be < 295s".into()));
            }
        }
        Ok(())
    }

    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        if let Some(to) = &self.timeout {
            qp.append_pair("timeoutSeconds", &to.to_string());
        }
        if let Some(limit) = &self.limit {
            qp.append_pair("limit", &limit.to_string());
        }
        if let Some(token) = &self.continue_token {
            qp.append_pair("continue", token);
        }
    }

    /// Configure the timeout for the call
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    /// Sets a result limit
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets a continue token
    #[must_use]
    pub fn continue_token(mut self, token: &str) -> Self {
        self.continue_token = Some(token.to_string());
        self
    }
}

/// Query parameters specific to watch calls
#[derive(Clone, Debug)]
pub struct WatchParams {
    /// Timeout for the watch call in seconds
    ///
    /// Limited to 295s due to inherent watch limitations upstream.
    pub timeout: Option<u32>,

    /// Enables watch events with type "BOOKMARK"
    ///
    /// Servers that do not implement bookmarks ignore this flag and bookmarks
    /// are sent at the server's discretion.
    pub bookmarks: bool,
}

impl Default for WatchParams {
    fn default() -> Self {
        Self {
            // bookmarks stable since 1.17, and backwards compatible
            bookmarks: true,
            timeout: None,
        }
    }
}

impl WatchParams {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(to) = &self.timeout {
            if *to >= 295 {
                return Err(Error::Validation("WatchParams::timeout must be < 295s".into()));
            }
        }
        Ok(())
    }

    /// Disables watch bookmarks to simplify watch handling
    #[must_use]
    pub fn disable_bookmarks(mut self) -> Self {
        self.bookmarks = false;
        self
    }

    /// Configure the timeout for the watch request
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }
}

/// Common query parameters for put/post calls
#[derive(Default, Clone, Debug)]
pub struct PostParams {
    /// Whether to run this as a dry run
    pub dry_run: bool,
    /// fieldManager is a name of the actor that is making changes
    pub field_manager: Option<String>,
}

impl PostParams {
    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        if self.dry_run {
            qp.append_pair("dryRun", "All");
        }
        if let Some(ref fm) = self.field_manager {
            qp.append_pair("fieldManager", fm);
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(field_manager) = &self.field_manager {
            // The server enforces the rest of the naming rules
            if field_manager.len() > 128 {
                return Err(Error::Validation(
                    "Failed to validate PostParams::field_manager!".into(),
                ));
            }
        }
        Ok(())
    }
}

/// The validation directive to use for `fieldValidation` when writing objects
#[derive(Clone, Debug)]
pub enum ValidationDirective {
    /// Fail the request on any unknown or duplicate field
    Strict,
    /// Warn per unknown or duplicate field, but carry out the request
    Warn,
    /// Silently ignore any unknown or duplicate fields
    Ignore,
}

impl ValidationDirective {
    /// Returns the string format of the directive
    pub fn as_str(&self) -> &str {
        match self {
            Self::Strict => "Strict",
            Self::Warn => "Warn",
            Self::Ignore => "Ignore",
        }
    }
}

/// Describes changes that should be applied to a resource
///
/// The patch kind selects the request `Content-Type`; server-side `Apply` is
/// the recommended strategy on current clusters.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum Patch<T: Serialize> {
    /// [Server side apply](https://kubernetes.io/docs/reference/using-api/server-side-apply/)
    Apply(T),
    /// [JSON patch](https://datatracker.ietf.org/doc/html/rfc6902) operation list
    Json(serde_json::Value),
    /// [JSON Merge patch](https://datatracker.ietf.org/doc/html/rfc7386)
    Merge(T),
    /// Strategic JSON Merge patch
    Strategic(T),
}

impl<T: Serialize> Patch<T> {
    pub(crate) fn is_apply(&self) -> bool {
        matches!(self, Patch::Apply(_))
    }

    /// The media type the server expects for this patch kind
    pub fn content_type(&self) -> &'static str {
        match &self {
            Self::Apply(_) => "application/apply-patch+yaml",
            Self::Json(_) => "application/json-patch+json",
            Self::Merge(_) => "application/merge-patch+json",
            Self::Strategic(_) => "application/strategic-merge-patch+json",
        }
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Apply(p) => serde_json::to_vec(p),
            Self::Json(p) => serde_json::to_vec(p),
            Self::Strategic(p) => serde_json::to_vec(p),
            Self::Merge(p) => serde_json::to_vec(p),
        }
    }
}

/// Common query parameters for patch calls
///
/// For server-side apply the server requires a field manager and allows
/// forcing conflicts; both default on apply (`kubedyn` and `true`) unless
/// set explicitly.
#[derive(Default, Clone, Debug)]
pub struct PatchParams {
    /// Whether to run this as a dry run
    pub dry_run: bool,
    /// force Apply requests. Applicable only to [`Patch::Apply`]
    pub force: Option<bool>,
    /// fieldManager is a name of the actor that is making changes
    pub field_manager: Option<String>,
    /// The server-side validation directive to use
    pub field_validation: Option<ValidationDirective>,
}

impl PatchParams {
    pub(crate) fn validate<P: Serialize>(&self, patch: &Patch<P>) -> Result<(), Error> {
        if let Some(field_manager) = &self.field_manager {
            if field_manager.len() > 128 {
                return Err(Error::Validation(
                    "Failed to validate PatchParams::field_manager!".into(),
                ));
            }
        }
        if self.force == Some(true) && !patch.is_apply() {
            return Err(Error::Validation(
                "PatchParams::force only works with Patch::Apply".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn populate_qp<P: Serialize>(
        &self,
        patch: &Patch<P>,
        qp: &mut form_urlencoded::Serializer<String>,
    ) {
        if self.dry_run {
            qp.append_pair("dryRun", "All");
        }
        if patch.is_apply() {
            let manager = self.field_manager.as_deref().unwrap_or(DEFAULT_FIELD_MANAGER);
            qp.append_pair("fieldManager", manager);
            qp.append_pair("force", if self.force.unwrap_or(true) { "true" } else { "false" });
        } else if let Some(ref fm) = self.field_manager {
            qp.append_pair("fieldManager", fm);
        }
        if let Some(sv) = &self.field_validation {
            qp.append_pair("fieldValidation", sv.as_str());
        }
    }

    /// Construct `PatchParams` for server-side apply under a given manager
    #[must_use]
    pub fn apply(manager: &str) -> Self {
        Self {
            field_manager: Some(manager.into()),
            ..Self::default()
        }
    }

    /// Do not force the apply through on conflicts
    #[must_use]
    pub fn no_force(mut self) -> Self {
        self.force = Some(false);
        self
    }

    /// Perform a dryRun only
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Set the validation directive for `fieldValidation`
    #[must_use]
    pub fn validation(mut self, vd: ValidationDirective) -> Self {
        self.field_validation = Some(vd);
        self
    }
}

/// Common query parameters for delete calls
#[derive(Default, Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    /// When present, indicates that modifications should not be persisted
    #[serde(
        serialize_with = "dry_run_all_ser",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub dry_run: bool,

    /// The duration in seconds before the object should be deleted
    ///
    /// Zero means delete immediately; `None` uses the type's default grace period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<u32>,

    /// Whether or how garbage collection is performed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation_policy: Option<PropagationPolicy>,

    /// Conditions that must be fulfilled before a deletion is carried out
    ///
    /// If not possible, a `409 Conflict` status will be returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<Preconditions>,
}

impl DeleteParams {
    /// Construct `DeleteParams` with `PropagationPolicy::Background`
    pub fn background() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Self::default()
        }
    }

    /// Construct `DeleteParams` with `PropagationPolicy::Foreground`
    pub fn foreground() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Self::default()
        }
    }

    /// Construct `DeleteParams` with `PropagationPolicy::Orphan`
    pub fn orphan() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Orphan),
            ..Self::default()
        }
    }

    /// Perform a dryRun only
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Set the duration in seconds before the object should be deleted
    #[must_use]
    pub fn grace_period(mut self, secs: u32) -> Self {
        self.grace_period_seconds = Some(secs);
        self
    }

    /// Set the conditions that must be fulfilled before a deletion is carried out
    #[must_use]
    pub fn preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = Some(preconditions);
        self
    }

    pub(crate) fn is_default(&self) -> bool {
        !self.dry_run
            && self.grace_period_seconds.is_none()
            && self.propagation_policy.is_none()
            && self.preconditions.is_none()
    }
}

// dryRun serialization differs between body parameters and query strings:
// query strings are true/false, body params allow only a missing field or ["All"].
fn dry_run_all_ser<S>(t: &bool, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::ser::Serializer,
{
    use serde::ser::SerializeTuple;
    match t {
        true => {
            let mut map = s.serialize_tuple(1)?;
            map.serialize_element("All")?;
            map.end()
        }
        false => s.serialize_none(),
    }
}

/// Preconditions must be fulfilled before an operation (update, delete, etc.) is carried out
#[derive(Default, Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    /// Specifies the target ResourceVersion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Specifies the target UID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Propagation policy when deleting single objects
#[derive(Clone, Debug, Serialize)]
pub enum PropagationPolicy {
    /// Orphan dependents
    Orphan,
    /// Allow the garbage collector to delete the dependents in the background
    Background,
    /// A cascading policy that deletes all dependents in the foreground
    Foreground,
}

// ----------------------------------------------------------------------------
// Connect parameters
// ----------------------------------------------------------------------------

/// Parameters for execing into (or attaching to) a container
///
/// The stream flags default to what the server defaults exec to:
/// stdin/stdout/stderr on, tty off.
#[derive(Clone, Debug)]
pub struct ExecParams {
    /// The container to target; defaults to the only container server-side
    pub container: Option<String>,
    /// The command and its arguments, one query entry per element
    pub command: Vec<String>,
    /// Redirect the standard input of the container
    pub stdin: bool,
    /// Redirect the standard output of the container
    pub stdout: bool,
    /// Redirect the standard error of the container
    pub stderr: bool,
    /// Allocate a TTY
    pub tty: bool,
}

impl Default for ExecParams {
    fn default() -> Self {
        Self {
            container: None,
            command: Vec::new(),
            stdin: true,
            stdout: true,
            stderr: true,
            tty: false,
        }
    }
}

impl ExecParams {
    /// Set the command to run
    #[must_use]
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Specify the container to execute in
    #[must_use]
    pub fn container<T: Into<String>>(mut self, container: T) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Set the `stdin` flag
    #[must_use]
    pub fn stdin(mut self, enable: bool) -> Self {
        self.stdin = enable;
        self
    }

    /// Set the `stdout` flag
    #[must_use]
    pub fn stdout(mut self, enable: bool) -> Self {
        self.stdout = enable;
        self
    }

    /// Set the `stderr` flag
    #[must_use]
    pub fn stderr(mut self, enable: bool) -> Self {
        self.stderr = enable;
        self
    }

    /// Set the `tty` flag
    #[must_use]
    pub fn tty(mut self, enable: bool) -> Self {
        self.tty = enable;
        self
    }

    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        qp.append_pair("stdin", bool_str(self.stdin));
        qp.append_pair("stdout", bool_str(self.stdout));
        qp.append_pair("stderr", bool_str(self.stderr));
        qp.append_pair("tty", bool_str(self.tty));
        if let Some(container) = &self.container {
            qp.append_pair("container", container);
        }
        for c in &self.command {
            qp.append_pair("command", c);
        }
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Params for log streaming
///
/// Only this allowlist of parameters is ever rendered for `pods/log`.
#[derive(Default, Clone, Debug)]
pub struct LogParams {
    /// The container for which to stream logs; defaults to the only container
    pub container: Option<String>,
    /// Follow the log stream of the pod
    pub follow: bool,
    /// The number of bytes to read from the server before terminating the log output
    pub limit_bytes: Option<i64>,
    /// If `true`, then the output is pretty printed
    pub pretty: bool,
    /// Return previous terminated container logs
    pub previous: bool,
    /// A relative time in seconds before the current time from which to show logs
    pub since_seconds: Option<i64>,
    /// An RFC3339 timestamp from which to show logs
    ///
    /// Only one of `since_seconds` or `since_time` may be specified.
    pub since_time: Option<String>,
    /// The number of lines from the end of the logs to show
    pub tail_lines: Option<i64>,
    /// Add a timestamp at the beginning of every line of log output
    pub timestamps: bool,
}

impl LogParams {
    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        if let Some(container) = &self.container {
            qp.append_pair("container", container);
        }
        if self.follow {
            qp.append_pair("follow", "true");
        }
        if let Some(lb) = &self.limit_bytes {
            qp.append_pair("limitBytes", &lb.to_string());
        }
        if self.pretty {
            qp.append_pair("pretty", "true");
        }
        if self.previous {
            qp.append_pair("previous", "true");
        }
        if let Some(ss) = &self.since_seconds {
            qp.append_pair("sinceSeconds", &ss.to_string());
        } else if let Some(st) = &self.since_time {
            qp.append_pair("sinceTime", st);
        }
        if let Some(tl) = &self.tail_lines {
            qp.append_pair("tailLines", &tl.to_string());
        }
        if self.timestamps {
            qp.append_pair("timestamps", "true");
        }
    }
}

/// Parameters for the connect verb, one variant per connectable subresource family
#[derive(Clone, Debug)]
pub enum ConnectParams {
    /// Exec or attach over a channel-framed WebSocket
    Exec(ExecParams),
    /// Log fetching or following
    Log(LogParams),
}

impl From<ExecParams> for ConnectParams {
    fn from(p: ExecParams) -> Self {
        ConnectParams::Exec(p)
    }
}

impl From<LogParams> for ConnectParams {
    fn from(p: LogParams) -> Self {
        ConnectParams::Log(p)
    }
}

#[cfg(test)]
mod test {
    use super::{DeleteParams, ExecParams, Patch, PatchParams};

    #[test]
    fn delete_param_serialize() {
        let mut dp = DeleteParams::default();
        let emptyser = serde_json::to_string(&dp).unwrap();
        assert_eq!(emptyser, "{}");

        dp.dry_run = true;
        let ser = serde_json::to_string(&dp).unwrap();
        assert_eq!(ser, "{\"dryRun\":[\"All\"]}");
    }

    #[test]
    fn delete_param_constructors() {
        let dp_background = DeleteParams::background();
        let ser = serde_json::to_value(&dp_background).unwrap();
        assert_eq!(ser, serde_json::json!({"propagationPolicy": "Background"}));

        let dp_foreground = DeleteParams::foreground();
        let ser = serde_json::to_value(&dp_foreground).unwrap();
        assert_eq!(ser, serde_json::json!({"propagationPolicy": "Foreground"}));

        let dp_orphan = DeleteParams::orphan();
        let ser = serde_json::to_value(&dp_orphan).unwrap();
        assert_eq!(ser, serde_json::json!({"propagationPolicy": "Orphan"}));
    }

    #[test]
    fn patch_content_types() {
        assert_eq!(Patch::Apply(()).content_type(), "application/apply-patch+yaml");
        assert_eq!(
            Patch::Json::<()>(serde_json::json!([])).content_type(),
            "application/json-patch+json"
        );
        assert_eq!(Patch::Merge(()).content_type(), "application/merge-patch+json");
        assert_eq!(
            Patch::Strategic(()).content_type(),
            "application/strategic-merge-patch+json"
        );
    }

    #[test]
    fn apply_defaults_manager_and_force() {
        let pp = PatchParams::default();
        let mut qp = form_urlencoded::Serializer::new(String::from("p?"));
        pp.populate_qp(&Patch::Apply(()), &mut qp);
        assert_eq!(qp.finish(), "p?&fieldManager=kubedyn&force=true");

        let pp = PatchParams::apply("operator").no_force();
        let mut qp = form_urlencoded::Serializer::new(String::from("p?"));
        pp.populate_qp(&Patch::Apply(()), &mut qp);
        assert_eq!(qp.finish(), "p?&fieldManager=operator&force=false");
    }

    #[test]
    fn force_rejected_outside_apply() {
        let pp = PatchParams {
            force: Some(true),
            ..PatchParams::default()
        };
        assert!(pp.validate(&Patch::Merge(())).is_err());
        assert!(pp.validate(&Patch::Apply(())).is_ok());
    }

    #[test]
    fn exec_param_defaults() {
        let ep = ExecParams::default();
        let mut qp = form_urlencoded::Serializer::new(String::from("p?"));
        ep.populate_qp(&mut qp);
        assert_eq!(qp.finish(), "p?&stdin=true&stdout=true&stderr=true&tty=false");
    }
}
