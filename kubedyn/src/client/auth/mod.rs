//! Credential production for every supported kubeconfig user shape.
//!
//! Providers are tried in a fixed order and the first one to accept the user
//! record wins; stateless credentials become plain header values while
//! refreshable ones (exec plugins, token files) cache their material behind a
//! lock and renew it inside a jittered validity window.
use std::{
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use http::{
    header::{InvalidHeaderValue, AUTHORIZATION},
    HeaderValue, Request,
};
use jsonpath_rust::JsonPath;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tower::{filter::AsyncPredicate, BoxError};

use crate::config::{AuthInfo, AuthProviderConfig, ExecConfig, ExecInteractiveMode};

#[derive(Error, Debug)]
/// Client auth errors
pub enum Error {
    /// Invalid basic auth
    #[error("invalid basic auth: {0}")]
    InvalidBasicAuth(#[source] InvalidHeaderValue),

    /// Invalid bearer token
    #[error("invalid bearer token: {0}")]
    InvalidBearerToken(#[source] InvalidHeaderValue),

    /// Tried to refresh a token and got a non-refreshable token response
    #[error("tried to refresh a token and got a non-refreshable token response")]
    UnrefreshableTokenResponse,

    /// Exec plugin response did not contain a status
    #[error("exec-plugin response did not contain a status")]
    ExecPluginFailed,

    /// Malformed token expiration date
    #[error("malformed token expiration date: {0}")]
    MalformedTokenExpirationDate(#[source] chrono::ParseError),

    /// The credential was already expired when it was produced
    #[error("credential expired before processing: {0}")]
    ExpiredBeforeUse(String),

    /// Failed to start auth exec
    #[error("unable to run auth exec: {0}")]
    AuthExecStart(#[source] std::io::Error),

    /// Failed to run auth exec command
    #[error("auth exec command '{cmd}' failed with status {status}: {out:?}")]
    AuthExecRun {
        /// The failed command
        cmd: String,
        /// The exit status or exit code of the failed command
        status: std::process::ExitStatus,
        /// Stdout/Stderr of the failed command
        out: std::process::Output,
    },

    /// Failed to parse auth exec output
    #[error("failed to parse auth exec output: {0}")]
    AuthExecParse(#[source] serde_json::Error),

    /// Failed to serialize input for the auth exec
    #[error("failed to serialize input: {0}")]
    AuthExecSerialize(#[source] serde_json::Error),

    /// Failed to exec auth
    #[error("failed exec auth: {0}")]
    AuthExec(String),

    /// Failed to read token file
    #[error("failed to read token file '{1:?}': {0}")]
    ReadTokenFile(#[source] std::io::Error, PathBuf),

    /// The token file was empty
    #[error("token file '{0:?}' is empty")]
    EmptyTokenFile(PathBuf),

    /// command was missing from exec config
    #[error("command must be specified to use exec authentication plugin")]
    MissingCommand,
}

#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub(crate) enum Auth {
    None,
    Basic(String, SecretString),
    Bearer(SecretString),
    RefreshableToken(RefreshableToken),
    Certificate(String, SecretString),
}

// Questionable decisions by chrono: https://github.com/chronotope/chrono/issues/1491
macro_rules! const_unwrap {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => panic!(),
        }
    };
}

/// Common constant for checking if an auth token is close to expiring
const TEN_SEC: Duration = const_unwrap!(Duration::try_seconds(10));
/// Common duration for time between reloads
const SIXTY_SEC: Duration = const_unwrap!(Duration::try_seconds(60));

// Jitter a reload interval into [0.95, 1.0] of itself so a fleet of
// refreshers does not renew in lockstep.
fn jittered(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(0.95..=1.0);
    let ms = (interval.num_milliseconds() as f64 * factor) as i64;
    Duration::milliseconds(ms)
}

// Token file reference. Reloads at least once per minute, a little earlier
// with jitter.
#[derive(Debug)]
pub(crate) struct TokenFile {
    path: PathBuf,
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl TokenFile {
    fn new<P: AsRef<Path>>(path: P) -> Result<TokenFile, Error> {
        let token = std::fs::read_to_string(&path)
            .map_err(|source| Error::ReadTokenFile(source, path.as_ref().to_owned()))?;
        if token.trim().is_empty() {
            return Err(Error::EmptyTokenFile(path.as_ref().to_owned()));
        }
        Ok(Self {
            path: path.as_ref().to_owned(),
            token: SecretString::from(token.trim_end().to_string()),
            expires_at: Utc::now() + jittered(SIXTY_SEC),
        })
    }

    fn is_expiring(&self) -> bool {
        Utc::now() + TEN_SEC > self.expires_at
    }

    /// Get the cached token. Returns `None` if it's expiring.
    fn cached_token(&self) -> Option<&str> {
        (!self.is_expiring()).then(|| self.token.expose_secret())
    }

    /// Get a token. Reloads from file if the cached token is expiring.
    fn token(&mut self) -> &str {
        if self.is_expiring() {
            // If reload from file fails, the last-read token is kept to avoid
            // breaking clients that make token files available on process
            // start and then remove them to limit credential exposure.
            // https://github.com/kubernetes/kubernetes/issues/68164
            match std::fs::read_to_string(&self.path) {
                Ok(token) if !token.trim().is_empty() => {
                    self.token = SecretString::from(token.trim_end().to_string())
                }
                Ok(_) => tracing::warn!("refusing empty token from {:?}", self.path),
                Err(e) => tracing::warn!("failed to reload token from {:?}: {e}", self.path),
            }
            self.expires_at = Utc::now() + jittered(SIXTY_SEC);
        }
        self.token.expose_secret()
    }
}

// Credential material from an exec plugin, cached until a jittered fraction
// of its lifetime has passed.
#[derive(Debug)]
pub(crate) struct ExecToken {
    token: SecretString,
    refresh_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    info: AuthInfo,
}

impl ExecToken {
    pub(crate) fn new(token: SecretString, expires_at: DateTime<Utc>, info: AuthInfo) -> Self {
        let now = Utc::now();
        let lifetime = expires_at - now;
        let refresh_at = now + jittered(lifetime);
        Self {
            token,
            refresh_at,
            expires_at,
            info,
        }
    }
}

// Supported refreshable credentials:
// - exec plugin driven by its ExecCredential expirationTimestamp
// - token file reloaded at least once per minute (incl. the projected
//   service account token in a pod)
// - gcp: command based token source (cmd-path in the provider config)
#[derive(Debug, Clone)]
pub(crate) enum RefreshableToken {
    Exec(Arc<Mutex<ExecToken>>),
    File(Arc<RwLock<TokenFile>>),
}

// For use with `AsyncFilterLayer` to add `Authorization` header with a refreshed token.
impl<B> AsyncPredicate<Request<B>> for RefreshableToken
where
    B: http_body::Body + Send + 'static,
{
    type Future = BoxFuture<'static, Result<Request<B>, BoxError>>;
    type Request = Request<B>;

    fn check(&mut self, mut request: Self::Request) -> Self::Future {
        let refreshable = self.clone();
        Box::pin(async move {
            refreshable.to_header().await.map_err(Into::into).map(|value| {
                request.headers_mut().insert(AUTHORIZATION, value);
                request
            })
        })
    }
}

impl RefreshableToken {
    pub(crate) async fn to_header(&self) -> Result<HeaderValue, Error> {
        match self {
            RefreshableToken::Exec(data) => {
                let mut locked_data = data.lock().await;
                if Utc::now() >= locked_data.refresh_at {
                    match Auth::try_from(&locked_data.info) {
                        Ok(Auth::RefreshableToken(RefreshableToken::Exec(fresh))) => {
                            let fresh = Arc::try_unwrap(fresh)
                                .map_err(|_| Error::UnrefreshableTokenResponse)?
                                .into_inner();
                            *locked_data = fresh;
                        }
                        Ok(_) => return Err(Error::UnrefreshableTokenResponse),
                        Err(e) => {
                            // A still-valid cached token outlives a failed refresh.
                            if Utc::now() + TEN_SEC < locked_data.expires_at {
                                tracing::warn!("failed to refresh exec credential, reusing cached token: {e}");
                            } else {
                                return Err(e);
                            }
                        }
                    }
                }
                bearer_header(locked_data.token.expose_secret())
            }

            RefreshableToken::File(token_file) => {
                let guard = token_file.read().await;
                if let Some(header) = guard.cached_token().map(bearer_header) {
                    return header;
                }
                // Drop the read guard before a write lock attempt to prevent deadlock.
                drop(guard);
                // Note that `token()` only reloads if the cached token is expiring.
                bearer_header(token_file.write().await.token())
            }
        }
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::try_from(format!("Bearer {token}")).map_err(Error::InvalidBearerToken)?;
    value.set_sensitive(true);
    Ok(value)
}

impl TryFrom<&AuthInfo> for Auth {
    type Error = Error;

    /// Loads the authentication material from the credentials available in the
    /// kubeconfig user record. Providers are tried in a fixed order; the first
    /// shape the record carries wins and a record with none of them yields
    /// `Auth::None` so the connection proceeds with TLS material alone.
    fn try_from(auth_info: &AuthInfo) -> Result<Self, Self::Error> {
        if let Some(provider) = &auth_info.auth_provider {
            match token_from_provider(provider)? {
                ProviderToken::Command(token, Some(expiry)) => {
                    let mut info = auth_info.clone();
                    let mut provider = provider.clone();
                    provider.config.insert("access-token".into(), token.clone());
                    provider.config.insert("expiry".into(), expiry.to_rfc3339());
                    info.auth_provider = Some(provider);
                    return Ok(Self::RefreshableToken(RefreshableToken::Exec(Arc::new(
                        Mutex::new(ExecToken::new(SecretString::from(token), expiry, info)),
                    ))));
                }
                ProviderToken::Command(token, None) => {
                    return Ok(Self::Bearer(SecretString::from(token)));
                }
            }
        }

        if let (Some(u), Some(p)) = (&auth_info.username, &auth_info.password) {
            return Ok(Self::Basic(u.to_owned(), p.to_owned()));
        }

        // Inline token. Has precedence over `token_file`.
        if let Some(token) = &auth_info.token {
            return Ok(Self::Bearer(token.clone()));
        }

        // Token file reference. Reloaded at least once a minute.
        if let Some(file) = &auth_info.token_file {
            return Ok(Self::RefreshableToken(RefreshableToken::File(Arc::new(
                RwLock::new(TokenFile::new(file)?),
            ))));
        }

        if let Some(exec) = &auth_info.exec {
            let creds = auth_exec(exec)?;
            let status = creds.status.ok_or(Error::ExecPluginFailed)?;
            if let (Some(client_certificate_data), Some(client_key_data)) =
                (status.client_certificate_data, status.client_key_data)
            {
                return Ok(Self::Certificate(client_certificate_data, client_key_data.into()));
            }
            let expiration = status
                .expiration_timestamp
                .as_deref()
                .map(DateTime::parse_from_rfc3339)
                .transpose()
                .map_err(Error::MalformedTokenExpirationDate)?
                .map(|ts| ts.with_timezone(&Utc));
            if let Some(expire) = expiration {
                if expire <= Utc::now() {
                    return Err(Error::ExpiredBeforeUse(expire.to_rfc3339()));
                }
            }
            match (status.token.map(SecretString::from), expiration) {
                (Some(token), Some(expire)) => Ok(Self::RefreshableToken(RefreshableToken::Exec(
                    Arc::new(Mutex::new(ExecToken::new(token, expire, auth_info.clone()))),
                ))),
                (Some(token), None) => Ok(Self::Bearer(token)),
                _ => Ok(Self::None),
            }
        } else {
            Ok(Self::None)
        }
    }
}

// Cloud providers differ in the keys/formats they store tokens under.
enum ProviderToken {
    // "access-token", "expiry" (RFC3339)
    Command(String, Option<DateTime<Utc>>),
}

fn token_from_provider(provider: &AuthProviderConfig) -> Result<ProviderToken, Error> {
    match provider.name.as_ref() {
        "gcp" => token_from_gcp_provider(provider),
        "azure" => Err(Error::AuthExec(
            "The azure auth plugin is not supported; use https://github.com/Azure/kubelogin instead".into(),
        )),
        _ => Err(Error::AuthExec(format!(
            "Authentication with provider {:} not supported",
            provider.name
        ))),
    }
}

fn token_from_gcp_provider(provider: &AuthProviderConfig) -> Result<ProviderToken, Error> {
    if let Some(id_token) = provider.config.get("id-token") {
        return Ok(ProviderToken::Command(id_token.clone(), None));
    }

    // Return cached access token if it's still valid
    if let Some(access_token) = provider.config.get("access-token") {
        if let Some(expiry) = provider.config.get("expiry") {
            let expiry_date = expiry
                .parse::<DateTime<Utc>>()
                .map_err(Error::MalformedTokenExpirationDate)?;
            if Utc::now() + SIXTY_SEC < expiry_date {
                return Ok(ProviderToken::Command(access_token.clone(), Some(expiry_date)));
            }
        }
    }

    // Command-based token source
    if let Some(cmd) = provider.config.get("cmd-path") {
        let params = provider.config.get("cmd-args").cloned().unwrap_or_default();
        let output = Command::new(cmd)
            .args(params.trim().split(' '))
            .output()
            .map_err(|e| Error::AuthExec(format!("Executing {cmd:} failed: {e:?}")))?;

        if !output.status.success() {
            return Err(Error::AuthExecRun {
                cmd: format!("{cmd} {params}"),
                status: output.status,
                out: output,
            });
        }

        if let Some(field) = provider.config.get("token-key") {
            let json_output: serde_json::Value =
                serde_json::from_slice(&output.stdout).map_err(Error::AuthExecParse)?;
            let token = extract_value(&json_output, "token-key", field)?;
            if let Some(field) = provider.config.get("expiry-key") {
                let expiry = extract_value(&json_output, "expiry-key", field)?;
                let expiry = expiry
                    .parse::<DateTime<Utc>>()
                    .map_err(Error::MalformedTokenExpirationDate)?;
                return Ok(ProviderToken::Command(token, Some(expiry)));
            }
            return Ok(ProviderToken::Command(token, None));
        }
        let token = std::str::from_utf8(&output.stdout)
            .map_err(|e| Error::AuthExec(format!("Result is not a string {e:?} ")))?
            .trim()
            .to_owned();
        return Ok(ProviderToken::Command(token, None));
    }

    Err(Error::AuthExec(
        "no token or cmd-path in the gcp auth-provider config".into(),
    ))
}

// The token-key/expiry-key config values are JSONPath expressions wrapped in
// braces, e.g. `{.credential.access_token}`.
fn extract_value(json: &serde_json::Value, context: &str, path: &str) -> Result<String, Error> {
    let expression = path.trim_matches(|c| c == '"' || c == '{' || c == '}');
    let jsonpath = expression.parse::<JsonPath<serde_json::Value>>().map_err(|err| {
        Error::AuthExec(format!("failed to parse {context:?} as a JsonPath: {path}: {err}"))
    })?;

    let hit = jsonpath
        .find_slice_ptr(json)
        .into_iter()
        .next()
        .ok_or_else(|| Error::AuthExec(format!("target {context:?} value {path:?} not found")))?;

    hit.as_str().map(str::to_owned).ok_or_else(|| {
        Error::AuthExec(format!(
            "target {context:?} value {path:?} is not a string: {:?}",
            *hit
        ))
    })
}

/// ExecCredentials is used by exec-based plugins to communicate credentials to
/// HTTP transports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecCredential {
    /// Kind of the credential artifact, always `ExecCredential`
    pub kind: Option<String>,
    /// Version of the client authentication API the plugin speaks
    #[serde(rename = "apiVersion")]
    pub api_version: Option<String>,
    /// Request-specific information passed to the plugin
    pub spec: Option<ExecCredentialSpec>,
    /// Credentials produced by the plugin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecCredentialStatus>,
}

/// ExecCredentialSpec holds request and runtime specific information provided
/// by the transport.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ExecCredentialSpec {
    /// Whether the plugin may prompt the user on stdin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

/// ExecCredentialStatus holds credentials for the transport to use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecCredentialStatus {
    /// RFC3339 timestamp the credential stops being valid at
    #[serde(rename = "expirationTimestamp")]
    pub expiration_timestamp: Option<String>,
    /// Bearer token for the api server
    pub token: Option<String>,
    /// PEM-encoded client certificate, an alternative to a token
    #[serde(rename = "clientCertificateData")]
    pub client_certificate_data: Option<String>,
    /// PEM-encoded client key matching the certificate
    #[serde(rename = "clientKeyData")]
    pub client_key_data: Option<String>,
}

fn auth_exec(auth: &ExecConfig) -> Result<ExecCredential, Error> {
    let mut cmd = match &auth.command {
        Some(cmd) => Command::new(cmd),
        None => return Err(Error::MissingCommand),
    };

    if let Some(args) = &auth.args {
        cmd.args(args);
    }
    if let Some(env) = &auth.env {
        let envs = env
            .iter()
            .flat_map(|env| match (env.get("name"), env.get("value")) {
                (Some(name), Some(value)) => Some((name, value)),
                _ => None,
            });
        cmd.envs(envs);
    }

    let interactive = auth.interactive_mode != Some(ExecInteractiveMode::Never);
    if interactive {
        cmd.stdin(std::process::Stdio::inherit());
    } else {
        cmd.stdin(std::process::Stdio::piped());
    }

    // Provide exec info to child process
    let exec_info = serde_json::to_string(&ExecCredential {
        api_version: auth.api_version.clone(),
        kind: "ExecCredential".to_string().into(),
        spec: Some(ExecCredentialSpec {
            interactive: Some(interactive),
        }),
        status: None,
    })
    .map_err(Error::AuthExecSerialize)?;
    cmd.env("KUBERNETES_EXEC_INFO", exec_info);

    if let Some(envs) = &auth.drop_env {
        for env in envs {
            cmd.env_remove(env);
        }
    }

    let out = cmd.output().map_err(Error::AuthExecStart)?;
    if !out.status.success() {
        return Err(Error::AuthExecRun {
            cmd: format!("{cmd:?}"),
            status: out.status,
            out,
        });
    }
    serde_json::from_slice(&out.stdout).map_err(Error::AuthExecParse)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Kubeconfig;

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_auth_command() -> Result<(), Error> {
        let expiry = (Utc::now() + SIXTY_SEC).to_rfc3339();
        let test_file = format!(
            r#"
        apiVersion: v1
        clusters:
        - cluster:
            certificate-authority-data: XXXXXXX
            server: https://36.XXX.XXX.XX
          name: generic-name
        contexts:
        - context:
            cluster: generic-name
            user: generic-name
          name: generic-name
        current-context: generic-name
        kind: Config
        preferences: {{}}
        users:
        - name: generic-name
          user:
            auth-provider:
              config:
                cmd-args: '{{"something": "else", "credential": {{"access_token": "my_token", "token_expiry": "{expiry}"}}}}'
                cmd-path: echo
                expiry-key: '{{.credential.token_expiry}}'
                token-key: '{{.credential.access_token}}'
              name: gcp
        "#
        );

        let config = Kubeconfig::from_yaml(&test_file).unwrap();
        let auth_info = config.auth_infos[0].auth_info.as_ref().unwrap();
        match Auth::try_from(auth_info).unwrap() {
            Auth::RefreshableToken(RefreshableToken::Exec(refreshable)) => {
                let token = refreshable.lock().await;
                assert_eq!(token.token.expose_secret(), "my_token");
                let config = token.info.auth_provider.as_ref().unwrap().config.clone();
                assert_eq!(config.get("access-token"), Some(&"my_token".to_owned()));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    #[test]
    fn token_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "token1").unwrap();
        let mut token_file = TokenFile::new(file.path()).unwrap();
        assert_eq!(token_file.cached_token().unwrap(), "token1");
        assert!(!token_file.is_expiring());
        assert_eq!(token_file.token(), "token1");
        // Doesn't reload unless expiring
        std::fs::write(file.path(), "token2").unwrap();
        assert_eq!(token_file.token(), "token1");

        token_file.expires_at = Utc::now();
        assert!(token_file.is_expiring());
        assert_eq!(token_file.cached_token(), None);
        assert_eq!(token_file.token(), "token2");
        assert!(!token_file.is_expiring());
        assert_eq!(token_file.cached_token().unwrap(), "token2");
    }

    #[test]
    fn empty_token_file_is_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            TokenFile::new(file.path()),
            Err(Error::EmptyTokenFile(_))
        ));
    }

    #[test]
    fn transient_reload_failure_keeps_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "token1").unwrap();
        let mut token_file = TokenFile::new(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        token_file.expires_at = Utc::now();
        assert_eq!(token_file.token(), "token1");
    }

    #[test]
    fn expired_exec_credential_is_rejected() {
        let past = (Utc::now() - SIXTY_SEC).to_rfc3339();
        let auth_info = AuthInfo {
            exec: Some(ExecConfig {
                api_version: Some("client.authentication.k8s.io/v1".into()),
                command: Some("echo".into()),
                args: Some(vec![format!(
                    r#"{{"kind":"ExecCredential","status":{{"token":"abc","expirationTimestamp":"{past}"}}}}"#
                )]),
                env: None,
                drop_env: None,
                interactive_mode: Some(ExecInteractiveMode::Never),
            }),
            ..Default::default()
        };
        if cfg!(unix) {
            assert!(matches!(
                Auth::try_from(&auth_info),
                Err(Error::ExpiredBeforeUse(_))
            ));
        }
    }

    #[test]
    fn provider_order_prefers_basic_over_token() {
        let auth_info = AuthInfo {
            username: Some("u".into()),
            password: Some(SecretString::from("p".to_string())),
            token: Some(SecretString::from("t".to_string())),
            ..Default::default()
        };
        assert!(matches!(Auth::try_from(&auth_info).unwrap(), Auth::Basic(..)));
    }

    #[test]
    fn no_provider_is_a_skip() {
        assert!(matches!(
            Auth::try_from(&AuthInfo::default()).unwrap(),
            Auth::None
        ));
    }

    #[test]
    fn extract_value_resolves_jsonpath_keys() {
        let json = serde_json::json!({"credential": {"access_token": "tok"}});
        assert_eq!(
            extract_value(&json, "token-key", "{.credential.access_token}").unwrap(),
            "tok"
        );
        assert_eq!(
            extract_value(&json, "token-key", "{$.credential.access_token}").unwrap(),
            "tok"
        );
        assert!(extract_value(&json, "token-key", "{.credential.missing}").is_err());
    }
}
