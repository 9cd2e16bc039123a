use http::{Request, Response};
use serde_json::json;

use crate::{client::Body, Client, DiscoveryDriver, DynamicObject, Error, Operation};
use kubedyn_core::params::LogParams;

#[tokio::test]
async fn apply_renders_server_side_apply_patch() {
    let (client, fakeserver, _guard) = testcontext();
    let mocksrv = fakeserver.run(Scenario::ApplyDeployment);

    let manifest = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "nginx", "namespace": "test" },
        "spec": { "replicas": 2 }
    });
    let applied: DynamicObject = client.run(&Operation::apply(manifest).unwrap()).await.unwrap();
    assert_eq!(applied.name(), Some("nginx"));
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn subresource_get_resolves_by_rest_name() {
    let (client, fakeserver, _guard) = testcontext();
    let mocksrv = fakeserver.run(Scenario::DeploymentStatus);

    let op = Operation::get("apps/v1", "deployments/status")
        .within("test")
        .named("nginx");
    let status: DynamicObject = client.run(&op).await.unwrap();
    assert_eq!(status.data["status"]["availableReplicas"], 1);
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn delete_surfaces_the_status_side() {
    let (client, fakeserver, _guard) = testcontext();
    let mocksrv = fakeserver.run(Scenario::DeletePod);

    let op = Operation::delete("v1", "Pod").within("default").named("doomed");
    let outcome = client.run_status::<DynamicObject>(&op).await.unwrap();
    match outcome {
        either::Either::Right(status) => assert_eq!(status.status, "Success"),
        either::Either::Left(_) => panic!("expected a Status for an async delete"),
    }
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn logs_come_back_as_text() {
    let (client, fakeserver, _guard) = testcontext();
    let mocksrv = fakeserver.run(Scenario::PodLogs);

    let op = Operation::connect("v1", "pods/log")
        .within("default")
        .named("web")
        .connect_params(LogParams {
            container: Some("app".into()),
            ..Default::default()
        });
    let logs = client.run_text(&op).await.unwrap();
    assert_eq!(logs, "ready\n");
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn unknown_kinds_fail_before_any_api_call() {
    let (client, _fakeserver, _guard) = testcontext();
    let op = Operation::get("v1", "Gizmo").within("default").named("g");
    let err = client.run::<DynamicObject>(&op).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Discovery(crate::error::DiscoveryError::UnsupportedResource { .. })
    ));
}

// ------------------------------------------------------------------------
// mock test setup cruft
// ------------------------------------------------------------------------

// We wrap tower_test::mock::Handle
type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
struct ApiServerVerifier(ApiServerHandle);

async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

/// Scenarios we test for in ApiServerVerifier above
enum Scenario {
    ApplyDeployment,
    DeploymentStatus,
    DeletePod,
    PodLogs,
}

impl ApiServerVerifier {
    /// Tests only get to run specific scenarios that have matching handlers
    ///
    /// You should await the `JoinHandle` (with a timeout) from this function
    /// to ensure the scenario ran to completion, i.e. all expected api calls
    /// were made and responded to.
    fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            // moving self => one scenario per test
            match scenario {
                Scenario::ApplyDeployment => self.handle_apply().await,
                Scenario::DeploymentStatus => self.handle_status_get().await,
                Scenario::DeletePod => self.handle_delete().await,
                Scenario::PodLogs => self.handle_logs().await,
            }
            .expect("scenario completed without errors");
        })
    }

    async fn handle_apply(mut self) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().to_string(),
            "/apis/apps/v1/namespaces/test/deployments/nginx?&fieldManager=kubedyn&force=true"
        );
        assert_eq!(
            request
                .headers()
                .get(http::header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap(),
            "application/apply-patch+yaml"
        );
        let respdata = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "nginx", "namespace": "test", "resourceVersion": "7" },
            "spec": { "replicas": 2 }
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&respdata).unwrap()))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_status_get(mut self) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().to_string(),
            "/apis/apps/v1/namespaces/test/deployments/nginx/status"
        );
        let respdata = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "nginx", "namespace": "test" },
            "status": { "availableReplicas": 1 }
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&respdata).unwrap()))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_delete(mut self) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::DELETE);
        assert_eq!(request.uri().to_string(), "/api/v1/namespaces/default/pods/doomed");
        let respdata = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Success",
            "details": { "name": "doomed", "kind": "pods" }
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&respdata).unwrap()))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_logs(mut self) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(
            request.uri().to_string(),
            "/api/v1/namespaces/default/pods/web/log?&container=app"
        );
        send.send_response(
            Response::builder()
                .header(http::header::CONTENT_TYPE, "text/plain")
                .body(Body::from(b"ready\n".to_vec()))
                .unwrap(),
        );
        Ok(self)
    }
}

fn discovery_doc() -> serde_json::Value {
    json!({
        "versions": ["v1", "apps/v1"],
        "resources": {
            "v1": [
                { "name": "pods", "kind": "Pod", "namespaced": true,
                  "verbs": ["create", "delete", "deletecollection", "get", "list", "patch", "update", "watch"] },
                { "name": "pods/log", "kind": "Pod", "namespaced": true,
                  "verbs": ["create", "get"] },
                { "name": "pods/exec", "kind": "PodExecOptions", "namespaced": true,
                  "verbs": ["create", "get"] }
            ],
            "apps/v1": [
                { "name": "deployments", "kind": "Deployment", "namespaced": true,
                  "verbs": ["create", "delete", "deletecollection", "get", "list", "patch", "update", "watch"] },
                { "name": "deployments/status", "kind": "Deployment", "namespaced": true,
                  "verbs": ["get", "patch", "update"] }
            ]
        }
    })
}

// Create a test context with a mocked kube client resolving against a fixed
// discovery document
fn testcontext() -> (Client, ApiServerVerifier, tempfile::NamedTempFile) {
    let file = tempfile::NamedTempFile::new().expect("create discovery fixture");
    std::fs::write(file.path(), serde_json::to_vec(&discovery_doc()).unwrap())
        .expect("write discovery fixture");
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let mock_client = Client::new(mock_service, "default")
        .with_discovery_driver(DiscoveryDriver::File(file.path().to_path_buf()));
    (mock_client, ApiServerVerifier(handle), file)
}
