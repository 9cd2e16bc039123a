//! Lazy paginated list runner.
use std::collections::VecDeque;

use futures::Stream;
use kubedyn_core::{DynamicObject, ObjectList, Operation};

use crate::{Client, Result};

// Server side page size when the operation does not pick one.
const DEFAULT_PAGE_SIZE: u32 = 10;

enum PageCursor {
    Start,
    Next(String),
    Done,
}

struct PageState {
    client: Client,
    op: Operation,
    queue: VecDeque<DynamicObject>,
    cursor: PageCursor,
}

impl Client {
    /// Lazily page through a list operation.
    ///
    /// Items are yielded in server order; each page is fetched with
    /// `limit` (default 10) and the previous page's `continue` token. An
    /// empty or absent `continue` ends the stream after the page drains.
    /// A failing page yields one error element and then ends the stream.
    pub fn stream(&self, op: &Operation) -> impl Stream<Item = Result<DynamicObject>> + Send + 'static {
        let state = PageState {
            client: self.clone(),
            op: op.clone(),
            queue: VecDeque::new(),
            cursor: PageCursor::Start,
        };
        futures::stream::unfold(state, |mut s| async move {
            loop {
                if let Some(item) = s.queue.pop_front() {
                    return Some((Ok(item), s));
                }
                let continue_token = match &s.cursor {
                    PageCursor::Done => return None,
                    PageCursor::Start => None,
                    PageCursor::Next(token) => Some(token.clone()),
                };
                let mut page_op = s.op.clone();
                if page_op.list_params.limit.is_none() {
                    page_op.list_params.limit = Some(DEFAULT_PAGE_SIZE);
                }
                page_op.list_params.continue_token = continue_token;
                match s.client.run::<ObjectList<DynamicObject>>(&page_op).await {
                    Ok(page) => {
                        s.cursor = match page.continue_token() {
                            Some(token) => PageCursor::Next(token.to_string()),
                            None => PageCursor::Done,
                        };
                        s.queue.extend(page.items);
                        if s.queue.is_empty() && matches!(s.cursor, PageCursor::Done) {
                            return None;
                        }
                    }
                    Err(e) => {
                        s.cursor = PageCursor::Done;
                        return Some((Err(e), s));
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::{pin_mut, StreamExt, TryStreamExt};
    use http::{Request, Response};
    use tower_test::mock;

    use crate::{client::Body, Client, DiscoveryDriver, Error, Operation};

    fn discovery_doc() -> serde_json::Value {
        serde_json::json!({
            "versions": ["v1"],
            "resources": {
                "v1": [
                    { "name": "pods", "kind": "Pod", "namespaced": true,
                      "verbs": ["get", "list", "watch", "create", "delete"] }
                ]
            }
        })
    }

    fn pod(name: &str, rv: &str) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": "default", "resourceVersion": rv }
        })
    }

    fn page(items: Vec<serde_json::Value>, continue_: Option<&str>) -> Response<Body> {
        let mut metadata = serde_json::json!({ "resourceVersion": "100" });
        if let Some(token) = continue_ {
            metadata["continue"] = serde_json::Value::String(token.to_string());
        }
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": metadata,
            "items": items
        });
        Response::builder()
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn test_client() -> (Client, mock::Handle<Request<Body>, Response<Body>>, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_vec(&discovery_doc()).unwrap()).unwrap();
        let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default")
            .with_discovery_driver(DiscoveryDriver::File(file.path().to_path_buf()));
        (client, handle, file)
    }

    #[tokio::test]
    async fn pages_until_continue_runs_out() {
        let (client, handle, _file) = test_client();
        let spawned = tokio::spawn(async move {
            pin_mut!(handle);

            let (request, send) = handle.next_request().await.expect("first page requested");
            assert_eq!(
                request.uri().to_string(),
                "/api/v1/namespaces/default/pods?&limit=10"
            );
            send.send_response(page(vec![pod("a", "1"), pod("b", "2")], Some("tok-1")));

            let (request, send) = handle.next_request().await.expect("second page requested");
            assert_eq!(
                request.uri().to_string(),
                "/api/v1/namespaces/default/pods?&limit=10&continue=tok-1"
            );
            send.send_response(page(vec![pod("c", "3")], Some("")));
        });

        let stream = client.stream(&Operation::list("v1", "Pod").within("default"));
        let items: Vec<_> = stream.try_collect().await.unwrap();
        let names: Vec<_> = items.iter().filter_map(|o| o.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        spawned.await.unwrap();
    }

    #[tokio::test]
    async fn absent_continue_ends_after_one_page() {
        let (client, handle, _file) = test_client();
        let spawned = tokio::spawn(async move {
            pin_mut!(handle);
            let (_request, send) = handle.next_request().await.expect("page requested");
            send.send_response(page(vec![pod("only", "1")], None));
        });

        let stream = client.stream(&Operation::list("v1", "Pod").within("default"));
        let items: Vec<_> = stream.try_collect().await.unwrap();
        assert_eq!(items.len(), 1);
        spawned.await.unwrap();
    }

    #[tokio::test]
    async fn page_error_emits_once_then_halts() {
        let (client, handle, _file) = test_client();
        let spawned = tokio::spawn(async move {
            pin_mut!(handle);
            let (_request, send) = handle.next_request().await.expect("page requested");
            let status = serde_json::json!({
                "kind": "Status",
                "status": "Failure",
                "message": "expired",
                "reason": "Expired",
                "code": 410
            });
            send.send_response(
                Response::builder()
                    .status(410)
                    .body(Body::from(serde_json::to_vec(&status).unwrap()))
                    .unwrap(),
            );
        });

        let stream = client.stream(&Operation::list("v1", "Pod").within("default"));
        pin_mut!(stream);
        let first = stream.next().await.expect("one error element");
        assert!(matches!(first, Err(Error::Api(e)) if e.code == 410));
        assert!(stream.next().await.is_none());
        spawned.await.unwrap();
    }

    #[tokio::test]
    async fn caller_limit_is_respected() {
        let (client, handle, _file) = test_client();
        let spawned = tokio::spawn(async move {
            pin_mut!(handle);
            let (request, send) = handle.next_request().await.expect("page requested");
            assert_eq!(request.uri().query().unwrap(), "&limit=2");
            send.send_response(page(vec![], None));
        });

        let op = Operation::list("v1", "Pod")
            .within("default")
            .list_params(kubedyn_core::params::ListParams::default().limit(2));
        let items: Vec<_> = client.stream(&op).collect().await;
        assert!(items.is_empty());
        spawned.await.unwrap();
    }
}
