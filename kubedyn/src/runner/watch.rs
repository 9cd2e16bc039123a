//! Resumable watch runner with resource-version bookkeeping.
use std::time::Duration;

use futures::{stream::BoxStream, Stream, StreamExt};
use kubedyn_core::{DynamicObject, ObjectList, Operation, Verb, WatchEvent};

use crate::{Client, Error, Result};

// Pause between reconnect attempts after a transport failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
// Reconnects attempted with the same resource version before giving up.
const MAX_RECONNECTS: u32 = 5;

type EventStream = BoxStream<'static, Result<WatchEvent<DynamicObject>>>;

/// The internal finite state machine driving the watch
enum State {
    /// The next poll will list the collection to learn the current resource version
    Bootstrap,
    /// A resource version is known, the next poll opens the watch request
    Connecting { resource_version: String, retries: u32 },
    /// The watch is in progress, events are decoded off the chunked response
    Streaming {
        resource_version: String,
        retries: u32,
        stream: EventStream,
    },
    /// The stream ended, terminally
    Done,
}

impl Client {
    /// Deliver a resumable stream of watch events for the operation.
    ///
    /// A single list bootstraps the current resource version (fallback `"0"`);
    /// the watch then runs with bookmarks enabled. Bookmarks advance the
    /// resource version without emission, an expired version (410, as event or
    /// http status) restarts from a fresh list without re-emitting prior
    /// events, and transport failures reconnect with the same resource
    /// version up to 5 times with a 5s pause before the stream gives up.
    pub fn watch_stream(
        &self,
        op: &Operation,
    ) -> impl Stream<Item = Result<WatchEvent<DynamicObject>>> + Send + 'static {
        let seed = (self.clone(), op.clone(), State::Bootstrap);
        futures::stream::unfold(seed, |(client, op, mut state)| async move {
            loop {
                if matches!(state, State::Done) {
                    return None;
                }
                let (event, next) = step(&client, &op, state).await;
                state = next;
                if let Some(event) = event {
                    return Some((event, (client, op, state)));
                }
            }
        })
    }
}

/// Progresses the watch a single step, returning (event, state)
///
/// This function is trampolined by the caller: a `None` event means the state
/// advanced without anything to emit.
async fn step(
    client: &Client,
    op: &Operation,
    state: State,
) -> (Option<Result<WatchEvent<DynamicObject>>>, State) {
    match state {
        State::Bootstrap => {
            let mut list_op = op.clone();
            list_op.verb = match op.verb {
                Verb::Watch => Verb::List,
                Verb::WatchAllNamespaces => Verb::ListAllNamespaces,
                other => {
                    let err = kubedyn_core::Error::Validation(format!(
                        "watch stream requires a watch verb, got {other}"
                    ));
                    return (Some(Err(Error::BuildRequest(err))), State::Done);
                }
            };
            // the list only exists to learn the collection's resource version
            list_op.name = None;
            list_op.list_params.limit = Some(1);
            match client.run::<ObjectList<DynamicObject>>(&list_op).await {
                Ok(list) => {
                    let resource_version = list
                        .metadata
                        .resource_version
                        .unwrap_or_else(|| String::from("0"));
                    (None, State::Connecting {
                        resource_version,
                        retries: 0,
                    })
                }
                Err(err) => (Some(Err(err)), State::Bootstrap),
            }
        }

        State::Connecting {
            resource_version,
            retries,
        } => {
            let mut watch_op = op.clone();
            watch_op
                .query
                .push(("resourceVersion".to_string(), resource_version.clone()));
            let request = match client.build_request(&watch_op).await {
                Ok(request) => request,
                // resolution failures are not recoverable by reconnecting
                Err(err) => return (Some(Err(err)), State::Done),
            };
            match client.request_events::<DynamicObject>(request).await {
                Ok(stream) => (None, State::Streaming {
                    resource_version,
                    retries,
                    stream: stream.boxed(),
                }),
                Err(err) => retry_or_abort(err, resource_version, retries).await,
            }
        }

        State::Streaming {
            resource_version,
            retries,
            mut stream,
        } => match stream.next().await {
            Some(Ok(WatchEvent::Bookmark(bm))) => (None, State::Streaming {
                resource_version: bm.metadata.resource_version,
                retries: 0,
                stream,
            }),
            Some(Ok(WatchEvent::Error(err))) => {
                if err.code == 410 {
                    tracing::debug!("watch events expired, restarting from a fresh list: {err}");
                    (None, State::Bootstrap)
                } else {
                    (Some(Err(Error::Api(err))), State::Streaming {
                        resource_version,
                        retries: 0,
                        stream,
                    })
                }
            }
            Some(Ok(event)) => {
                let event_version = event.resource_version().map(str::to_string);
                match event_version {
                    // the first event after a reconnect can repeat the last one seen
                    Some(version) if version == resource_version => (None, State::Streaming {
                        resource_version,
                        retries: 0,
                        stream,
                    }),
                    Some(version) => (Some(Ok(event)), State::Streaming {
                        resource_version: version,
                        retries: 0,
                        stream,
                    }),
                    None => (Some(Ok(event)), State::Streaming {
                        resource_version,
                        retries: 0,
                        stream,
                    }),
                }
            }
            Some(Err(Error::Api(err))) => {
                // status framing delivered on the response body
                if err.code == 410 {
                    tracing::debug!("watch request rejected as expired, restarting from a fresh list");
                    (None, State::Bootstrap)
                } else {
                    (Some(Err(Error::Api(err))), State::Done)
                }
            }
            Some(Err(Error::SerdeError(err))) => {
                tracing::warn!("malformed watch event, restarting from a fresh list: {err}");
                (None, State::Bootstrap)
            }
            Some(Err(err)) => retry_or_abort(err, resource_version, retries).await,
            // server closed the watch; resume from the last seen version
            None => (None, State::Connecting {
                resource_version,
                retries: 0,
            }),
        },

        State::Done => (None, State::Done),
    }
}

// Bounded recovery for transport-level failures only.
async fn retry_or_abort(
    err: Error,
    resource_version: String,
    retries: u32,
) -> (Option<Result<WatchEvent<DynamicObject>>>, State) {
    let attempted = retries + 1;
    if attempted >= MAX_RECONNECTS {
        let interrupted = Error::StreamInterrupted {
            retries: attempted,
            reason: err.to_string(),
        };
        return (Some(Err(interrupted)), State::Done);
    }
    tracing::debug!("watch transport failed ({err}), reconnecting in {RECONNECT_DELAY:?}");
    tokio::time::sleep(RECONNECT_DELAY).await;
    (None, State::Connecting {
        resource_version,
        retries: attempted,
    })
}
