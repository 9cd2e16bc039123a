//! Watch pods in the default namespace, surviving disconnects and 410s.
use futures::TryStreamExt;
use kubedyn::{Client, Operation, WatchEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::try_default().await?;

    let events = client.watch_stream(&Operation::watch("v1", "Pod").within("default"));
    futures::pin_mut!(events);
    while let Some(event) = events.try_next().await? {
        match event {
            WatchEvent::Added(p) => println!("added {:?}", p.name()),
            WatchEvent::Modified(p) => println!("modified {:?}", p.name()),
            WatchEvent::Deleted(p) => println!("deleted {:?}", p.name()),
            // bookmarks and in-stream errors are absorbed by the runner
            _ => {}
        }
    }
    Ok(())
}
