//! Run a command in a pod over the channel-framed WebSocket protocol.
use futures::StreamExt;
use kubedyn::core::params::ExecParams;
use kubedyn::runner::ChannelMessage;
use kubedyn::{Client, Operation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::try_default().await?;

    let op = Operation::connect("v1", "pods/exec")
        .within("default")
        .named("example")
        .connect_params(
            ExecParams::default()
                .stdin(false)
                .command(["/bin/sh", "-c", "date"]),
        );

    let mut process = client.connect(&op).await?;
    let status = process.take_status().expect("status taken once");
    let events = process.events().expect("events taken once");
    futures::pin_mut!(events);

    while let Some(message) = events.next().await {
        match message? {
            ChannelMessage::Stdout(out) => print!("{}", String::from_utf8_lossy(&out)),
            ChannelMessage::Stderr(err) => eprint!("{}", String::from_utf8_lossy(&err)),
            ChannelMessage::Status(s) => println!("exit: {} {}", s.status, s.message),
            ChannelMessage::Other(tag, _) => eprintln!("ignoring channel {tag}"),
        }
    }
    if let Some(status) = status.await {
        println!("terminated with status {}", status.status);
    }
    Ok(())
}
