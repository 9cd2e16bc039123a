//! List every deployment in every namespace without compiled types.
use futures::TryStreamExt;
use kubedyn::{Client, Operation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::try_default().await?;

    // the finder resolves kinds against live discovery, so a CRD kind works
    // here just as well as Deployment
    let deployments = client.stream(&Operation::list("apps/v1", "Deployment").all_namespaces());
    futures::pin_mut!(deployments);
    while let Some(d) = deployments.try_next().await? {
        println!(
            "{}/{}",
            d.metadata.namespace.as_deref().unwrap_or(""),
            d.name().unwrap_or("")
        );
    }
    Ok(())
}
