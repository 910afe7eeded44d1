use std::time::Duration;

use cloudstack::{Backoff, Client, Credentials, ParameterSet, PollPolicy};

#[tokio::main(flavor = "current_thread")]
async fn main() -> cloudstack::Result<()> {
    // Adjust to your environment.
    let base_url = std::env::var("CLOUDSTACK_URL")
        .unwrap_or_else(|_| "http://localhost:8080/client/api".to_string());
    let api_key = std::env::var("CLOUDSTACK_API_KEY").unwrap_or_default();
    let secret_key = std::env::var("CLOUDSTACK_SECRET_KEY").unwrap_or_default();

    let client = Client::builder(base_url, Credentials::new(api_key, secret_key)?)
        .request_timeout(Duration::from_secs(30))
        .poll_policy(
            PollPolicy::default()
                .with_timeout(Duration::from_secs(600))
                .with_backoff(Backoff::exponential(
                    Duration::from_secs(2),
                    Duration::from_secs(30),
                )),
        )
        .build()?;

    let zones = client
        .execute(
            "listZones",
            &ParameterSet::builder().set_bool("available", true).build(),
        )
        .await?;
    println!("zones = {zones}");

    // Async: returns the job's result once it finishes.
    let params = ParameterSet::builder()
        .set("name", "demo-group")
        .build();
    match client.execute("createInstanceGroup", &params).await {
        Ok(group) => println!("group = {group}"),
        Err(e) if e.job_id().is_some() => {
            println!("job {} did not finish: {e}", e.job_id().unwrap_or_default());
        }
        Err(e) => return Err(e),
    }

    Ok(())
}
