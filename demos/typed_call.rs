use cloudstack::{Client, Command, Credentials, ParameterSet};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ListVirtualMachinesResponse {
    #[serde(default)]
    count: u32,
    #[serde(default)]
    virtualmachine: Vec<VirtualMachine>,
}

#[derive(Debug, Deserialize)]
struct VirtualMachine {
    id: String,
    name: String,
    state: String,
}

struct ListVirtualMachines {
    zone_id: Option<String>,
}

impl Command for ListVirtualMachines {
    type Response = ListVirtualMachinesResponse;

    fn name(&self) -> &str {
        "listVirtualMachines"
    }

    fn params(&self) -> ParameterSet {
        ParameterSet::builder()
            .set_opt("zoneid", self.zone_id.clone())
            .set_bool("listall", true)
            .build()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> cloudstack::Result<()> {
    // Adjust to your environment.
    let base_url = std::env::var("CLOUDSTACK_URL")
        .unwrap_or_else(|_| "http://localhost:8080/client/api".to_string());
    let creds = Credentials::new(
        std::env::var("CLOUDSTACK_API_KEY").unwrap_or_default(),
        std::env::var("CLOUDSTACK_SECRET_KEY").unwrap_or_default(),
    )?;

    let client = Client::new(base_url, creds)?;
    let vms = client
        .call(&ListVirtualMachines {
            zone_id: std::env::var("CLOUDSTACK_ZONE_ID").ok(),
        })
        .await?;

    println!("{} virtual machine(s)", vms.count);
    for vm in vms.virtualmachine {
        println!("{} {} {}", vm.id, vm.name, vm.state);
    }

    Ok(())
}
