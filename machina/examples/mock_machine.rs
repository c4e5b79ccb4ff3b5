//! This example demonstrates opening a `MachineClient` against a scripted
//! in-memory machine. It is a template for wiring in a real dialer: anything
//! implementing the `Dialer` and `Transport` traits can take the mock's
//! place.

use machina::methods::machine;
use machina::{CallContext, ClientOptions, MachineClient};
use machina_rpcs::mock::{no_streams, Json, MockDialer, MockTransport};
use machina_rpcs::{transport::RawValue, Metadata, Status};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A dialer producing transports backed by handler functions. A real
    // deployment would dial the machine's address instead.
    let dialer = MockDialer::new(|_kind| {
        Ok(Arc::new(MockTransport::from_handlers(
            |method: String, _req: Box<RawValue>, _md: Metadata| match method.as_str() {
                machine::RESOURCE_NAMES => Ok(Json(json!({
                    "resources": ["machina:component:arm/arm1", "machina:component:camera/cam1"],
                }))),
                machine::GET_VERSION => Ok(Json(json!({
                    "platform": "machina-server",
                    "version": "0.9.0",
                    "api_version": "v1",
                }))),
                // Everything else (sessions, rpc subtypes, ...) is reported
                // as unimplemented; the client degrades gracefully.
                other => Err(Status::unimplemented(other.to_string())),
            },
            no_streams,
        )))
    });

    // Open the client. This dials, hydrates the resource catalog and starts
    // the connection supervisor.
    let client = MachineClient::open("machine.local:8080", dialer, ClientOptions::new()).await?;

    // The catalog was hydrated during open:
    for name in client.resource_names().await {
        println!("resource: {name}");
    }

    // Machine-wide operations go through the same intercepted call path as
    // per-resource stubs:
    let version = client.version(&CallContext::new()).await?;
    println!(
        "connected to {} {} (api {})",
        version.platform, version.version, version.api_version
    );

    client.close().await?;
    Ok(())
}
