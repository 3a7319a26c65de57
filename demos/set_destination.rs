//! Set Destination - the companion app side of the config bridge
//!
//! Run with: cargo run --example set_destination -- <store_dir> [rtmp_url]
//!
//! With a URL, stores it as the broadcast destination. Without one, prints
//! the stored destination and how the broadcast worker will resolve it.
//!
//! ```text
//!   set_destination ──write──> <store_dir>/<namespace>.json <──read── broadcast_flv
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use screencast_rtmp::{resolve, ConfigBridge, JsonFileStore};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("screencast_rtmp=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let store_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("screencast"));
    let url = args.next();

    let bridge = ConfigBridge::new(Arc::new(JsonFileStore::new(&store_dir)))
        .app_id("com.example.ScreenCast");

    match url.as_deref() {
        Some("--clear") => {
            bridge.clear_destination()?;
            println!("Destination cleared");
        }
        Some(url) => {
            bridge.write_destination(url)?;
            println!("Destination set: {}", url);
        }
        None => {}
    }

    println!("Store:     {}", store_dir.display());
    println!("Namespace: {}", bridge.namespace_name());
    if let Some(identity) = bridge.extension_identity()? {
        println!("Worker:    {}", identity);
    }

    match bridge.read_destination()? {
        Some(url) => {
            let destination = resolve(&url);
            println!("URL:       {}", destination.raw_url);
            println!("Endpoint:  {}", destination.connect_endpoint);
            println!("Key:       {}", destination.stream_key);
            if !destination.is_connectable() {
                println!("Warning: endpoint is not a usable URL, broadcasts will fail");
            }
        }
        None => println!("No destination configured"),
    }

    Ok(())
}
