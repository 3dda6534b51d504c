//! `shutter-probe`: log in, page through one endpoint, print what came back.
//!
//! ```sh
//! SHUTTER_USERNAME=alice SHUTTER_PASSWORD=... shutter-probe
//!
//! # Two pages of a user's followers:
//! SHUTTER_PROBE_ENDPOINT=friendships/5678/followers/ SHUTTER_PROBE_KIND=user \
//!     SHUTTER_PROBE_MAX_PAGES=2 shutter-probe
//! ```
//!
//! Items are printed to stdout as JSON lines. Logging goes to stderr and is
//! controlled by `RUST_LOG` (default `shutter_client=info`).
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SHUTTER_PROBE_ENDPOINT` | `feed/timeline/` | Endpoint to paginate |
//! | `SHUTTER_PROBE_KIND` | `media` | `media`, `user` or `comment` |
//! | `SHUTTER_PROBE_MAX_PAGES` | `1` | Page cap |
//!
//! Client and credential variables are documented on
//! [`shutter_client::ClientConfig`] and [`shutter_client::StaticCredentials::from_env`].

use std::process;
use std::sync::Arc;

use shutter::{EndpointSpec, RequestDescriptor};
use shutter_client::{Client, ClientConfig, Completion, StaticCredentials};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shutter_client=info".into()),
        )
        .init();

    let config = ClientConfig::from_env().unwrap_or_else(|e| fatal(&e.to_string()));
    let store = StaticCredentials::from_env().unwrap_or_else(|e| fatal(&e.to_string()));

    let endpoint =
        std::env::var("SHUTTER_PROBE_ENDPOINT").unwrap_or_else(|_| "feed/timeline/".into());
    let max_pages = match std::env::var("SHUTTER_PROBE_MAX_PAGES") {
        Ok(v) => v
            .parse::<usize>()
            .unwrap_or_else(|_| fatal(&format!("SHUTTER_PROBE_MAX_PAGES must be a number, got {v:?}"))),
        Err(_) => 1,
    };
    let descriptor = RequestDescriptor::read(endpoint);
    let spec = match std::env::var("SHUTTER_PROBE_KIND").as_deref() {
        Err(_) | Ok("media") => EndpointSpec::media_feed(descriptor),
        Ok("user") => EndpointSpec::user_list(descriptor),
        Ok("comment") => EndpointSpec::comments(descriptor),
        Ok(other) => fatal(&format!(
            "SHUTTER_PROBE_KIND must be media, user or comment, got {other:?}"
        )),
    };

    let client = Client::from_config(&config, Some(Arc::new(store)))
        .unwrap_or_else(|e| fatal(&e.to_string()));
    let session = client
        .authenticate()
        .await
        .unwrap_or_else(|e| fatal(&format!("login failed: {e}")));

    let collected = client
        .paginate(&session, spec)
        .max_pages(max_pages)
        .collect_normalized()
        .await;

    for item in &collected.items {
        match serde_json::to_string(item) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("shutter-probe: could not serialise item {}: {e}", item.id),
        }
    }

    client.logout(&session).await;

    match collected.completion {
        Completion::Failed(e) if collected.pages == 0 => fatal(&e.to_string()),
        Completion::Failed(e) => {
            eprintln!(
                "shutter-probe: stopped after {} pages: {e} (resume from {:?})",
                collected.pages, collected.next_cursor
            );
        }
        Completion::CapReached | Completion::Exhausted => {}
    }
}

fn fatal(msg: &str) -> ! {
    eprintln!("shutter-probe: {}", msg);
    process::exit(2);
}
