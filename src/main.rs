mod backend;
mod config;
mod data;
mod error;
mod hooks;
mod ipc;
mod logging;
mod models;
mod query;
mod session;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let dotenv = config::load_dotenv();
    logging::init();
    if let Some(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = config::Config::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        configured = config.backend.is_some(),
        "tuitiond starting"
    );
    let state = ipc::AppState::new(config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&state, req).await,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "unparseable request");
                serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        let mut out = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    state.session.unmount();
    info!("stdin closed; exiting");
    Ok(())
}
