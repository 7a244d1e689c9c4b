// ===============================
// src/notify.rs (fire-and-forget sink)
// ===============================
//
// Consumes notification texts from a channel. Always logged; optionally
// POSTed as {recipient, text} JSON to a webhook. A failed send is logged
// and dropped, never fatal to the pipeline.
//
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct NotifyCfg {
    pub webhook_url: Option<String>,
    pub recipient: String,
}

pub async fn run(mut rx: mpsc::Receiver<String>, cfg: NotifyCfg) {
    let http = reqwest::Client::new();

    while let Some(text) = rx.recv().await {
        info!(recipient = %cfg.recipient, %text, "notify");

        if let Some(url) = &cfg.webhook_url {
            let payload = serde_json::json!({
                "recipient": cfg.recipient,
                "text": text,
            });
            match http.post(url).json(&payload).send().await {
                Ok(rsp) if rsp.status().is_success() => {}
                Ok(rsp) => warn!(code = %rsp.status(), "notify webhook non-success"),
                Err(e) => warn!(?e, "notify webhook send failed"),
            }
        }
    }
}
