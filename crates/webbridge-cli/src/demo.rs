//! In-process demo: a host and a guest bridge joined by a `Link`.

use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;
use webbridge_config::BridgeConfig;
use webbridge_core::{handler, Bridge, Link, Side};

pub async fn run_demo(config: BridgeConfig, number: i64) -> Result<()> {
    let host = Bridge::spawn(Side::Host, config.clone());
    let guest = Bridge::spawn(Side::Guest, config);
    let link = Link::connect(&host, &guest)?;

    let (notes_tx, mut notes_rx) = mpsc::unbounded_channel::<String>();

    // Guest: an echo handler and a default handler that acknowledges anything.
    guest.register_handler(
        "echo",
        handler(|data, reply| {
            let n = data["n"].as_i64().unwrap_or_default();
            reply.reply(json!({ "n": n, "doubled": n * 2 }))?;
            Ok(())
        }),
    )?;
    let guest_notes = notes_tx.clone();
    guest
        .initialize(handler(move |data, reply| {
            let _ = guest_notes.send(format!("guest default handler got {}", data));
            reply.reply(json!({ "received": data }))?;
            Ok(())
        }))
        .await?;

    // Host: answers the guest's platform query.
    host.register_handler(
        "platform",
        handler(|_, reply| {
            reply.reply(json!({ "os": std::env::consts::OS }))?;
            Ok(())
        }),
    )?;
    let host_notes = notes_tx;
    host.initialize(handler(move |data, _| {
        let _ = host_notes.send(format!("host default handler got {}", data));
        Ok(())
    }))
    .await?;

    println!();
    println!("webbridge demo: host <-> guest");
    println!();

    let answer = host.request(Some("echo"), json!({ "n": number })).await?;
    println!("host  -> guest echo({{\"n\":{}}})  = {}", number, answer);

    let platform = guest.request(Some("platform"), Value::Null).await?;
    println!("guest -> host  platform()        = {}", platform);

    let ack = host.request(None, "hello from the host").await?;
    println!("host  -> guest default handler   = {}", ack);

    guest.send("fire and forget from the guest")?;

    for _ in 0..2 {
        if let Some(note) = notes_rx.recv().await {
            println!("  {}", note);
        }
    }

    let host_stats = host.stats().await?;
    let guest_stats = guest.stats().await?;
    info!(
        host_pending = host_stats.pending.len(),
        guest_pending = guest_stats.pending.len(),
        "Demo finished"
    );

    link.disconnect().await;
    host.shutdown()?;
    guest.shutdown()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_runs_to_completion() {
        let config = BridgeConfig::default().with_call_timeout(2_000);
        run_demo(config, 3).await.unwrap();
    }
}
