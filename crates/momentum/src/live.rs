//! Live chat: realtime invalidation, presence and typing until Ctrl-C.

use std::collections::HashSet;

use miette::Result;
use momentum_store::{RealtimeBridge, RealtimeClient};
use momentum_tracker::{ChatRoom, keys};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::Session;

enum Wake {
    Shutdown,
    Messages(bool),
    Presence(bool),
}

pub async fn watch_chat(session: &Session, circle: Uuid) -> Result<()> {
    let ctx = &session.ctx;
    let realtime = RealtimeClient::from_config(session.store().config());
    realtime.set_access_token(Some(session.store().access_token().await));

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let transport = {
        let realtime = realtime.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { realtime.run(shutdown_rx).await })
    };

    let bridge = RealtimeBridge::new(realtime.clone(), ctx.cache.clone());
    let _watch = ctx.chat().watch(&bridge, circle);
    let mut observer = ctx.cache.observe(keys::circle_messages(circle));

    let me = ctx.profiles().me().await.map_err(|e| miette::miette!("{}", e))?;
    let room = ChatRoom::join(&realtime, circle, ctx.user_id, me.name());
    let mut presence = room.presence();

    let mut seen = HashSet::new();
    print_new_messages(session, circle, &mut seen).await?;
    println!("Watching chat, Ctrl-C to stop.");

    loop {
        let wake = tokio::select! {
            _ = shutdown_rx.changed() => Wake::Shutdown,
            alive = observer.changed() => Wake::Messages(alive),
            alive = presence.changed() => Wake::Presence(alive.is_ok()),
        };

        match wake {
            Wake::Shutdown => break,
            Wake::Messages(false) | Wake::Presence(false) => break,
            Wake::Messages(true) => {
                if let Err(e) = print_new_messages(session, circle, &mut seen).await {
                    warn!(error = %e, "failed to refresh messages");
                }
            }
            Wake::Presence(true) => {
                let typing = room.typing_users();
                if !typing.is_empty() {
                    let names: Vec<&str> = typing.iter().map(|t| t.display_name.as_str()).collect();
                    println!("... {} typing", names.join(", "));
                }
            }
        }
    }

    room.leave().await;
    let _ = shutdown_tx.send(true);
    match transport.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "realtime transport stopped with an error"),
        Err(e) => warn!(error = %e, "realtime task panicked"),
    }
    Ok(())
}

async fn print_new_messages(session: &Session, circle: Uuid, seen: &mut HashSet<Uuid>) -> Result<()> {
    let messages = session
        .ctx
        .chat()
        .messages(circle)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    for message in messages.iter() {
        if seen.insert(message.id) {
            println!(
                "{} {}: {}",
                message.created_at.format("%H:%M"),
                message.user_id,
                message.content
            );
        }
    }
    Ok(())
}
