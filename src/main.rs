use realtime_chat_core::client::ChatClient;
use realtime_chat_core::config::Config;
use realtime_chat_core::connection::{ChannelEvent, WsTransport};
use realtime_chat_core::services::api::Credentials;
use realtime_chat_core::{error, logging};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let credentials = Credentials {
        username: env::var("CHAT_USERNAME")
            .map_err(|_| error::AppError::Config("CHAT_USERNAME missing".into()))?,
        password: env::var("CHAT_PASSWORD")
            .map_err(|_| error::AppError::Config("CHAT_PASSWORD missing".into()))?,
    };

    let client = ChatClient::sign_in(cfg, Arc::new(WsTransport), &credentials).await?;
    tracing::info!(
        user_id = %client.session().user_id,
        conversations = client.store().list().await.len(),
        "signed in"
    );

    let mut channel_events = client.connection().subscribe().await;
    let mut store_changes = client.store().subscribe().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = channel_events.recv() => match event {
                Some(ChannelEvent::StateChanged(state)) => tracing::info!(?state, "connection"),
                Some(_) => {}
                None => break,
            },
            change = store_changes.recv() => match change {
                Some(change) => tracing::debug!(?change, "store changed"),
                None => break,
            },
        }
    }

    client.logout().await;
    Ok(())
}
