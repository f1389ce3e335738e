use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_client::peer::RtcPeerConnectionFactory;
use huddle_client::{Call, CallEvent, ClientConfig, Command, Identity};
use huddle_media::MediaDevices;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Join a huddle call from the command line
#[derive(Parser, Debug)]
#[command(name = "huddle", version)]
struct Args {
    /// Channel whose call to join
    #[arg(long)]
    channel: Uuid,

    /// Our participant id; a random one if omitted
    #[arg(long, env = "HUDDLE_USER_ID")]
    user: Option<Uuid>,

    /// Display name announced to the other participants
    #[arg(long, env = "HUDDLE_USERNAME", default_value = "huddle")]
    name: String,

    /// Configuration file instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the signaling server URL
    #[arg(long)]
    signaling_url: Option<String>,

    /// Start with the microphone on
    #[arg(long)]
    audio: bool,

    /// Start with the camera on
    #[arg(long)]
    video: bool,

    /// Start sharing the screen
    #[arg(long)]
    screen: bool,
}

#[cfg(feature = "native-capture")]
fn devices() -> Arc<dyn MediaDevices> {
    Arc::new(huddle_media::SystemDevices::new())
}

#[cfg(not(feature = "native-capture"))]
fn devices() -> Arc<dyn MediaDevices> {
    Arc::new(huddle_media::HeadlessDevices)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_client=debug,huddle_media=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(url) = args.signaling_url {
        config.signaling_url = url;
    }

    let identity = Identity {
        user_id: args.user.unwrap_or_else(Uuid::new_v4),
        username: args.name,
    };
    tracing::info!("Starting huddle as {} ({})", identity.username, identity.user_id);

    let factory = Arc::new(
        RtcPeerConnectionFactory::new(&config.ice_servers)
            .context("Failed to set up WebRTC")?,
    );
    let (mut call, mut events) = Call::new(config, identity, factory, devices());

    call.join(args.channel)
        .await
        .context("Failed to join call")?;

    if args.audio {
        call.command(Command::EnableAudio);
    }
    if args.video {
        call.command(Command::EnableVideo);
    }
    if args.screen {
        call.command(Command::EnableScreenShare);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, leaving call");
                break;
            }
            event = events.recv() => match event {
                Some(CallEvent::PeerJoined { peer_id, display_name }) => {
                    tracing::info!("{} joined ({})", display_name, peer_id);
                }
                Some(CallEvent::PeerLeft { peer_id }) => {
                    tracing::info!("{} left", peer_id);
                }
                Some(CallEvent::RemoteStream { peer_id, stream }) => {
                    let kinds: Vec<String> = stream.tracks.iter().map(|t| t.kind().to_string()).collect();
                    tracing::info!("Receiving {} from {}", kinds.join(" + "), peer_id);
                }
                Some(CallEvent::Notice(notice)) => tracing::warn!("{}", notice),
                Some(CallEvent::Ended) | None => break,
            },
        }
    }

    call.leave().await;
    Ok(())
}
