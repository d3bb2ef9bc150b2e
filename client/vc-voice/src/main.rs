//! `VoiceChat` Mesh Simulator
//!
//! Runs several voice chat participants in one process over the loopback
//! relay with real WebRTC connections and silent microphones.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use vc_signaling::GroupId;
use vc_voice::audio::{CaptureDevice, SilenceInput};
use vc_voice::{
    LoopbackHub, PeerConnectionManager, RtcPeerLinkFactory, VoiceChatCoordinator, VoiceConfig,
    VoiceSession, VoiceSessionHandle,
};

#[derive(Parser, Debug)]
#[command(name = "vc-voice-sim", version, about = "Simulate a voice chat mesh")]
struct Args {
    /// Number of participants to join
    #[arg(short, long, default_value_t = 3)]
    participants: usize,

    /// Group to join
    #[arg(short, long, default_value = "sim-group")]
    group: String,

    /// Seconds to wait for connections after each step
    #[arg(long, default_value_t = 2)]
    settle_secs: u64,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for WebRTC)
    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    let args = Args::parse();
    vc_voice::init_tracing(args.json);

    dotenvy::dotenv().ok();
    let config = VoiceConfig::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        participants = args.participants,
        "Starting voice mesh simulation"
    );

    let hub = LoopbackHub::new();
    let factory = Arc::new(RtcPeerLinkFactory::new().context("Failed to build WebRTC API")?);
    let group = GroupId::new(args.group);
    let settle = Duration::from_secs(args.settle_secs);

    let mut sessions: Vec<(String, VoiceSessionHandle)> = Vec::new();
    for index in 0..args.participants {
        let name = format!("user-{}", index + 1);
        let (transport, inbound) = hub.connect(name.clone()).await;
        let peers = PeerConnectionManager::new(
            factory.clone(),
            CaptureDevice::new(Arc::new(SilenceInput::new())),
        );
        let mut coordinator = VoiceChatCoordinator::new(Arc::new(transport), peers, &config);
        let mut frames = coordinator
            .take_playback_frames()
            .context("Playback frames already taken")?;
        tokio::spawn(async move { while frames.recv().await.is_some() {} });

        let (handle, _task) = VoiceSession::spawn(coordinator, inbound);
        handle
            .join(group.clone())
            .await
            .with_context(|| format!("{name} failed to join"))?;
        info!(user = %name, "Joined");
        sessions.push((name, handle));
    }

    tokio::time::sleep(settle).await;
    print_mesh(&sessions).await?;

    if let Some((name, handle)) = sessions.first() {
        let muted = handle.toggle_mute().await?;
        info!(user = %name, muted, "Toggled mute");
        tokio::time::sleep(settle).await;
        let muted = handle.toggle_mute().await?;
        info!(user = %name, muted, "Toggled mute");
    }

    tokio::time::sleep(settle).await;
    print_mesh(&sessions).await?;

    for (name, handle) in &sessions {
        handle.leave().await?;
        handle.shutdown().await;
        info!(user = %name, "Left");
    }

    info!("Simulation finished");
    Ok(())
}

async fn print_mesh(sessions: &[(String, VoiceSessionHandle)]) -> Result<()> {
    for (name, handle) in sessions {
        let snapshot = handle.snapshot().await?;
        println!(
            "{name}: state={:?} id={} muted={} connections={} streams={} roster={}",
            snapshot.state,
            snapshot
                .self_id
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            snapshot.is_muted,
            snapshot.connections,
            snapshot.remote_streams,
            snapshot.participants.len(),
        );
    }
    Ok(())
}
