use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use interview_room::audio::CpalDevices;
use interview_room::auth::StaticAccount;
use interview_room::media::{format_clock, MediaDevices, SyntheticDevices};
use interview_room::peer::{LoopbackBroker, SignalingBroker};
use interview_room::presence::{MemoryStore, ParticipantRole};
use interview_room::rtc::WebRtcBroker;
use interview_room::signaling::RelayServer;
use interview_room::{InterviewSession, SessionBackends, SessionConfig, SessionContext};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    /// Both participants share an in-process broker
    Loopback,
    /// Calls go through a local relay and real peer connections
    Webrtc,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer interview rooms")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling relay
    Relay {
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: String,
    },
    /// Run a two-person interview in this process and save the recruiter's recording
    Demo {
        /// How long to record
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Where the recording is written
        #[arg(short, long, default_value = "recordings")]
        out: PathBuf,

        /// Session configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "loopback")]
        transport: Transport,

        /// Capture the recruiter from the system microphone
        #[arg(long)]
        microphone: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_room=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    match args.command {
        Command::Relay { listen } => {
            let relay = RelayServer::bind(listen.as_str())
                .await
                .with_context(|| format!("cannot listen on {}", listen))?;
            relay.run().await?;
        }
        Command::Demo {
            seconds,
            out,
            config,
            transport,
            microphone,
        } => run_demo(seconds, out, config, transport, microphone).await?,
    }
    Ok(())
}

async fn participant(
    session_id: &str,
    account: StaticAccount,
    config: &SessionConfig,
    devices: Arc<dyn MediaDevices>,
    store: &MemoryStore,
    broker: &Arc<dyn SignalingBroker>,
) -> anyhow::Result<InterviewSession> {
    let context = SessionContext::resolve(session_id, &account).await?;
    Ok(InterviewSession::new(
        context,
        config.clone(),
        SessionBackends {
            devices,
            store: Arc::new(store.clone()),
            broker: Arc::clone(broker),
        },
    ))
}

async fn run_demo(
    seconds: u64,
    out: PathBuf,
    config: Option<PathBuf>,
    transport: Transport,
    microphone: bool,
) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => SessionConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let broker: Arc<dyn SignalingBroker> = match transport {
        Transport::Loopback => Arc::new(LoopbackBroker::new()),
        Transport::Webrtc => {
            let relay = RelayServer::bind("127.0.0.1:0").await?;
            config.signaling_url = format!("ws://{}", relay.local_addr()?);
            tokio::spawn(relay.run());
            Arc::new(WebRtcBroker::new(&config))
        }
    };

    let store = MemoryStore::new();
    let recruiter_devices: Arc<dyn MediaDevices> = if microphone {
        Arc::new(CpalDevices::new())
    } else {
        Arc::new(SyntheticDevices::new())
    };
    let recruiter = participant(
        "demo-interview",
        StaticAccount::new("recruiter", "Riley Recruiter", ParticipantRole::Recruiter),
        &config,
        recruiter_devices,
        &store,
        &broker,
    )
    .await?;
    let candidate = participant(
        "demo-interview",
        StaticAccount::new("candidate", "Casey Candidate", ParticipantRole::Candidate),
        &config,
        Arc::new(SyntheticDevices::new()),
        &store,
        &broker,
    )
    .await?;

    recruiter.enter().await?;
    candidate.enter().await?;

    let mut remote = recruiter.remote_streams();
    let connected = tokio::time::timeout(
        Duration::from_secs(15),
        remote.wait_for(|streams| !streams.is_empty()),
    )
    .await
    .map(|seen| seen.is_ok())
    .unwrap_or(false);
    if !connected {
        candidate.end().await;
        recruiter.end().await;
        bail!("participants did not connect");
    }
    info!("interview connected, recording for {}s", seconds);

    recruiter.start_recording()?;
    for _ in 0..seconds {
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!("recording {}", format_clock(recruiter.snapshot().recording_elapsed));
    }
    let artifact = recruiter.stop_recording().await?;

    candidate.end().await;
    recruiter.end().await;

    let path = artifact.save_to(&out)?;
    if artifact.dropped_chunks > 0 {
        warn!("{} chunks were lost while recording", artifact.dropped_chunks);
    }
    println!(
        "{} ({}, {} bytes, {})",
        path.display(),
        artifact.mime_type,
        artifact.data.len(),
        format_clock(artifact.duration)
    );
    Ok(())
}
