//! Infinity Probe
//!
//! Joins a conference, logs every conference event and leaves on Ctrl-C or
//! SIGTERM.
//!
//! # Environment
//!
//! - `INFINITY_CONFERENCE` (required): `alias@host`
//! - `INFINITY_DISPLAY_NAME`, `INFINITY_PIN`, `INFINITY_CONFERENCE_EXTENSION`
//! - `INFINITY_LOG_JSON`: emit JSON logs
//! - `RUST_LOG`: log filter
//! - Client settings (`INFINITY_DNS_*`, `INFINITY_EVENTS_*`, ...) as documented
//!   on `infinity_client::ClientConfig::from_vars`

#![warn(clippy::pedantic)]

mod config;

use anyhow::Context;
use common::config::ObservabilityConfig;
use common::secret::ExposeSecret;
use config::ProbeConfig;
use infinity_client::{ConferenceEvent, JoinOptions, SessionState, SignalingClient};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProbeConfig::from_env().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!(
        address = %config.address,
        display_name = %config.display_name,
        dnssec = config.client.dns.dnssec,
        "Starting Infinity Probe"
    );

    let client = SignalingClient::new(config.client.clone()).context("Failed to build client")?;

    let mut options = JoinOptions::new(config.display_name.clone());
    if let Some(pin) = &config.pin {
        options = options.with_pin(pin.expose_secret());
    }
    if let Some(extension) = &config.conference_extension {
        options = options.with_conference_extension(extension.clone());
    }

    // Ctrl-C during the join cancels it.
    let cancel = CancellationToken::new();
    let join_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        join_cancel.cancel();
    });

    let mut session = match client.join(&config.address, options, &cancel).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Failed to join conference");
            return Err(e).context("Join failed");
        }
    };

    info!(node = %session.node(), "Joined conference, logging events until shutdown");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Shutdown signal received, leaving conference");
                break;
            }
            event = session.next_event() => match event {
                Some(Ok(event)) => {
                    let disconnected = matches!(event, ConferenceEvent::Disconnected(_));
                    log_event(&event);
                    if disconnected {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Event stream failed");
                    break;
                }
                None => {
                    warn!("Event stream closed");
                    break;
                }
            },
        }
    }

    session.leave().await;

    match client.state() {
        SessionState::Failed(reason) => {
            warn!(reason = %reason, "Session ended with failure");
        }
        state => info!(state = ?state, "Left conference"),
    }

    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&observability.log_level)
        .unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into());

    if observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn log_event(event: &ConferenceEvent) {
    match event {
        ConferenceEvent::ConferenceUpdate(status) => {
            info!(locked = status.locked, started = status.started, "Conference updated");
        }
        ConferenceEvent::MessageReceived(message) => {
            info!(from = %message.sender_name, payload = %message.payload, "Chat message");
        }
        ConferenceEvent::ParticipantCreate(participant) => {
            info!(name = %participant.display_name, "Participant joined");
        }
        ConferenceEvent::ParticipantDelete(participant) => {
            info!(participant_id = %participant.id, "Participant left");
        }
        ConferenceEvent::Refer(refer) => {
            info!(alias = %refer.alias, "Transfer requested");
        }
        ConferenceEvent::Disconnected(disconnect) => {
            warn!(reason = %disconnect.reason, "Disconnected by server");
        }
        other => info!(event = ?other, "Conference event"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
