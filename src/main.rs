use std::sync::Arc;

mod audio_capture;
mod audio_levels;
mod call_stats;
mod config;
mod error;
mod lead_server;
mod leads;
mod session;
mod transport;

use config::read_app_config;
use session::{SessionCallbacks, VoiceSession};
use transport::MessageRole;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let app_config = read_app_config();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("talk") => {
            let Some(agent_id) = args.next() else {
                eprintln!("Usage: tavolo talk <agent_id>");
                std::process::exit(2);
            };
            talk(app_config, &agent_id).await
        }
        Some("serve") | None => lead_server::serve(app_config.lead_server).await,
        Some(other) => {
            eprintln!("Unknown command: {}. Use `serve` or `talk <agent_id>`.", other);
            std::process::exit(2);
        }
    }
}

/// Console demo of the voice session connector: connect, print conversation
/// events and a live level meter, disconnect on Ctrl-C.
async fn talk(app_config: config::AppConfig, agent_id: &str) -> anyhow::Result<()> {
    let session = Arc::new(VoiceSession::new(app_config));

    let callbacks = SessionCallbacks {
        on_connect: Some(Box::new(|conversation_id: &str| {
            println!("Connected: {}", conversation_id);
        })),
        on_disconnect: Some(Box::new(|| {
            println!("Disconnected");
        })),
        on_message: Some(Box::new(|role, text| {
            let who = match role {
                MessageRole::Agent => "agent",
                MessageRole::User => "you",
            };
            println!("[{}] {}", who, text);
        })),
        on_error: Some(Box::new(|error| {
            eprintln!("Error: {}", error);
        })),
    };

    session.connect(agent_id, callbacks).await;

    let meter_session = session.clone();
    let meter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(250));
        loop {
            interval.tick().await;
            let levels = meter_session.levels();
            if levels.is_speaking {
                print!("\rvolume: {:.2} (speaking)   ", levels.volume);
            } else {
                print!("\rvolume: {:.2}              ", levels.volume);
            }
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
    });

    tokio::signal::ctrl_c().await?;
    meter.abort();
    println!();

    session.disconnect().await;
    println!("{}", session.stats().report());

    Ok(())
}
