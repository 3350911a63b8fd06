use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{HttpContractInvoker, SessionSignal, VerificationSession, WsEventFeed};
use tokio::io::AsyncBufReadExt;
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::debug;

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// TOML settings file; missing file falls back to defaults.
    #[arg(long, default_value = "gate.toml")]
    config: String,
    #[arg(long)]
    executor_url: Option<String>,
    #[arg(long)]
    feed_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(url) = args.executor_url {
        settings.executor_url = url;
    }
    if let Some(url) = args.feed_url {
        settings.feed_url = url;
    }

    let verifier = config::verifier_config(&settings)?;
    let invoker = Arc::new(HttpContractInvoker::new(&settings.executor_url)?);
    let feed = Arc::new(WsEventFeed::new(&settings.feed_url)?);
    let session = VerificationSession::new(verifier, invoker, feed);
    session.start().await?;

    let mut signals = session.subscribe_signals();
    tokio::spawn(async move {
        while let Ok(signal) = signals.recv().await {
            match signal {
                SessionSignal::InvocationFailed(message) => {
                    debug!(%message, "invocation failed");
                }
                SessionSignal::VerdictReceived(true) => println!("Correct password."),
                SessionSignal::VerdictReceived(false) => println!("Incorrect password."),
                SessionSignal::ReadyForNextAttempt => println!("Try again:"),
                SessionSignal::AdvanceRequested => println!("The gates swing open. Onward!"),
                SessionSignal::SubscriptionLost => {
                    println!("Lost the event feed; type /start to re-arm it.");
                }
            }
        }
    });

    println!("Speak, friend, and enter. (type a password, or /reset, /start, /quit)");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());
    while let Some(line) = lines.next().await {
        let line = line?;
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/reset" => {
                session.reset().await;
                println!("Session reset.");
            }
            "/start" => match session.start().await {
                Ok(()) => println!("Subscription re-armed."),
                Err(err) => println!("Could not re-arm: {err}"),
            },
            password => {
                println!("Please confirm the transaction in your wallet...");
                match session.submit(password).await {
                    Ok(receipt) => {
                        println!("Submitted (tx {}). Waiting for the verdict...", receipt.tx_hash);
                    }
                    Err(err) => println!("Contract call failed: {err}"),
                }
            }
        }
    }

    session.stop().await;
    Ok(())
}
