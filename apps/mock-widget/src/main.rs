use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use chatlink_core::{ChatConfig, Region, StaticIdentity, VisitorProfile};
use chatlink_session::{ChatSession, SessionDeps, SessionSettings, SessionSnapshot};
use clap::{Args, Parser};
use tracing::{Instrument, info, info_span};

mod loopback;

use loopback::{ConsoleHost, LogDelegate, LoopbackFactory};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a chat session against a loopback widget")]
struct Cli {
    #[command(flatten)]
    run: RunArgs,
    /// Print the final session snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, env = "CHATLINK_APP_ID")]
    app_id: String,
    #[arg(long, default_value = "eu")]
    region: Region,
    /// Bot to start once the session is restored
    #[arg(long)]
    bot: Option<String>,
    #[arg(long)]
    visitor_name: Option<String>,
    /// Present the chat before stopping
    #[arg(long)]
    present: bool,
    #[arg(long, default_value_t = 1)]
    unread: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    chatlink_telemetry::install()?;

    let span = info_span!(
        "mock_widget",
        app_id = tracing::field::Empty,
        request_id = tracing::field::Empty
    );
    chatlink_telemetry::with_session_fields(&span, &cli.run.app_id, None);
    let snapshot = run(cli.run).instrument(span).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "session={} visibility={}",
            snapshot.session.as_str(),
            snapshot.visibility.as_str()
        );
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<SessionSnapshot> {
    let settings = SessionSettings::from_env().context("invalid CHATLINK_* settings")?;
    let session = ChatSession::spawn(
        SessionDeps::new(Arc::new(LoopbackFactory::with_unread(args.unread)))
            .with_delegate(Arc::new(LogDelegate))
            .with_identity(Arc::new(StaticIdentity("mock-team".into())))
            .with_modal_host(Arc::new(ConsoleHost))
            .with_settings(settings),
    );

    session.configure(ChatConfig::new(args.app_id).with_region(args.region));
    if let Some(name) = args.visitor_name {
        session.set_visitor_data(VisitorProfile::default().with_name(name), None);
    }
    session.start_session(None);
    wait_restored(&session).await?;

    if let Some(bot) = args.bot {
        match session.can_start_bot(Some(bot.clone())).await {
            Ok(true) => session.start_bot(bot),
            Ok(false) => info!(bot_id = %bot, "bot cannot be started"),
            Err(err) => bail!("canStartBot failed: {err}"),
        }
    }
    if args.present {
        session.present(None);
    }

    let unread = session.get_unread_message().await?;
    info!(count = unread.count, "unread messages");

    session.stop_session(true).await;
    Ok(session.snapshot())
}

async fn wait_restored(session: &ChatSession) -> Result<()> {
    let mut state = session.subscribe();
    tokio::time::timeout(Duration::from_secs(10), state.wait_for(|snapshot| snapshot.restored))
        .await
        .context("session was not restored in time")?
        .context("chat controller stopped")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlink_core::SessionState;

    #[tokio::test]
    async fn loopback_session_runs_to_completion() {
        let snapshot = run(RunArgs {
            app_id: "app-1".into(),
            region: Region::Us,
            bot: Some("welcome".into()),
            visitor_name: Some("Bob".into()),
            present: true,
            unread: 3,
        })
        .await
        .unwrap();

        assert_eq!(snapshot.session, SessionState::NotStarted);
        assert!(!snapshot.visibility.is_visible());
    }

    #[test]
    fn cli_parses_region_codes() {
        let cli = Cli::try_parse_from(["mock-widget", "--app-id", "a", "--region", "RU"]).unwrap();
        assert_eq!(cli.run.region, Region::Ru);
        assert!(Cli::try_parse_from(["mock-widget", "--app-id", "a", "--region", "mars"]).is_err());
    }
}
