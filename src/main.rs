//! Chathub console client.
//!
//! Prints incoming chat traffic and sends lines typed on stdin:
//! `chat <chatId> <text>`, `group <chatId> <text>`, `join <chatId>`,
//! `gjoin <chatId>`.

use anyhow::{bail, Context, Result};
use chathub::shared::{HubEvent, HubEventKind, HubName};
use chathub::{logging, ClientConfig, Delivery, Session};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(logging::DEFAULT_DIRECTIVE);
    let config = ClientConfig::from_env();
    let session = Session::new(&config).context("failed to create session")?;

    if !session.resume().await? {
        let email = std::env::var("CHATHUB_EMAIL")
            .context("no stored session; set CHATHUB_EMAIL and CHATHUB_PASSWORD")?;
        let password = std::env::var("CHATHUB_PASSWORD").context("CHATHUB_PASSWORD not set")?;
        let login = session.login(&email, &password).await.context("login failed")?;
        println!("logged in as {}", login.full_name);
    }

    subscribe_printers(&session)?;

    let mut auth_events = session.session_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("shutting down");
                break;
            }
            event = auth_events.recv() => {
                if let Ok(chathub::AuthEvent::LoginRequired) = event {
                    eprintln!("session expired, log in again");
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Err(e) = run_command(&session, line.trim()).await {
                    eprintln!("{e:#}");
                }
            }
        }
    }

    session.hubs().stop_all().await;
    Ok(())
}

fn subscribe_printers(session: &Session) -> Result<()> {
    let hubs = session.hubs();
    let printed = [
        (HubName::Chat, HubEventKind::ReceiveMessage),
        (HubName::Chat, HubEventKind::ReceiveErrorMessage),
        (HubName::Chat, HubEventKind::ReceiveBroadcast),
        (HubName::Chat, HubEventKind::ReceiveTypingNotification),
        (HubName::Group, HubEventKind::ReceiveGroupMessage),
        (HubName::Group, HubEventKind::ReceiveGroupErrorMessage),
        (HubName::Group, HubEventKind::ReceiveGroupTypingNotification),
    ];
    for (hub, kind) in printed {
        hubs.subscribe(hub, kind, print_event)?;
    }
    Ok(())
}

fn print_event(event: &HubEvent) {
    match event {
        HubEvent::ReceiveMessage(m) => println!(
            "[{}] {}: {}",
            m.chat_id.as_deref().unwrap_or("?"),
            m.sender_fullname.as_deref().unwrap_or("?"),
            m.content
        ),
        HubEvent::ReceiveGroupMessage(m) => println!(
            "[group {}] {}: {}",
            m.chat_id.as_deref().unwrap_or("?"),
            m.sender_fullname.as_deref().unwrap_or("?"),
            m.content
        ),
        HubEvent::ReceiveBroadcast(b) => println!("[broadcast] {b}"),
        HubEvent::ReceiveTypingNotification(user) => println!("{user} is typing"),
        HubEvent::ReceiveGroupTypingNotification(user) => println!("{user} is typing (group)"),
        HubEvent::ReceiveErrorMessage(e) | HubEvent::ReceiveGroupErrorMessage(e) => {
            eprintln!("server error: {e}")
        }
        other => println!("{other:?}"),
    }
}

async fn run_command(session: &Session, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    let hubs = session.hubs();
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let chat_id = parts.next().context("missing chat id")?;
    let text = parts.next().unwrap_or_default();

    let delivery = match command {
        "chat" if !text.is_empty() => hubs.send_message(chat_id, text).await?,
        "group" if !text.is_empty() => hubs.send_group_message(chat_id, text).await?,
        "join" => hubs.join_chat_room(chat_id).await?,
        "gjoin" => hubs.join_group_chat_room(chat_id).await?,
        "chat" | "group" => bail!("missing message text"),
        other => bail!("unknown command {other:?}"),
    };
    if let Delivery::Queued = delivery {
        println!("(hub offline, queued for delivery)");
    }
    Ok(())
}
