//! # hearth
//!
//! Terminal front end for the Hearth family board: direct messages, group
//! chats and one-to-one voice calls against a Hearth server.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use hearth_client::{
    ApiClient, CallController, CallPhase, CallSnapshot, ChatLine, ClientConfig,
    ConversationPoller, ConversationTarget, ConversationView, MessageFeed,
};
use hearth_media::audio::CpalMicrophone;
use hearth_media::webrtc_peer::WebRtcLinkFactory;
use hearth_media::{Chime, SilentChime, ToneChime};
use hearth_shared::{GroupId, MessageId, UserId};

#[derive(Parser, Debug)]
#[command(name = "hearth", version, about = "Messages and voice calls for the family board")]
struct Cli {
    /// Server base URL (overrides HEARTH_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Act as this user (overrides HEARTH_USER)
    #[arg(long, short, global = true)]
    user: Option<String>,

    /// Do not play the notification tone
    #[arg(long, global = true)]
    silent: bool,

    /// STUN server for calls, repeatable (defaults to public servers)
    #[arg(long = "stun", global = true, value_name = "URL")]
    stun_servers: Vec<String>,

    /// Do not play the other side of a call
    #[arg(long, global = true)]
    no_playback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the server's name and version
    Info,

    /// List your direct messages
    Inbox,

    /// Send a direct message
    Send {
        to: String,
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Delete a direct message you sent
    Delete { id: String },

    /// Open a live conversation with someone. Type to send, /quit to leave.
    Chat { peer: String },

    /// Group chats
    #[command(subcommand)]
    Group(GroupCommand),

    /// Call someone. Ctrl-C hangs up.
    Call { peer: String },

    /// Wait for incoming calls and answer them
    Listen,
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create a group. You are added as a member.
    Create {
        name: String,
        #[arg(required = true, num_args = 1..)]
        members: Vec<String>,
    },

    /// List the groups you belong to
    List,

    /// Post to a group
    Send {
        id: String,
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Open a live group conversation. Type to send, /quit to leave.
    Watch { id: String },

    /// Leave a group. The last member leaving dissolves it.
    Leave { id: String },

    /// Delete a group you created
    Delete { id: String },
}

struct Session {
    config: ClientConfig,
    api: Arc<ApiClient>,
    chime: Arc<dyn Chime>,
    links: WebRtcLinkFactory,
}

impl Session {
    fn me(&self) -> Result<UserId> {
        let raw = self
            .config
            .username
            .as_deref()
            .context("No user given. Pass --user or set HEARTH_USER")?;
        Ok(UserId::parse(raw)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hearth_client=info,hearth_media=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let mut config = ClientConfig::from_env();
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(user) = cli.user {
        config.username = Some(user);
    }

    let api = Arc::new(ApiClient::new(&config.server_url)?);
    let chime: Arc<dyn Chime> = if cli.silent {
        Arc::new(SilentChime)
    } else {
        Arc::new(ToneChime::default())
    };
    let mut links = if cli.stun_servers.is_empty() {
        WebRtcLinkFactory::default()
    } else {
        WebRtcLinkFactory::new(cli.stun_servers)
    };
    if cli.no_playback {
        links = links.without_playback();
    }

    let session = Session {
        config,
        api,
        chime,
        links,
    };

    match cli.command {
        Command::Info => {
            let info = session.api.info().await?;
            println!("{} v{} at {}", info.name, info.version, session.config.server_url);
            if info.stale_call_secs > 0 {
                println!("Unanswered calls expire after {}s", info.stale_call_secs);
            }
        }
        Command::Inbox => inbox(&session).await?,
        Command::Send { to, message } => {
            let me = session.me()?;
            let sent = session
                .api
                .send_message(&me, &UserId::parse(&to)?, &message.join(" "))
                .await?;
            println!("Sent {}", sent.id);
        }
        Command::Delete { id } => {
            session
                .api
                .delete_message(MessageId::parse(&id)?, &session.me()?)
                .await?;
            println!("Deleted");
        }
        Command::Chat { peer } => {
            let target = ConversationTarget::Direct(UserId::parse(&peer)?);
            chat(&session, target).await?;
        }
        Command::Group(group) => group_command(&session, group).await?,
        Command::Call { peer } => call(&session, UserId::parse(&peer)?).await?,
        Command::Listen => listen(&session).await?,
    }

    Ok(())
}

async fn inbox(session: &Session) -> Result<()> {
    let me = session.me()?;
    let messages = session.api.direct_messages(&me).await?;
    if messages.is_empty() {
        println!("No messages");
    }
    for m in messages {
        let marker = if m.to == me && !m.read { "*" } else { " " };
        let who = if m.from == me {
            format!("to {}", m.to)
        } else {
            format!("from {}", m.from)
        };
        println!(
            "{marker} {}  {}  {who}: {}",
            m.id,
            m.sent_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            m.content
        );
    }
    Ok(())
}

async fn group_command(session: &Session, command: GroupCommand) -> Result<()> {
    let me = session.me()?;
    match command {
        GroupCommand::Create { name, members } => {
            let members = members
                .iter()
                .map(|m| UserId::parse(m))
                .collect::<Result<Vec<_>, _>>()?;
            let group = session.api.create_group(&name, &members, &me).await?;
            println!("Created \"{}\" ({})", group.name, group.id);
        }
        GroupCommand::List => {
            let groups = session.api.groups_for(&me).await?;
            if groups.is_empty() {
                println!("No groups");
            }
            for g in groups {
                let members: Vec<&str> = g.members.iter().map(UserId::as_str).collect();
                println!(
                    "{}  {}  [{}]  {} messages",
                    g.id,
                    g.name,
                    members.join(", "),
                    g.messages.len()
                );
            }
        }
        GroupCommand::Send { id, message } => {
            session
                .api
                .post_group_message(GroupId::parse(&id)?, &me, &message.join(" "))
                .await?;
            println!("Posted");
        }
        GroupCommand::Watch { id } => {
            chat(session, ConversationTarget::Group(GroupId::parse(&id)?)).await?;
        }
        GroupCommand::Leave { id } => {
            let outcome = session.api.leave_group(GroupId::parse(&id)?, &me).await?;
            if outcome.dissolved {
                println!("Left. You were the last member, so the group is gone.");
            } else {
                println!("Left");
            }
        }
        GroupCommand::Delete { id } => {
            session.api.delete_group(GroupId::parse(&id)?, &me).await?;
            println!("Deleted");
        }
    }
    Ok(())
}

// ─── Live conversation ───

fn print_line(line: &ChatLine) {
    println!(
        "[{}] {}: {}",
        line.sent_at.with_timezone(&chrono::Local).format("%H:%M"),
        line.from,
        line.content
    );
}

/// Print what changed since `shown` lines were printed.
fn render(view: &ConversationView, shown: &mut usize) {
    if view.lines.len() < *shown {
        println!("-- conversation changed --");
        *shown = 0;
    }
    for line in &view.lines[*shown..] {
        print_line(line);
    }
    *shown = view.lines.len();
}

async fn chat(session: &Session, target: ConversationTarget) -> Result<()> {
    let me = session.me()?;
    if let ConversationTarget::Direct(peer) = &target {
        if peer == &me {
            bail!("Cannot chat with yourself");
        }
    }

    let poller = ConversationPoller::new(
        me.clone(),
        target.clone(),
        session.api.clone(),
        session.chime.clone(),
    );
    let mut view = poller.subscribe();
    let handle = poller.spawn(session.config.message_poll);
    info!(?target, "Conversation open");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = 0;

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                render(&current, &mut shown);
                if current.closed {
                    println!("-- this group no longer exists --");
                    break;
                }
            }
            line = input.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text == "/quit" {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                let sent = match &target {
                    ConversationTarget::Direct(peer) => {
                        session.api.send_message(&me, peer, text).await.map(|_| ())
                    }
                    ConversationTarget::Group(id) => {
                        session.api.post_group_message(*id, &me, text).await.map(|_| ())
                    }
                };
                if let Err(e) = sent {
                    eprintln!("Not sent: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.join().await;
    Ok(())
}

// ─── Calls ───

fn call_controller(session: &Session) -> Result<CallController> {
    Ok(CallController::new(
        session.me()?,
        session.api.clone(),
        Arc::new(CpalMicrophone::new()),
        Arc::new(session.links.clone()),
        session.chime.clone(),
        session.config.call_timing(),
    ))
}

fn describe(snapshot: &CallSnapshot) -> String {
    let peer = snapshot
        .peer
        .as_ref()
        .map(UserId::as_str)
        .unwrap_or("someone");
    match snapshot.phase {
        CallPhase::Idle => "Call ended".to_string(),
        CallPhase::Calling if snapshot.awaiting_answer => format!("Calling {peer}..."),
        CallPhase::Calling => format!("{peer} answered, connecting..."),
        CallPhase::Ringing => format!("Incoming call from {peer}. Answer? [y/N]"),
        CallPhase::Connected => format!("In call with {peer}. Type h or press Ctrl-C to hang up."),
    }
}

async fn call(session: &Session, peer: UserId) -> Result<()> {
    let controller = call_controller(session)?;
    let mut state = controller.subscribe();

    controller.call(peer).await?;
    println!("{}", describe(&controller.snapshot()));

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut last = controller.snapshot();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                if current != last {
                    println!("{}", describe(&current));
                }
                if current.phase == CallPhase::Idle {
                    break;
                }
                last = current;
            }
            line = input.next_line() => {
                match line? {
                    Some(l) if l.trim() == "h" => controller.hangup().await,
                    Some(_) => {}
                    None => {
                        controller.hangup().await;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => controller.hangup().await,
        }
    }

    Ok(())
}

async fn listen(session: &Session) -> Result<()> {
    let controller = call_controller(session)?;
    let mut state = controller.subscribe();
    let watch = controller.watch_incoming();
    println!("Waiting for calls as {}. Ctrl-C to quit.", session.me()?);

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                println!("{}", describe(&current));
            }
            line = input.next_line() => {
                let Some(line) = line? else { break };
                let answer = line.trim().to_ascii_lowercase();
                match controller.snapshot().phase {
                    CallPhase::Ringing if answer == "y" || answer == "yes" => {
                        if let Err(e) = controller.accept().await {
                            eprintln!("Could not answer: {e}");
                        }
                    }
                    CallPhase::Ringing => {
                        if let Err(e) = controller.decline().await {
                            eprintln!("Could not decline: {e}");
                        }
                    }
                    CallPhase::Calling | CallPhase::Connected if answer == "h" => {
                        controller.hangup().await;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if controller.snapshot().phase == CallPhase::Idle {
                    break;
                }
                controller.hangup().await;
            }
        }
    }

    controller.hangup().await;
    watch.join().await;
    Ok(())
}
