use clap::Parser;
use lantern_core::Context;
use lantern_core::config::Config;
use lantern_core::lan::proto::Chat;
use lantern_core::lan::tasks::{self, Notifier, TaskSnapshot, TaskStatus};
use lantern_core::store::MessageStore;
use lantern_core::utils::tracing::init_logging;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Terminal client for LAN presence, chat and task announcements")]
struct Cli {
    /// Name other devices see in the roster
    #[arg(long, default_value = "anonymous")]
    name: String,
    /// Database path; omitted means an in-memory store that forgets on exit
    #[arg(long)]
    db: Option<PathBuf>,
    /// Multicast group override, otherwise LAN_MULTICAST_ADDR or the built-in default
    #[arg(long)]
    group: Option<Ipv4Addr>,
    /// UDP port override, otherwise LAN_PORT or the built-in default
    #[arg(long)]
    port: Option<u16>,
}

struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, title: &str, body: &str) {
        println!("*** {title}: {body}");
    }

    fn beep(&self) {
        use std::io::Write;
        // BEL, most terminals still honor it
        print!("\x07");
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();

    let store = Arc::new(match &cli.db {
        Some(path) => MessageStore::open(path)?,
        None => MessageStore::open_in_memory()?,
    });
    let device_id = store.ensure_device_id()?;
    let mut config = Config::from_env(device_id, cli.name)?;
    if let Some(group) = cli.group {
        config.multicast_addr = group;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let ctx = Context::new(config, store);
    ctx.service.on_chat(|chat: &Chat| {
        let label = if chat.to.is_some() { "dm" } else { "chat" };
        println!("[{label}] {}: {}", chat.from, chat.text);
    });
    tasks::notify_on_task_complete(&ctx.service, Arc::new(TerminalNotifier));
    ctx.start().await?;

    println!("you are \"{}\" ({})", ctx.config.device_name, ctx.config.device_id);
    println!("type /help for commands, anything else is sent to the group");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !handle_line(&ctx, line.trim()).await {
            break;
        }
    }

    ctx.stop().await;
    info!("left the group");
    Ok(())
}

/// One REPL line. Returns false when the client should exit.
async fn handle_line(ctx: &Context, line: &str) -> bool {
    match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
        ("", _) => {}
        ("/help", _) => print_help(),
        ("/quit", _) => return false,
        ("/who", _) => {
            let peers = ctx.get_online_peers();
            if peers.is_empty() {
                println!("nobody is on the air");
            }
            for peer in peers {
                let you = if peer.device_id == ctx.config.device_id { " (you)" } else { "" };
                println!("{} \"{}\" at {}:{}{you}", peer.device_id, peer.name, peer.addr, peer.port);
            }
        }
        ("/msg", rest) => {
            let (to, text) = match rest.strip_prefix('@') {
                Some(addressed) => match addressed.split_once(' ') {
                    Some((id, text)) => (Some(id), text.trim()),
                    None => (Some(addressed), ""),
                },
                None => (None, rest),
            };
            if text.is_empty() {
                println!("usage: /msg [@device-id] <text>");
            } else if let Err(error) = ctx.service.send_chat(text, to).await {
                println!("send failed: {error}");
            }
        }
        ("/history", "") => match ctx.store.list_today() {
            Ok(rows) => print_rows(&rows),
            Err(error) => println!("history failed: {error}"),
        },
        ("/history", peer) => match ctx.store.list_today_with_peer(&ctx.config.device_id, peer) {
            Ok(rows) => print_rows(&rows),
            Err(error) => println!("history failed: {error}"),
        },
        ("/broadcasts", _) => match ctx.store.list_broadcast_today() {
            Ok(rows) => print_rows(&rows),
            Err(error) => println!("history failed: {error}"),
        },
        ("/done", rest) => {
            let parsed = rest.split_once(' ').and_then(|(id, title)| {
                let title = title.trim();
                match id.parse::<i64>() {
                    Ok(id) if !title.is_empty() => Some((id, title)),
                    _ => None,
                }
            });
            match parsed {
                Some((id, title)) => {
                    // simulate a task update crossing into done
                    let before = TaskSnapshot { id, title: title.to_string(), status: TaskStatus::InProgress };
                    let after = TaskSnapshot { id, title: title.to_string(), status: TaskStatus::Done };
                    if tasks::maybe_broadcast_task_complete(&ctx.service, Some(&before), Some(&after))
                        .await
                    {
                        println!("announced completion of task {id}");
                    } else {
                        println!("announce failed");
                    }
                }
                None => println!("usage: /done <task-id> <title>"),
            }
        }
        ("/stats", _) => match serde_json::to_string_pretty(&ctx.get_json_metrics()) {
            Ok(stats) => println!("{stats}"),
            Err(error) => println!("stats failed: {error}"),
        },
        ("/purge", _) => match ctx.store.purge_not_today() {
            Ok(removed) => println!("purged {removed} old message(s)"),
            Err(error) => println!("purge failed: {error}"),
        },
        (command, _) if command.starts_with('/') => {
            println!("unknown command {command}, try /help");
        }
        _ => {
            // bare text goes to everyone
            if let Err(error) = ctx.service.send_chat(line, None).await {
                println!("send failed: {error}");
            }
        }
    }
    true
}

fn print_rows(rows: &[lantern_core::store::MessageRow]) {
    if rows.is_empty() {
        println!("nothing today");
    }
    for row in rows {
        match &row.to_device_id {
            Some(to) => println!("#{} {} -> {}: {}", row.id, row.from_device_id, to, row.text),
            None => println!("#{} {}: {}", row.id, row.from_device_id, row.text),
        }
    }
}

fn print_help() {
    println!("/who                 online devices");
    println!("/msg <text>          broadcast a line (same as typing it plain)");
    println!("/msg @<id> <text>    direct message one device");
    println!("/history [id]        today's messages, optionally with one device");
    println!("/broadcasts          today's broadcasts only");
    println!("/done <id> <title>   announce a completed task");
    println!("/stats               service counters");
    println!("/purge               drop messages from previous days");
    println!("/quit                leave");
}
