#![forbid(unsafe_code)]

use parlor_client_core::{ChatSession, ClientConfig, SessionSender};
use parlor_domain::{RoomSpec, RoomUpdate};
use parlor_protocol::ServerEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parlor_client [--connect host:port] [--room name] [--username name] [--password secret]\n\
\n\
Options:\n\
	--connect   Server endpoint (default: 127.0.0.1:18203, quic:// prefix accepted)\n\
	--room      Room to join on start (default: global)\n\
	--username  Display name (default: $USER or guest)\n\
	--password  Room password\n\
	--help      Show this help\n\
\n\
Commands (stdin):\n\
	/join <room> [password]   switch rooms\n\
	/leave                    leave the current room\n\
	/rooms                    list public rooms\n\
	/create <room>            create a public room\n\
	/delete <room>            delete a room\n\
	/limit <room> <maxUsers>  change a room's capacity\n\
	/edit <id> <text>         edit one of your messages\n\
	/react <id> <emoji>       toggle a reaction\n\
	/quit                     disconnect\n\
	anything else is sent as a chat message\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,parlor_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	endpoint: String,
	room: String,
	username: String,
	password: Option<String>,
}

fn parse_args() -> Args {
	let mut args = Args {
		endpoint: "127.0.0.1:18203".to_string(),
		room: parlor_domain::DEFAULT_ROOM.to_string(),
		username: std::env::var("USER").unwrap_or_else(|_| "guest".to_string()),
		password: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		let mut value = || {
			let v = it.next().unwrap_or_else(|| usage_and_exit());
			if v.trim().is_empty() {
				eprintln!("{arg} must be non-empty");
				usage_and_exit();
			}
			v
		};
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" | "--endpoint" => args.endpoint = value(),
			"--room" => args.room = value(),
			"--username" => args.username = value(),
			"--password" => args.password = Some(value()),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}
	args
}

fn print_event(event: &ServerEvent) {
	match event {
		ServerEvent::ChatMessage(m) => println!("[{}] <{}> {}  ({})", m.room, m.username, m.text, m.id),
		ServerEvent::MessageEdited(m) => println!("[{}] <{}> {}  (edited, {})", m.room, m.username, m.text, m.id),
		ServerEvent::MessageHistory(history) => {
			for m in history {
				println!("[{}] <{}> {}  ({})", m.room, m.username, m.text, m.id);
			}
		}
		ServerEvent::UserList(p) => println!("* {} members: {}", p.room, p.users.join(", ")),
		ServerEvent::UserTyping(p) => println!("* {} is typing", p.username),
		ServerEvent::UserStopTyping(_) => {}
		ServerEvent::ReactionUpdate(p) => {
			let summary: Vec<String> = p.reactions.iter().map(|(e, users)| format!("{e} x{}", users.len())).collect();
			println!("* reactions on {}: {}", p.message_id, summary.join(" "));
		}
		ServerEvent::RoomError(p) => println!("! {}", p.message),
		ServerEvent::RoomCreated(r) => println!("* room created: {}", r.name),
		ServerEvent::RoomUpdated(r) => println!("* room updated: {} (max {})", r.name, r.max_users),
		ServerEvent::RoomDeleted(p) => println!("* room deleted: {}", p.room),
		ServerEvent::RoomList(rooms) => {
			for r in rooms {
				let lock = if r.has_password { " (locked)" } else { "" };
				println!("  {} {}/{}{}  {}", r.name, r.active_users, r.max_users, lock, r.description);
			}
		}
	}
}

async fn run_command(tx: &mut SessionSender, line: &str, args: &mut Args) -> anyhow::Result<bool> {
	let mut parts = line.splitn(3, ' ');
	let cmd = parts.next().unwrap_or_default();
	let first = parts.next().map(str::trim).unwrap_or_default();
	let rest = parts.next().map(str::trim);

	match cmd {
		"/quit" => return Ok(false),
		"/join" if !first.is_empty() => {
			args.room = first.to_string();
			tx.join(first, &args.username, rest).await?;
		}
		"/leave" => tx.leave().await?,
		"/rooms" => tx.list_rooms().await?,
		"/create" if !first.is_empty() => {
			let spec = RoomSpec {
				created_by: Some(args.username.clone()),
				..RoomSpec::named(first)
			};
			tx.create_room(spec).await?;
		}
		"/delete" if !first.is_empty() => tx.delete_room(first).await?,
		"/limit" => match rest.and_then(|n| n.parse::<u32>().ok()) {
			Some(max_users) if !first.is_empty() => {
				let update = RoomUpdate {
					max_users: Some(max_users),
					..RoomUpdate::default()
				};
				tx.update_room(first, update).await?
			}
			_ => warn!("usage: /limit <room> <maxUsers>"),
		},
		"/edit" => match rest {
			Some(text) if !first.is_empty() => tx.edit(first, text).await?,
			_ => warn!("usage: /edit <id> <text>"),
		},
		"/react" => match rest {
			Some(emoji) if !first.is_empty() => tx.react(first, emoji, &args.username, &args.room).await?,
			_ => warn!("usage: /react <id> <emoji>"),
		},
		_ if line.starts_with('/') => warn!(command = cmd, "unknown command"),
		_ => tx.say(line).await?,
	}
	Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let mut args = parse_args();

	let cfg = ClientConfig::from_endpoint(&args.endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});
	info!(server = %args.endpoint, username = %args.username, room = %args.room, "connecting");

	let session = ChatSession::connect(cfg).await?;
	let (conn, mut tx, mut rx) = session.into_parts();

	tx.join(&args.room, &args.username, args.password.as_deref()).await?;

	let printer = tokio::spawn(async move {
		loop {
			match rx.next_event().await {
				Ok(Some(event)) => print_event(&event),
				Ok(None) => break,
				Err(e) => {
					warn!(error = %e, "session read failed");
					break;
				}
			}
		}
	});

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Some(line) = lines.next_line().await? {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		if !run_command(&mut tx, line, &mut args).await? {
			break;
		}
	}

	tx.finish();
	conn.close(0u32.into(), b"bye");
	printer.abort();
	Ok(())
}
