use std::process::ExitCode;

use chime::api::events::StoreEvent;
use chime::app::{AppConfig, Services};
use chime::utils::RUNTIME;

const USAGE: &str = "\
Usage:
  chime chats               List conversations as JSON
  chime messages <chat-id>  List messages of a conversation as JSON
  chime mark-read <chat-id> Mark incoming messages of a conversation read
  chime contacts            List saved contacts as JSON

Contacts are stored in ~/.chime/contacts/ as YAML files.
Set RUST_LOG=debug for diagnostics.";

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn fail(e: chime::Error) -> ExitCode {
    eprintln!("Error: {}", e);
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("chats");
    let chat_id = args.get(1).and_then(|s| s.parse::<i64>().ok());

    let config = AppConfig::load();
    let services = Services::build(&config, RUNTIME.handle(), None);
    let (client, mut events) = services.client(RUNTIME.handle());

    match (command, chat_id) {
        ("chats", _) => client.fetch_chats(),
        ("contacts", _) => client.fetch_contacts(),
        ("messages", Some(id)) => client.fetch_messages(id),
        ("mark-read", Some(id)) => client.mark_read(id),
        ("help" | "-h" | "--help", _) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    }

    let Some(event) = RUNTIME.block_on(events.recv()) else {
        eprintln!("Error: store task ended without a result");
        return ExitCode::FAILURE;
    };
    match event {
        StoreEvent::ChatsLoaded(result) => result.map_or_else(fail, |chats| print_json(&chats)),
        StoreEvent::ContactsLoaded(result) => result.map_or_else(fail, |contacts| print_json(&contacts)),
        StoreEvent::MessagesLoaded { result, .. } => result.map_or_else(fail, |messages| print_json(&messages)),
        StoreEvent::MarkedRead { chat_id, result } => result.map_or_else(fail, |changed| {
            println!("marked {} message(s) read in chat {}", changed, chat_id);
            ExitCode::SUCCESS
        }),
    }
}
