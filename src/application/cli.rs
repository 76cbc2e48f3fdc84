use std::io;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use yansi::Paint;

use crate::application::console::help_text;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ConversationSummary;
use crate::domain::services::Conversations;

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
    std::process::exit(0);
}

fn format_conversation(conversation: &ConversationSummary) -> String {
    let timestamp = conversation
        .updated_at
        .clone()
        .unwrap_or_else(|| return conversation.created_at.to_string());
    let mut res = format!("- (ID: {}) {timestamp}", conversation.id);

    if let Some(model) = &conversation.model {
        res = format!("{res}, Model: {model}");
    }

    if let Some(title) = &conversation.title {
        let mut line = title.lines().next().unwrap_or_default().to_string();
        if line.chars().count() >= 70 {
            line = format!("{}...", line.chars().take(67).collect::<String>());
        }
        res = format!("{res}, {line}");
    }

    return res;
}

async fn print_conversations_list() -> Result<()> {
    let conversations = Conversations::default()
        .list(
            Config::get_usize(ConfigKey::MaxConversationHistory),
            &Config::get(ConfigKey::ConversationType),
        )
        .await?
        .iter()
        .map(|conversation| {
            return format_conversation(conversation);
        })
        .collect::<Vec<String>>();

    if conversations.is_empty() {
        println!("There are no conversations available. You should start your first one!");
    } else {
        println!("{}", conversations.join("\n"));
    }

    return Ok(());
}

async fn print_conversation(id: &str) -> Result<()> {
    let detail = Conversations::default().load(id).await?;
    println!("{}", Paint::new(format_conversation(&detail.summary)).bold());

    for message in detail.to_messages() {
        println!("\n{}:\n{}", Paint::cyan(message.sender), message.content);
    }

    return Ok(());
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        bail!(format!(
            "Config file already exists at {config_file_path_str}"
        ));
    }

    if let Some(parent) = config_file_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::File::create(&config_file_path).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!("Created default config file at {config_file_path_str}");
    return Ok(());
}

fn arg_conversation_id() -> Arg {
    return Arg::new("id")
        .short('i')
        .long("id")
        .help("Conversation ID")
        .num_args(1)
        .required(true);
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. This command will fail if the file exists already.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        );
}

fn subcommand_chat() -> Command {
    return Command::new("chat")
        .about("Start a new conversation, or resume one by ID.")
        .arg(
            Arg::new(ConfigKey::ConversationID.to_string())
                .short('i')
                .long(ConfigKey::ConversationID.to_string())
                .env("BRAINDRIVE_CHAT_CONVERSATION_ID")
                .num_args(1)
                .help("Resume an existing conversation."),
        );
}

fn subcommand_conversations() -> Command {
    return Command::new("conversations")
        .about("Manage past conversations stored on the backend.")
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List recent conversations with their ids and models."))
        .subcommand(
            Command::new("show")
                .about("Print every message of a conversation.")
                .arg(arg_conversation_id()),
        )
        .subcommand(
            Command::new("rename")
                .about("Change the title of a conversation.")
                .arg(arg_conversation_id())
                .arg(
                    Arg::new("title")
                        .short('t')
                        .long("title")
                        .help("New title")
                        .num_args(1)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a conversation.")
                .arg(arg_conversation_id()),
        );
}

pub fn build() -> Command {
    let commands_text = help_text()
        .split('\n')
        .map(|line| {
            if line.starts_with('-') {
                return format!("  {line}");
            }
            if line.starts_with("COMMANDS:") || line.starts_with("HOTKEYS:") {
                return Paint::new(format!("CHAT {line}"))
                    .underline()
                    .bold()
                    .to_string();
            }
            return line.to_string();
        })
        .collect::<Vec<String>>()
        .join("\n");

    let about = format!(
        "{}\n\nVersion: {}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
    );

    return Command::new("braindrive-chat")
        .about(about)
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .after_help(commands_text)
        .arg_required_else_help(false)
        .subcommand(subcommand_chat())
        .subcommand(subcommand_completions())
        .subcommand(subcommand_config())
        .subcommand(subcommand_conversations())
        .arg(
            Arg::new(ConfigKey::ConfigFile.to_string())
                .short('c')
                .long(ConfigKey::ConfigFile.to_string())
                .env("BRAINDRIVE_CHAT_CONFIG_FILE")
                .num_args(1)
                .help(format!("Path to configuration file [default: {}]", Config::default(ConfigKey::ConfigFile)))
                .global(true)
        )
        .arg(
            Arg::new(ConfigKey::ApiURL.to_string())
                .long(ConfigKey::ApiURL.to_string())
                .env("BRAINDRIVE_CHAT_API_URL")
                .num_args(1)
                .help(format!("Base URL of the BrainDrive backend. [default: {}]", Config::default(ConfigKey::ApiURL)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::ApiToken.to_string())
                .long(ConfigKey::ApiToken.to_string())
                .env("BRAINDRIVE_CHAT_API_TOKEN")
                .num_args(1)
                .help("Bearer token sent with every request to the backend.")
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::UserID.to_string())
                .short('u')
                .long(ConfigKey::UserID.to_string())
                .env("BRAINDRIVE_CHAT_USER_ID")
                .num_args(1)
                .help(format!("User the conversations belong to. [default: {}]", Config::default(ConfigKey::UserID)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::Provider.to_string())
                .short('p')
                .long(ConfigKey::Provider.to_string())
                .env("BRAINDRIVE_CHAT_PROVIDER")
                .num_args(1)
                .help(format!("Provider hosting the model. [default: {}]", Config::default(ConfigKey::Provider)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::Model.to_string())
                .short('m')
                .long(ConfigKey::Model.to_string())
                .env("BRAINDRIVE_CHAT_MODEL")
                .num_args(1)
                .help("Model to submit prompts to.")
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::ServerID.to_string())
                .long(ConfigKey::ServerID.to_string())
                .env("BRAINDRIVE_CHAT_SERVER_ID")
                .num_args(1)
                .help("Provider server the model is hosted on.")
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::SettingsID.to_string())
                .long(ConfigKey::SettingsID.to_string())
                .env("BRAINDRIVE_CHAT_SETTINGS_ID")
                .num_args(1)
                .help(format!("Provider settings record used by the backend. [default: {}]", Config::default(ConfigKey::SettingsID)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::ConversationType.to_string())
                .long(ConfigKey::ConversationType.to_string())
                .env("BRAINDRIVE_CHAT_CONVERSATION_TYPE")
                .num_args(1)
                .help(format!("Conversation type attached to new conversations. [default: {}]", Config::default(ConfigKey::ConversationType)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::Streaming.to_string())
                .long(ConfigKey::Streaming.to_string())
                .env("BRAINDRIVE_CHAT_STREAMING")
                .num_args(1)
                .help(format!("Stream responses as they are generated. [default: {}]", Config::default(ConfigKey::Streaming)))
                .value_parser(PossibleValuesParser::new(["true", "false"]))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::BufferedTimeout.to_string())
                .long(ConfigKey::BufferedTimeout.to_string())
                .env("BRAINDRIVE_CHAT_BUFFERED_TIMEOUT")
                .num_args(1)
                .help(format!("Milliseconds to wait for a complete response when streaming is disabled. [default: {}]", Config::default(ConfigKey::BufferedTimeout)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::StreamingTimeout.to_string())
                .long(ConfigKey::StreamingTimeout.to_string())
                .env("BRAINDRIVE_CHAT_STREAMING_TIMEOUT")
                .num_args(1)
                .help(format!("Milliseconds to wait between streamed fragments before giving up. [default: {}]", Config::default(ConfigKey::StreamingTimeout)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::MaxConversationHistory.to_string())
                .long(ConfigKey::MaxConversationHistory.to_string())
                .env("BRAINDRIVE_CHAT_MAX_CONVERSATION_HISTORY")
                .num_args(1)
                .help(format!("Maximum number of conversations listed, and messages replayed as history. [default: {}]", Config::default(ConfigKey::MaxConversationHistory)))
                .global(true),
        )
        .arg(
            Arg::new(ConfigKey::InitialGreeting.to_string())
                .long(ConfigKey::InitialGreeting.to_string())
                .env("BRAINDRIVE_CHAT_INITIAL_GREETING")
                .num_args(1)
                .help(format!("Assistant greeting shown when starting a new conversation. Set to an empty string to disable. [default: {}]", Config::default(ConfigKey::InitialGreeting)))
                .global(true),
        );
}

/// Returns true when the interactive chat should start.
pub async fn parse() -> Result<bool> {
    let matches = build().get_matches();

    match matches.subcommand() {
        Some(("chat", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
        }
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
                return Ok(false);
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
                return Ok(false);
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
                return Ok(false);
            }
            _ => {
                subcommand_config().print_long_help()?;
                return Ok(false);
            }
        },
        Some(("conversations", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;

            match subcmd_matches.subcommand() {
                Some(("list", _)) => {
                    print_conversations_list().await?;
                }
                Some(("show", show_matches)) => {
                    if let Some(id) = show_matches.get_one::<String>("id") {
                        print_conversation(id).await?;
                    }
                }
                Some(("rename", rename_matches)) => {
                    let id = rename_matches.get_one::<String>("id");
                    let title = rename_matches.get_one::<String>("title");
                    if let (Some(id), Some(title)) = (id, title) {
                        let summary = Conversations::default().rename(id, title).await?;
                        println!("{}", format_conversation(&summary));
                    }
                }
                Some(("delete", delete_matches)) => {
                    if let Some(id) = delete_matches.get_one::<String>("id") {
                        Conversations::default().delete(id).await?;
                        println!("Deleted conversation {id}");
                    }
                }
                _ => {
                    subcommand_conversations().print_long_help()?;
                }
            }

            return Ok(false);
        }
        _ => {
            Config::load(build(), vec![&matches]).await?;
        }
    }

    return Ok(true);
}
