#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path;
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use clap::ArgMatches;
use clap::Command;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use strum::EnumIter;
use strum::EnumVariantNames;
use strum::IntoEnumIterator;
use tokio::fs;

static CONFIG: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    ApiToken,
    ApiURL,
    BufferedTimeout,
    ConfigFile,
    ConversationID,
    ConversationType,
    InitialGreeting,
    MaxConversationHistory,
    Model,
    Provider,
    ServerID,
    SettingsID,
    Streaming,
    StreamingTimeout,
    UserID,
}

/// Anything other than `false`, `0` or `no` counts as enabled.
fn parse_flag(val: &str) -> bool {
    let val = val.trim().to_lowercase();
    return !matches!(val.as_str(), "false" | "0" | "no");
}

pub struct Config {}

impl Config {
    pub fn get(key: ConfigKey) -> String {
        if let Some(val) = CONFIG.get(&key.to_string()) {
            return val.to_string();
        }

        return "".to_string();
    }

    pub fn set(key: ConfigKey, value: &str) {
        CONFIG.insert(key.to_string(), value.to_string());
    }

    pub fn get_bool(key: ConfigKey) -> bool {
        return parse_flag(&Config::get(key));
    }

    /// Reads a millisecond value, falling back to the key's default when unparsable.
    pub fn get_duration(key: ConfigKey) -> Duration {
        let millis = Config::get(key)
            .trim()
            .parse::<u64>()
            .or_else(|_| return Config::default(key).parse::<u64>())
            .unwrap_or_default();

        return Duration::from_millis(millis);
    }

    pub fn get_usize(key: ConfigKey) -> usize {
        return Config::get(key)
            .trim()
            .parse::<usize>()
            .or_else(|_| return Config::default(key).parse::<usize>())
            .unwrap_or_default();
    }

    pub fn default(key: ConfigKey) -> String {
        let config_path = dirs::config_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(|| return path::PathBuf::from("."))
            .join("braindrive-chat/config.toml")
            .to_string_lossy()
            .to_string();

        let res = match key {
            ConfigKey::ApiToken => "",
            ConfigKey::ApiURL => "http://localhost:8005",
            ConfigKey::BufferedTimeout => "60000",
            ConfigKey::ConversationType => "chat",
            ConfigKey::InitialGreeting => {
                "Hello! I'm your AI assistant. How can I help you today?"
            }
            ConfigKey::MaxConversationHistory => "50",
            ConfigKey::Model => "",
            ConfigKey::Provider => "ollama",
            ConfigKey::ServerID => "",
            ConfigKey::SettingsID => "ollama_servers_settings",
            ConfigKey::Streaming => "true",
            ConfigKey::StreamingTimeout => "120000",
            ConfigKey::UserID => "current",

            // Special
            ConfigKey::ConfigFile => &config_path,
            ConfigKey::ConversationID => "",
        };

        return res.to_string();
    }

    pub async fn load(cmd: Command, clap_arg_matches: Vec<&ArgMatches>) -> Result<()> {
        for key in ConfigKey::iter() {
            Config::set(key, &Config::default(key))
        }

        let mut config_file = Config::default(ConfigKey::ConfigFile);
        for matches in clap_arg_matches.as_slice() {
            if let Ok(Some(arg_config_file)) =
                matches.try_get_one::<String>(&ConfigKey::ConfigFile.to_string())
            {
                config_file = arg_config_file.to_string();
            }
        }

        let config_path = path::PathBuf::from(config_file);
        if config_path.exists() {
            let toml_str = fs::read_to_string(config_path).await?;
            let doc = toml_str.parse::<toml_edit::Document>()?;

            for key in ConfigKey::iter() {
                if let Some(val) = doc.get(&key.to_string()) {
                    // Use clap value parsers to do validation.
                    let mut possible_values = vec![];
                    if let Some(arg) = cmd
                        .get_arguments()
                        .find(|e| return e.get_long() == Some(key.to_string().as_str()))
                    {
                        possible_values = arg
                            .get_possible_values()
                            .iter()
                            .map(|e| return e.get_name().to_string())
                            .collect::<Vec<String>>();
                    }

                    let val_str = if let Some(val_int) = val.as_integer() {
                        val_int.to_string()
                    } else if let Some(val_bool) = val.as_bool() {
                        val_bool.to_string()
                    } else if let Some(val_str) = val.as_str() {
                        val_str.to_string()
                    } else {
                        bail!(format!(
                            "config.toml has an unsupported value type for key '{key}'"
                        ));
                    };

                    if val_str.is_empty() {
                        continue;
                    }
                    if !possible_values.is_empty() && !possible_values.contains(&val_str) {
                        bail!(format!("config.toml has an invalid value for key '{key}': {val_str}\nPossible values are: {}", possible_values.join(", ")));
                    }
                    Config::set(key, &val_str);
                }
            }
        }

        for key in ConfigKey::iter() {
            for matches in clap_arg_matches.as_slice() {
                if let Ok(Some(val)) = matches.try_get_one::<String>(&key.to_string()) {
                    if val.is_empty() {
                        continue;
                    }
                    Config::set(key, val)
                }
            }
        }

        tracing::debug!(
            api_url = Config::get(ConfigKey::ApiURL),
            user_id = Config::get(ConfigKey::UserID),
            provider = Config::get(ConfigKey::Provider),
            model = Config::get(ConfigKey::Model),
            streaming = Config::get(ConfigKey::Streaming),
            conversation_id = Config::get(ConfigKey::ConversationID),
            "config"
        );

        return Ok(());
    }

    pub fn serialize_default(cmd: Command) -> String {
        let toml_str = ConfigKey::iter()
            .filter_map(|key| {
                if key == ConfigKey::ConversationID || key == ConfigKey::ConfigFile {
                    return None;
                }

                let arg = cmd
                    .get_arguments()
                    .find(|e| return e.get_long() == Some(key.to_string().as_str()))?;

                let mut description = arg
                    .get_help()
                    .map(|help| return help.to_string())
                    .unwrap_or_default()
                    .split("[default:")
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();

                if !arg.get_possible_values().is_empty() {
                    let possible_values = arg
                        .get_possible_values()
                        .iter()
                        .map(|e| return e.get_name())
                        .collect::<Vec<_>>()
                        .join(", ");
                    description = format!("{description} [possible values: {}]", possible_values);
                }

                let mut val = Config::default(key);
                if val.is_empty() {
                    val = format!("# {key} = \"\"");
                } else if val.parse::<i64>().is_ok() || val.parse::<bool>().is_ok() {
                    val = format!("{key} = {val}");
                } else {
                    val = format!("{key} = \"{val}\"");
                }

                return Some(format!("# {description}\n{val}"));
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        return toml_str;
    }
}
