use anyhow::{bail, Result};
use clap::Parser;
use sealirc_sdk::config::{ServerConfig, DEFAULT_PORT, DEFAULT_TLS_PORT};
use sealirc_sdk::store::Db;

/// Line-mode IRC client with per-channel encryption.
#[derive(Parser, Debug, Clone)]
#[command(name = "sealirc", version, about)]
pub struct Cli {
    /// Path to the SQLite database holding servers, keys and aliases.
    #[arg(long, env = "SEALIRC_DB", default_value = "sealirc.db")]
    pub db_path: String,

    /// Connect to a server record saved in the database, by name.
    #[arg(long, conflicts_with = "host")]
    pub server: Option<String>,

    /// Print the saved server records and exit.
    #[arg(long)]
    pub list_servers: bool,

    /// Hostname to connect to (ad-hoc server record).
    #[arg(long)]
    pub host: Option<String>,

    /// Port. Defaults to 6697 with --tls, 6667 otherwise.
    #[arg(long)]
    pub port: Option<u16>,

    /// Use TLS. Server certificates are not verified.
    #[arg(long)]
    pub tls: bool,

    /// Display name for an ad-hoc record. Defaults to the hostname.
    #[arg(long)]
    pub name: Option<String>,

    /// Nickname.
    #[arg(long, env = "SEALIRC_NICK")]
    pub nick: Option<String>,

    /// Nickname to use when the first one is taken.
    #[arg(long)]
    pub alt_nick: Option<String>,

    /// Username (ident). Defaults to the nickname.
    #[arg(long)]
    pub user: Option<String>,

    /// Real name.
    #[arg(long, default_value = "SealIRC User")]
    pub realname: String,

    /// Channels to join once connected. Comma-separated.
    #[arg(long, default_value = "")]
    pub join: String,

    /// Save the ad-hoc record to the database for later --server use.
    #[arg(long, requires = "host")]
    pub save: bool,
}

impl Cli {
    /// Resolve the server record to connect with: a saved record when
    /// `--server` is given, otherwise one built from the flags.
    pub fn server_config(&self, db: &Db) -> Result<ServerConfig> {
        if let Some(name) = &self.server {
            let Some(mut config) = db.server_by_name(name)? else {
                bail!("no saved server named {name:?} (see --list-servers)");
            };
            if let Some(nick) = &self.nick {
                config.nickname = nick.clone();
            }
            return Ok(config);
        }

        let Some(host) = &self.host else {
            bail!("either --server or --host is required");
        };
        let Some(nick) = &self.nick else {
            bail!("--nick is required with --host");
        };
        let config = ServerConfig {
            id: None,
            name: self.name.clone().unwrap_or_else(|| host.clone()),
            hostname: host.clone(),
            port: self
                .port
                .unwrap_or(if self.tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT }),
            tls: self.tls,
            nickname: nick.clone(),
            alt_nickname: self.alt_nick.clone(),
            username: self.user.clone().unwrap_or_else(|| nick.clone()),
            realname: self.realname.clone(),
            auto_join_channels: self.join.clone(),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sealirc").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn ad_hoc_record_from_flags() {
        let db = Db::open_memory().unwrap();
        let config = cli(&["--host", "irc.example.net", "--tls", "--nick", "ann", "--join", "rust"])
            .server_config(&db)
            .unwrap();
        assert_eq!(config.name, "irc.example.net");
        assert_eq!(config.port, DEFAULT_TLS_PORT);
        assert_eq!(config.username, "ann");
        assert_eq!(config.auto_join(), vec!["#rust"]);
    }

    #[test]
    fn saved_record_by_name() {
        let db = Db::open_memory().unwrap();
        let saved = ServerConfig {
            name: "Libera".into(),
            hostname: "irc.libera.chat".into(),
            ..Default::default()
        };
        db.add_server(&saved).unwrap();
        let config = cli(&["--server", "Libera", "--nick", "ann"]).server_config(&db).unwrap();
        assert_eq!(config.hostname, "irc.libera.chat");
        assert_eq!(config.nickname, "ann");

        assert!(cli(&["--server", "Nope"]).server_config(&db).is_err());
    }

    #[test]
    fn host_requires_nick() {
        let db = Db::open_memory().unwrap();
        assert!(cli(&["--host", "irc.example.net"]).server_config(&db).is_err());
        assert!(Cli::try_parse_from(["sealirc", "--server", "a", "--host", "b"]).is_err());
    }
}
