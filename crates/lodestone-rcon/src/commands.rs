//! Game console commands and parsers for their output.

use std::sync::LazyLock;

use regex::Regex;

use crate::client::RconSession;
use crate::error::{RconError, Result};

/// Lists online players.
pub const LIST: &str = "list";

static COLOR_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("§.").expect("color code pattern is valid"));

static PLAYER_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"There are (\d+)(?: of a max of |/)(\d+) players online:?(.*)")
        .expect("player list pattern is valid")
});

/// Parsed output of the `list` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerList {
    /// Players currently online.
    pub online: u32,
    /// Server capacity.
    pub max: u32,
    /// Names of online players, when the server includes them.
    pub players: Vec<String>,
}

/// Parse the output of the `list` command.
///
/// Accepts both `There are 1 of a max of 20 players online: Steve` and the
/// older `There are 1/20 players online:` form. Formatting codes are ignored.
///
/// # Errors
///
/// Returns `RconError::Protocol` if the text is not a player list.
pub fn parse_player_list(output: &str) -> Result<PlayerList> {
    let plain = COLOR_CODE.replace_all(output, "");
    let caps = PLAYER_LIST
        .captures(&plain)
        .ok_or_else(|| RconError::Protocol(format!("unrecognized player list: {output:?}")))?;

    let number = |i: usize| -> Result<u32> {
        caps[i]
            .parse()
            .map_err(|_| RconError::Protocol(format!("bad player count in {output:?}")))
    };

    let players = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(PlayerList {
        online: number(1)?,
        max: number(2)?,
        players,
    })
}

/// Command adding a player to the whitelist.
#[must_use]
pub fn whitelist_add(player: &str) -> String {
    format!("whitelist add {player}")
}

/// Command removing a player from the whitelist.
#[must_use]
pub fn whitelist_remove(player: &str) -> String {
    format!("whitelist remove {player}")
}

/// Run `list` on `session` and parse the result.
///
/// # Errors
///
/// Returns any error from the command or the parser.
pub async fn query_player_list(session: &mut dyn RconSession) -> Result<PlayerList> {
    let output = session.execute(LIST).await?;
    parse_player_list(&output)
}
