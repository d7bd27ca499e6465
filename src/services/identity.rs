use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::{
    services::config_store::{ConfigError, ConfigStore},
    state::{
        event::{GameEvent, GameEventKind},
        snapshot::{AccountBinding, ConfigSnapshot, GroupBinding, PlayerRecord, PlayerTable},
    },
};

/// Failures of identity mutations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Binding requires the player to have joined a server at least once.
    #[error("player `{0}` not found")]
    PlayerNotFound(String),
    /// A join event without a unique id or name cannot anchor a record.
    #[error("join event from `{server}` lacks a player id or name")]
    IncompleteJoin {
        /// Server that sent the event.
        server: String,
    },
    /// The player shard could not be queued.
    #[error("failed to persist player data")]
    Persist(#[source] ConfigError),
}

/// Result of processing a join event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First sighting of this unique id on the server.
    Created,
    /// Name or operator flag changed.
    Updated,
    /// Nothing changed; nothing was written.
    Unchanged,
}

/// Result of a successful bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// Server the bound player record belongs to.
    pub server: String,
    /// `true` when an existing group binding had its display name replaced.
    pub replaced: bool,
}

#[derive(Debug)]
struct IdentityEntry {
    server: String,
    record: PlayerRecord,
}

/// Immutable lookup tables derived from a [`PlayerTable`].
///
/// A book is never mutated; mutations build a fresh one, so a reader holding
/// a book always sees a consistent index.
#[derive(Debug, Default)]
pub struct IdentityBook {
    entries: Vec<IdentityEntry>,
    by_name: HashMap<String, Vec<usize>>,
    by_account: HashMap<String, Vec<usize>>,
    by_nick: HashMap<String, Vec<(String, usize)>>,
}

impl IdentityBook {
    /// Index every record of `players`.
    pub fn build(players: &PlayerTable) -> Self {
        let mut book = Self::default();
        for (server, records) in players {
            for record in records {
                if record.uuid.is_empty() {
                    continue;
                }
                let index = book.entries.len();
                book.by_name
                    .entry(record.name.clone())
                    .or_default()
                    .push(index);
                for account in &record.accounts {
                    book.by_account
                        .entry(account.account.clone())
                        .or_default()
                        .push(index);
                    for binding in &account.groups {
                        if binding.display_name.is_empty() {
                            continue;
                        }
                        book.by_nick
                            .entry(binding.display_name.clone())
                            .or_default()
                            .push((binding.group_id.clone(), index));
                    }
                }
                book.entries.push(IdentityEntry {
                    server: server.clone(),
                    record: record.clone(),
                });
            }
        }
        book
    }

    /// Number of indexed player records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no player is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// In-game name bound to a chat account, optionally restricted to one server.
    pub fn resolve_by_account(&self, account: &str, server: Option<&str>) -> Option<&str> {
        self.by_account
            .get(account)?
            .iter()
            .map(|&index| &self.entries[index])
            .find(|entry| server.is_none_or(|server| entry.server == server))
            .map(|entry| entry.record.name.as_str())
    }

    /// In-game name behind a group display name, optionally restricted to one group.
    pub fn resolve_by_group_nick(&self, nick: &str, group_id: Option<&str>) -> Option<&str> {
        self.by_nick
            .get(nick)?
            .iter()
            .find(|(group, _)| group_id.is_none_or(|wanted| group == wanted))
            .map(|&(_, index)| self.entries[index].record.name.as_str())
    }

    /// Display name of a player in `group_id`, or their first binding when no group is given.
    ///
    /// With a `server` hint the player record from that server is used when one exists.
    pub fn resolve_group_nick(
        &self,
        name: &str,
        group_id: Option<&str>,
        server: Option<&str>,
    ) -> Option<&str> {
        let entry = self
            .first_by_name(name, server)
            .or_else(|| self.first_by_name(name, None))?;
        let mut bindings = entry
            .record
            .accounts
            .iter()
            .flat_map(|account| account.groups.iter());
        let binding = match group_id {
            Some(group_id) => bindings.find(|binding| binding.group_id == group_id),
            None => bindings.next(),
        };
        binding.map(|binding| binding.display_name.as_str())
    }

    /// Whether the named player is an operator, optionally on one server.
    pub fn is_operator(&self, name: &str, server: Option<&str>) -> bool {
        self.first_by_name(name, server)
            .is_some_and(|entry| entry.record.operator)
    }

    fn first_by_name(&self, name: &str, server: Option<&str>) -> Option<&IdentityEntry> {
        self.by_name
            .get(name)?
            .iter()
            .map(|&index| &self.entries[index])
            .find(|entry| server.is_none_or(|server| entry.server == server))
    }
}

/// Multi-key player identity index backed by the player-data shard.
pub struct IdentityIndex {
    config: Arc<ConfigStore>,
    players: Mutex<PlayerTable>,
    book: watch::Sender<Arc<IdentityBook>>,
}

impl IdentityIndex {
    /// Build the index from the player data of the current snapshot.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let players = config.current().players.clone();
        let (book, _rx) = watch::channel(Arc::new(IdentityBook::build(&players)));
        Self {
            config,
            players: Mutex::new(players),
            book,
        }
    }

    /// Current lookup tables.
    pub fn book(&self) -> Arc<IdentityBook> {
        self.book.borrow().clone()
    }

    /// Owned form of [`IdentityBook::resolve_by_account`].
    pub fn resolve_by_account(&self, account: &str, server: Option<&str>) -> Option<String> {
        self.book()
            .resolve_by_account(account, server)
            .map(str::to_owned)
    }

    /// Owned form of [`IdentityBook::resolve_by_group_nick`].
    pub fn resolve_by_group_nick(&self, nick: &str, group_id: Option<&str>) -> Option<String> {
        self.book()
            .resolve_by_group_nick(nick, group_id)
            .map(str::to_owned)
    }

    /// Owned form of [`IdentityBook::resolve_group_nick`].
    pub fn resolve_group_nick(
        &self,
        name: &str,
        group_id: Option<&str>,
        server: Option<&str>,
    ) -> Option<String> {
        self.book()
            .resolve_group_nick(name, group_id, server)
            .map(str::to_owned)
    }

    /// See [`IdentityBook::is_operator`].
    pub fn is_operator(&self, name: &str, server: Option<&str>) -> bool {
        self.book().is_operator(name, server)
    }

    /// Install a reloaded snapshot, adopting its player shard.
    ///
    /// `revision` is the config store's player revision taken before the shard
    /// was read. When a join or bind committed since then, the in-memory table
    /// is newer than the file and replaces the snapshot's players instead.
    pub async fn install_reloaded(
        &self,
        mut snapshot: ConfigSnapshot,
        revision: u64,
    ) -> Arc<ConfigSnapshot> {
        let mut guard = self.players.lock().await;
        if self.config.players_revision() == revision {
            if *guard != snapshot.players {
                *guard = snapshot.players.clone();
                self.book.send_replace(Arc::new(IdentityBook::build(&guard)));
                info!(players = self.book.borrow().len(), "identity index rebuilt");
            }
        } else {
            warn!("player data changed during reload; keeping in-memory records");
            snapshot.players = guard.clone();
        }

        let snapshot = Arc::new(snapshot);
        self.config.install(snapshot.clone());
        snapshot
    }

    /// Record a join: create the player or sync their name and operator flag.
    pub async fn on_join(&self, event: &GameEvent) -> Result<JoinOutcome, IdentityError> {
        if event.kind != GameEventKind::Join {
            return Ok(JoinOutcome::Unchanged);
        }
        let Some(uuid) = event.player.uuid.as_deref().filter(|uuid| !uuid.is_empty()) else {
            return Err(IdentityError::IncompleteJoin {
                server: event.server.clone(),
            });
        };
        if event.player.nickname.is_empty() || event.server.is_empty() {
            return Err(IdentityError::IncompleteJoin {
                server: event.server.clone(),
            });
        }

        let mut players = self.players.lock().await;
        let records = players.entry(event.server.clone()).or_default();

        let outcome = match records.iter_mut().find(|record| record.uuid == uuid) {
            Some(record) => {
                let mut changed = false;
                if record.name != event.player.nickname {
                    info!(from = %record.name, to = %event.player.nickname, "player renamed");
                    record.name = event.player.nickname.clone();
                    changed = true;
                }
                if record.operator != event.player.is_op {
                    info!(player = %record.name, operator = event.player.is_op, "operator flag changed");
                    record.operator = event.player.is_op;
                    changed = true;
                }
                if changed {
                    record.updated_at = now_rfc3339();
                    JoinOutcome::Updated
                } else {
                    JoinOutcome::Unchanged
                }
            }
            None => {
                info!(
                    player = %event.player.nickname,
                    uuid,
                    operator = event.player.is_op,
                    "new player recorded"
                );
                records.push(PlayerRecord {
                    uuid: uuid.to_string(),
                    name: event.player.nickname.clone(),
                    operator: event.player.is_op,
                    accounts: Vec::new(),
                    updated_at: now_rfc3339(),
                });
                JoinOutcome::Created
            }
        };

        if outcome != JoinOutcome::Unchanged {
            self.commit(&players).await?;
        }
        Ok(outcome)
    }

    /// Attach a group display name to `name` for the caller's chat account.
    pub async fn bind(
        &self,
        name: &str,
        account: &str,
        group_id: &str,
        display_name: &str,
    ) -> Result<BindOutcome, IdentityError> {
        let mut players = self.players.lock().await;

        let Some((server, record)) = players.iter_mut().find_map(|(server, records)| {
            records
                .iter_mut()
                .find(|record| record.name == name)
                .map(|record| (server.clone(), record))
        }) else {
            warn!(player = name, "bind rejected: player not found");
            return Err(IdentityError::PlayerNotFound(name.to_string()));
        };

        let position = match record
            .accounts
            .iter()
            .position(|binding| binding.account == account)
        {
            Some(position) => position,
            None => {
                record.accounts.push(AccountBinding {
                    account: account.to_string(),
                    groups: Vec::new(),
                });
                record.accounts.len() - 1
            }
        };
        let account_binding = &mut record.accounts[position];

        let replaced = match account_binding
            .groups
            .iter_mut()
            .find(|binding| binding.group_id == group_id)
        {
            Some(binding) => {
                binding.display_name = display_name.to_string();
                true
            }
            None => {
                account_binding.groups.push(GroupBinding {
                    group_id: group_id.to_string(),
                    display_name: display_name.to_string(),
                });
                false
            }
        };
        record.updated_at = now_rfc3339();

        info!(player = name, account, group = group_id, display_name, replaced, "group name bound");
        self.commit(&players).await?;
        Ok(BindOutcome { server, replaced })
    }

    /// Rebuild the book and queue the player shard while the table lock is held.
    async fn commit(&self, players: &PlayerTable) -> Result<(), IdentityError> {
        self.book
            .send_replace(Arc::new(IdentityBook::build(players)));
        self.config
            .store_players(players.clone())
            .await
            .map_err(IdentityError::Persist)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
