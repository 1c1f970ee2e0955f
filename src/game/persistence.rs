//! Persistence port
//!
//! Economy, rank and matchmaking-eligibility side effects of battle events
//! go through this boundary. The core calls it synchronously and tolerates
//! failure: a broken store must never corrupt in-memory battle state.

use hashbrown::HashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// Durable per-player record consumed by the battle core
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub username: String,
    /// Rolling desertion streak, gates matchmaking eligibility
    pub deserted_battles: u32,
    /// Battles that must be finished cleanly before the streak clears
    pub need_good_battles: u32,
    pub battles_played: u64,
    pub experience: u64,
}

impl PlayerRecord {
    pub fn new(username: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            deserted_battles: 0,
            need_good_battles: 0,
            battles_played: 0,
            experience: 0,
        }
    }
}

/// One battle's worth of statistics for a player
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsRow {
    pub kills: u32,
    pub deaths: u32,
    pub score: u32,
    pub bonuses_taken: u32,
}

/// External player persistence capability
pub trait PlayerStore: Send + Sync {
    /// Load a record by username, creating a fresh one on first sight
    fn load_or_create(&self, username: &str) -> anyhow::Result<PlayerRecord>;

    fn save(&self, record: &PlayerRecord) -> anyhow::Result<()>;

    /// Accumulate a battle's statistics onto a player's running totals
    fn upsert_statistics(&self, player: Uuid, row: &StatisticsRow) -> anyhow::Result<()>;
}

/// In-memory implementation used for tests and default runs
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PlayerRecord>>,
    statistics: RwLock<HashMap<Uuid, StatisticsRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statistics(&self, player: Uuid) -> Option<StatisticsRow> {
        self.statistics.read().get(&player).copied()
    }
}

impl PlayerStore for MemoryStore {
    fn load_or_create(&self, username: &str) -> anyhow::Result<PlayerRecord> {
        let mut records = self.records.write();
        Ok(records
            .entry(username.to_string())
            .or_insert_with(|| PlayerRecord::new(username))
            .clone())
    }

    fn save(&self, record: &PlayerRecord) -> anyhow::Result<()> {
        self.records
            .write()
            .insert(record.username.clone(), record.clone());
        Ok(())
    }

    fn upsert_statistics(&self, player: Uuid, row: &StatisticsRow) -> anyhow::Result<()> {
        let mut statistics = self.statistics.write();
        let totals = statistics.entry(player).or_default();
        totals.kills += row.kills;
        totals.deaths += row.deaths;
        totals.score += row.score;
        totals.bonuses_taken += row.bonuses_taken;
        Ok(())
    }
}
