use rand::Rng;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

pub const RANDOM_MIN: u32 = 1;
pub const RANDOM_MAX: u32 = 100;

pub const LEADERBOARD_DEFAULT_LIMIT: usize = 50;
pub const LEADERBOARD_MAX_LIMIT: usize = 100;

/// Prizes are kept as whatever JSON the client stored.
pub type Prize = Value;

/// String key a user's record is stored under.
///
/// Integer ids render in decimal, so `UserId::from(42)` and
/// `UserId::from("42")` address the same record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<&String> for UserId {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

macro_rules! user_id_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for UserId {
                fn from(id: $ty) -> Self {
                    Self(id.to_string())
                }
            }
        )*
    };
}

user_id_from_int!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserRecord {
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub prizes: Vec<Prize>,
}

impl UserRecord {
    pub fn new(balance: i64, prizes: Vec<Prize>) -> Self {
        Self { balance, prizes }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed user document: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode user document: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Every user's record, as persisted in one JSON object.
///
/// Users keep the order they have in the file; new users are appended.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(try_from = "Map<String, Value>")]
pub struct Document {
    users: Vec<(String, UserRecord)>,
}

impl TryFrom<Map<String, Value>> for Document {
    type Error = serde_json::Error;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let users = map
            .into_iter()
            .map(|(id, value)| serde_json::from_value(value).map(|record| (id, record)))
            .collect::<Result<_, serde_json::Error>>()?;
        Ok(Self { users })
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.users.iter().map(|(id, record)| (id, record)))
    }
}

impl Document {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DocumentError> {
        serde_json::from_slice(bytes).map_err(DocumentError::Decode)
    }

    /// Two-space indented UTF-8; non-ASCII text is written as-is.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, DocumentError> {
        serde_json::to_vec_pretty(self).map_err(DocumentError::Encode)
    }

    fn position(&self, user_id: &UserId) -> Option<usize> {
        self.users.iter().position(|(id, _)| id == user_id.as_str())
    }

    /// Unknown users get the default record.
    pub fn get(&self, user_id: &UserId) -> UserRecord {
        self.position(user_id)
            .map(|i| self.users[i].1.clone())
            .unwrap_or_default()
    }

    pub fn set(&mut self, user_id: UserId, record: UserRecord) -> Option<UserRecord> {
        match self.position(&user_id) {
            Some(i) => Some(std::mem::replace(&mut self.users[i].1, record)),
            None => {
                self.users.push((user_id.0, record));
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Highest first. Ties keep file order; `limit` is capped at
    /// [`LEADERBOARD_MAX_LIMIT`].
    pub fn leaderboard(&self, order: RankBy, limit: usize) -> Vec<LeaderboardEntry> {
        let mut ranked: Vec<_> = self.users.iter().collect();
        match order {
            RankBy::Balance => ranked.sort_by_key(|(_, record)| Reverse(record.balance)),
            RankBy::Prizes => ranked.sort_by_key(|(_, record)| Reverse(record.prizes.len())),
        }

        ranked
            .into_iter()
            .take(limit.min(LEADERBOARD_MAX_LIMIT))
            .enumerate()
            .map(|(i, (id, record))| LeaderboardEntry {
                rank: i + 1,
                user_id: id.clone(),
                balance: record.balance,
                prize_count: record.prizes.len(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    #[default]
    Balance,
    Prizes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub balance: i64,
    pub prize_count: usize,
}

pub fn random_range() -> RangeInclusive<u32> {
    RANDOM_MIN..=RANDOM_MAX
}

pub fn draw_number<R: Rng>(rng: &mut R) -> u32 {
    rng.gen_range(random_range())
}
