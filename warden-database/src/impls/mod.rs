pub mod automod;
pub mod cases;
pub mod intents;
pub mod settings;
pub mod tasks;

use anyhow::Context as _;

/// Snowflakes and unix timestamps are stored as signed `BIGINT`.
pub(crate) fn to_db(value: u64, field: &'static str) -> anyhow::Result<i64> {
    i64::try_from(value).with_context(|| format!("{field} out of i64 range"))
}

pub(crate) fn from_db(value: i64, field: &'static str) -> anyhow::Result<u64> {
    u64::try_from(value).with_context(|| format!("{field} row out of u64 range"))
}

pub(crate) fn from_db_opt(value: Option<i64>, field: &'static str) -> anyhow::Result<Option<u64>> {
    value.map(|value| from_db(value, field)).transpose()
}

pub(crate) fn to_db_all(values: &[u64], field: &'static str) -> anyhow::Result<Vec<i64>> {
    values.iter().map(|value| to_db(*value, field)).collect()
}

pub(crate) fn from_db_all(values: Vec<i64>, field: &'static str) -> anyhow::Result<Vec<u64>> {
    values.into_iter().map(|value| from_db(value, field)).collect()
}
