/// Shared formatting helpers (compact durations, reversal reasons).
pub mod formatting;
/// Pure parser helpers.
pub mod parse;
/// Shared time helpers.
pub mod time;
