//! Customer reference numbers: `<Initials>-<RegionCode>-<Sequence>`.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::debug;
use ts_rs::TS;

use super::{
    backend::{BackendError, CustomerBackend},
    record::{AuditableRecord, fields},
};

/// Digits in a creation-time sequence.
pub const SEQUENCE_WIDTH: usize = 7;
/// Digits in a batch auto-generated sequence.
pub const BATCH_SEQUENCE_WIDTH: usize = 10;

const PLACEHOLDER: &str = "X";
const RANDOM_UPPER_BOUND: u32 = 10_000_000;
const SEQUENCE_UPPER_BOUND: i64 = 10_000_000;

#[derive(Debug, Error)]
pub enum ReferenceNumberError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("sequence exhausted for prefix {0}")]
    SequenceExhausted(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReferenceStrategy {
    /// Next number after the highest stored suffix for the same prefix.
    #[default]
    Sequential,
    /// Random suffix, no uniqueness check.
    Randomized,
}

/// Some characters uppercase to several (`ß` to `SS`); only the first is kept.
fn upper_initial(c: char) -> String {
    c.to_uppercase().next().unwrap_or(c).to_string()
}

fn first_char_upper(word: Option<&str>) -> String {
    word.and_then(|w| w.chars().next())
        .map(upper_initial)
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn last_char_upper(word: Option<&str>) -> String {
    word.and_then(|w| w.chars().last())
        .map(upper_initial)
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// First character of the first word and last character of the last word.
/// A single word contributes both; an empty name gives `"XX"`.
pub fn initials(company_name: &str) -> String {
    let words: Vec<&str> = company_name.split_whitespace().collect();
    if words.is_empty() {
        return format!("{PLACEHOLDER}{PLACEHOLDER}");
    }
    format!(
        "{}{}",
        first_char_upper(words.first().copied()),
        last_char_upper(words.last().copied())
    )
}

/// Uppercased region with whitespace removed, `"X"` when blank.
pub fn region_code(region: &str) -> String {
    let code: String = region
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if code.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        code
    }
}

/// `"<Initials>-<RegionCode>-"`
pub fn reference_prefix(company_name: &str, region: &str) -> String {
    format!("{}-{}-", initials(company_name), region_code(region))
}

pub fn randomized_reference<G: Rng>(company_name: &str, region: &str, rng: &mut G) -> String {
    let suffix = rng.gen_range(0..RANDOM_UPPER_BOUND);
    format!(
        "{}{:0width$}",
        reference_prefix(company_name, region),
        suffix,
        width = SEQUENCE_WIDTH
    )
}

/// Reads the current maximum and adds one. Two concurrent callers for the same
/// prefix can observe the same maximum; nothing here serializes them.
pub async fn sequential_reference<B: CustomerBackend + ?Sized>(
    backend: &B,
    company_name: &str,
    region: &str,
) -> Result<String, ReferenceNumberError> {
    let prefix = reference_prefix(company_name, region);
    let next = backend.max_reference_suffix(&prefix).await? + 1;
    if next >= SEQUENCE_UPPER_BOUND {
        return Err(ReferenceNumberError::SequenceExhausted(prefix));
    }
    debug!(prefix = %prefix, next, "Allocated sequential reference");
    Ok(format!("{prefix}{next:0width$}", width = SEQUENCE_WIDTH))
}

/// Numbers the given records 1..=N in the order supplied, each with its own prefix.
/// Only the listed records are considered; references held by other records are not consulted.
pub fn batch_references<R: AuditableRecord>(records: &[&R]) -> Vec<(R::Id, String)> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let prefix = reference_prefix(
                record.field(fields::COMPANY_NAME).unwrap_or_default(),
                record.field(fields::REGION).unwrap_or_default(),
            );
            (
                record.record_id(),
                format!("{prefix}{:0width$}", i + 1, width = BATCH_SEQUENCE_WIDTH),
            )
        })
        .collect()
}

/// Creation-time generator using the configured strategy.
#[derive(Clone)]
pub struct ReferenceNumberGenerator {
    backend: Arc<dyn CustomerBackend>,
    strategy: ReferenceStrategy,
}

impl ReferenceNumberGenerator {
    pub fn new(backend: Arc<dyn CustomerBackend>, strategy: ReferenceStrategy) -> Self {
        Self { backend, strategy }
    }

    pub fn strategy(&self) -> ReferenceStrategy {
        self.strategy
    }

    pub async fn generate(
        &self,
        company_name: &str,
        region: &str,
    ) -> Result<String, ReferenceNumberError> {
        match self.strategy {
            ReferenceStrategy::Sequential => {
                sequential_reference(self.backend.as_ref(), company_name, region).await
            }
            ReferenceStrategy::Randomized => Ok(randomized_reference(
                company_name,
                region,
                &mut rand::thread_rng(),
            )),
        }
    }
}
