//! Global card-pack stock.
//!
//! The supply is one shared list in the coordination store; issuance removes
//! from the head through the atomic batch script, so no card is ever seen by
//! two packs and no pack is ever partial.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::build_supply;
use crate::error::CoreError;
use crate::store::{CoordinationStore, STOCK_KEY};
use crate::types::Card;

/// Number of cards in one pack.
pub const PACK_SIZE: usize = 3;

const INIT_CHUNK: usize = 1000;

/// Outcome of a pack issuance.
#[derive(Debug)]
pub enum PackIssue {
    Pack(Vec<Card>),
    /// Fewer than [`PACK_SIZE`] cards remain; nothing was consumed.
    Insufficient,
}

/// Issues fixed-size packs from the global supply.
pub struct StockService {
    store: Arc<dyn CoordinationStore>,
}

impl StockService {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Creates the global supply if it does not exist yet.
    ///
    /// Idempotent: a non-empty supply is left untouched, so instances racing
    /// at boot settle on whichever finished generating first. Returns the
    /// number of cards in the supply afterwards.
    pub async fn initialise(&self, seed: u64) -> Result<u64, CoreError> {
        let existing = self.store.list_len(STOCK_KEY).await?;
        if existing > 0 {
            info!(
                cards = existing,
                packs = existing / PACK_SIZE as u64,
                "card stock already present in the store"
            );
            return Ok(existing);
        }

        let supply = build_supply(seed);
        let encoded = supply
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CoreError::Invariant(format!("failed to encode supply: {err}")))?;

        for chunk in encoded.chunks(INIT_CHUNK) {
            self.store.list_push_right(STOCK_KEY, chunk).await?;
        }

        let total = encoded.len() as u64;
        info!(cards = total, "card stock initialised in the store");
        Ok(total)
    }

    /// Takes one pack off the head of the supply, atomically.
    ///
    /// Returns [`PackIssue::Insufficient`] when the supply holds fewer than
    /// [`PACK_SIZE`] cards; in that case nothing is consumed. The per-player
    /// cap on voluntary packs is enforced by the caller.
    pub async fn issue_pack(&self, player_name: &str) -> Result<PackIssue, CoreError> {
        let raw = self.store.take_batch(STOCK_KEY, PACK_SIZE).await?;
        if raw.is_empty() {
            warn!(player = player_name, "pack requested but stock insufficient");
            return Ok(PackIssue::Insufficient);
        }

        let cards = raw
            .iter()
            .map(|item| serde_json::from_str::<Card>(item))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CoreError::Invariant(format!("malformed card in stock: {err}")))?;
        Ok(PackIssue::Pack(cards))
    }

    /// Whole packs still available, as shown to players.
    pub async fn remaining_packs(&self) -> Result<u64, CoreError> {
        Ok(self.store.list_len(STOCK_KEY).await? / PACK_SIZE as u64)
    }
}
