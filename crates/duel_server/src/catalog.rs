//! Card catalogue and global supply generation.
//!
//! The catalogue is a build-time constant. The initial global supply is
//! produced by replicating each entry a rarity-dependent number of times
//! (weaker cards are more common), padding to a fixed total and shuffling
//! once with a seeded PRNG so two instances racing at boot generate the
//! same supply for the same seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::types::Card;

/// Exact size of the freshly generated global supply.
pub const SUPPLY_SIZE: usize = 90_000;

const BASE_CARDS: &[(&str, u8)] = &[
    ("Camponês Armado", 1),
    ("Batedor Anão", 1),
    ("Arqueiro Elfo", 1),
    ("Ghoul", 1),
    ("Nekker", 1),
    ("Infantaria Leve", 2),
    ("Guerrilheiro Scoia'tael", 2),
    ("Balista", 2),
    ("Lanceiro de Kaedwen", 3),
    ("Caçador de Recompensa", 3),
    ("Grifo", 3),
    ("Cavaleiro de Aedirn", 4),
    ("Elemental da Terra", 4),
    ("Guerreiro Anão", 5),
    ("Wyvern", 5),
    ("Gigante de Gelo", 6),
    ("Leshen", 6),
    ("Grão-Mestre Bruxo", 7),
    ("Draug", 7),
    ("Ifrit", 8),
    ("Cavaleiro da Morte", 8),
    ("Behemoth", 9),
    ("Dragão Menor", 10),
    ("Comandante Veterano", 10),
    ("Eredin Bréacc Glas", 11),
    ("Imlerith", 11),
    ("Vernon Roche", 12),
    ("Iorveth", 12),
    ("Philippa Eilhart", 13),
    ("Triss Merigold", 13),
    ("Yennefer de Vengerberg", 14),
    ("Rei Foltest", 14),
    ("Geralt de Rívia", 15),
];

/// The full card catalogue, in declaration order.
pub fn catalogue() -> Vec<Card> {
    BASE_CARDS
        .iter()
        .map(|(name, strength)| Card::new(*name, *strength))
        .collect()
}

/// How many copies of a card enter the supply, by strength band.
fn copy_count(strength: u8) -> usize {
    match strength {
        1..=3 => 4000,
        4..=6 => 3000,
        7..=10 => 2000,
        _ => 10,
    }
}

/// Builds the shuffled global supply of exactly [`SUPPLY_SIZE`] cards.
pub fn build_supply(seed: u64) -> Vec<Card> {
    let cards = catalogue();
    let mut supply = Vec::with_capacity(SUPPLY_SIZE);
    for card in &cards {
        for _ in 0..copy_count(card.strength) {
            supply.push(card.clone());
        }
    }

    // Pad with the first catalogue entry, then clamp to the exact size.
    while supply.len() < SUPPLY_SIZE {
        supply.push(cards[0].clone());
    }
    supply.truncate(SUPPLY_SIZE);

    let mut rng = StdRng::seed_from_u64(seed);
    supply.shuffle(&mut rng);
    supply
}
