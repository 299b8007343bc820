use std::collections::BTreeSet;

use crate::Item;

/// A bounded group of unique facts submitted to extraction together.
pub type Chunk = Vec<String>;

pub fn derive_fact(item: &Item) -> String {
    format!("{} | {}", item.author, item.content)
}

pub fn dedup_facts<I>(facts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    facts.into_iter().collect()
}

/// Slices facts in iteration order into consecutive chunks of at most `chunk_size`.
pub fn chunk_facts(facts: &BTreeSet<String>, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let ordered = facts.iter().cloned().collect::<Vec<_>>();
    ordered
        .chunks(chunk_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Maps a page to its facts, removes exact duplicates and chunks the result.
pub fn reduce(items: &[Item], chunk_size: usize) -> Vec<Chunk> {
    chunk_facts(&dedup_facts(items.iter().map(derive_fact)), chunk_size)
}
