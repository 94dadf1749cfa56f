//! Rarest-first piece selection, with the conventional exception that the
//! very first piece a node ever downloads is chosen at random — with
//! nothing on disk yet, "rarest" carries no information and a random pick
//! avoids every new node racing for the same globally-rarest piece.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::domain::{Bitfield, Storage};

/// Count how many of `remote_bitfields` advertise each piece index.
pub fn count_availability(num_pieces: usize, remote_bitfields: &[&Bitfield]) -> Vec<usize> {
    let mut counts = vec![0usize; num_pieces];
    for bitfield in remote_bitfields {
        for (i, count) in counts.iter_mut().enumerate() {
            if bitfield.get(i) {
                *count += 1;
            }
        }
    }
    counts
}

/// Choose the next piece to download from `remote`, a bitfield of pieces one
/// specific peer has. Only pieces `remote` has and we lack are candidates.
///
/// `availability` is the swarm-wide rarity count from [`count_availability`];
/// ties are broken uniformly at random. If `storage` has not completed (or
/// does not currently hold in-progress state for) any piece yet, the choice
/// is uniformly random among candidates instead of rarest-first.
pub fn select_piece(storage: &Storage, remote: &Bitfield, availability: &[usize], rng: &mut impl Rng) -> Option<usize> {
    let candidates: Vec<usize> = (0..storage.num_pieces())
        .filter(|&i| remote.get(i) && !storage.has_piece(i))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let nothing_completed_yet = (0..storage.num_pieces()).all(|i| !storage.has_piece(i));
    if nothing_completed_yet {
        return candidates.choose(rng).copied();
    }

    let min_count = candidates.iter().map(|&i| availability.get(i).copied().unwrap_or(0)).min()?;
    let rarest: Vec<usize> = candidates
        .into_iter()
        .filter(|&i| availability.get(i).copied().unwrap_or(0) == min_count)
        .collect();
    rarest.choose(rng).copied()
}

/// Within a piece, the next block index (0-based, `block_size`-sized chunks)
/// not yet requested or received.
pub fn select_block(storage: &Storage, piece_index: usize, num_blocks: usize) -> Option<usize> {
    (0..num_blocks).find(|&b| {
        !matches!(
            storage.block_status(piece_index, b),
            Some(crate::domain::BlockStatus::Requested) | Some(crate::domain::BlockStatus::Received)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn rarest_piece_is_preferred_over_common_ones() {
        let mut storage = Storage::new(16384, vec![[0; 20]; 3]);
        storage.initialize_piece(0, 1).unwrap();
        storage.mark_block_received(0, 0, vec![0xAB; 16384]).unwrap();
        let _ = storage.verify_and_commit(0);
        // piece 0 no longer needed; only 1 and 2 are candidates below.

        let mut remote = Bitfield::new(3);
        remote.set(1);
        remote.set(2);

        // piece 1 is common (held by two peers), piece 2 is rare (held by
        // only this peer) — availability counts reflect that.
        let availability = vec![0, 2, 1];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let chosen = select_piece(&storage, &remote, &availability, &mut rng);
        assert_eq!(chosen, Some(2));
    }

    #[test]
    fn first_piece_is_chosen_randomly_among_candidates() {
        let storage = Storage::new(16384, vec![[0; 20]; 4]);
        let mut remote = Bitfield::new(4);
        remote.set(0);
        remote.set(3);
        let availability = vec![1, 0, 0, 1];
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let chosen = select_piece(&storage, &remote, &availability, &mut rng);
        assert!(matches!(chosen, Some(0) | Some(3)));
    }

    #[test]
    fn no_candidates_when_peer_has_nothing_we_lack() {
        let storage = Storage::new(16384, vec![[0; 20]; 2]);
        let remote = Bitfield::new(2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(select_piece(&storage, &remote, &[0, 0], &mut rng), None);
    }
}
