//! # Vote Ledger
//!
//! Bounded window of per-height vote tallies and the finality heights
//! derived from them.
//!
//! Each appended header from generator `G` is read as:
//! - a prevote from `G` for every height in `(max_height_prevoted, height]`
//!   above the ledger's current prevoted height,
//! - precommits from `G` for the heights chosen by [`PrecommitRule`], each
//!   gated by `G`'s largest precommitted height.
//!
//! Weights and thresholds at a height come from the parameters effective at
//! that height. `max_height_prevoted` and `max_height_precommitted` only scan
//! forward from their current values; the finalized height never moves down.
//!
//! Appending is two-phase. Every parameters lookup happens first, so a
//! missing record rejects the header before any tally, height or registry
//! entry changes.
//!
//! Every append leaves an undo record: the votes it cast, the generator's
//! previous largest precommit, the heights before it, the entry it evicted
//! and any rotation it triggered. Reverting replays those records backwards,
//! so a reverted and re-applied chain tallies exactly like one that was
//! never reverted. Votes for heights at or below the finalized height stay
//! in place; re-applying the same header finds them already marked. The
//! published finalized height is kept apart from the tally heights and is
//! never lowered by a revert.

use crate::config::{BftConfig, PrecommitRule};
use crate::domain::equivocation::{contradiction_reason, HeaderClaims};
use crate::domain::parameters::BftParameters;
use crate::domain::parameters_store::ParametersSource;
use crate::domain::registry::{RotationUndo, ValidatorWeightRegistry};
use crate::domain::vote_info::{BftHeights, BlockBftInfo};
use crate::error::{BftError, BftResult};
use crate::metrics;
use shared_types::{short_hex, Address, BlockHeader};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters for every height in `[lowest, tip]` of one append.
struct ParamsSpan {
    lowest: u32,
    params: Vec<Arc<BftParameters>>,
}

impl ParamsSpan {
    fn at(&self, height: u32) -> Option<&BftParameters> {
        let offset = height.checked_sub(self.lowest)?;
        self.params.get(offset as usize).map(Arc::as_ref)
    }

    /// Position and weight of `address` in the set governing `height`.
    fn vote_of(&self, address: &Address, height: u32) -> Option<(usize, u64)> {
        let params = self.at(height)?;
        let index = params.index_of(address)?;
        Some((index, params.validators()[index].bft_weight))
    }
}

/// Prevoted and precommitted heights as derived from the window alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TallyHeights {
    prevoted: u32,
    precommitted: u32,
}

#[derive(Clone, Copy, Debug)]
struct CastVote {
    height: u32,
    index: usize,
    weight: u64,
}

/// Everything one append changed, enough to take it back.
#[derive(Clone, Debug)]
struct UndoRecord {
    height: u32,
    tally: TallyHeights,
    generator: Address,
    /// Generator's largest precommit before the append, if it was tracked
    largest_precommit: Option<u32>,
    prevotes: Vec<CastVote>,
    precommits: Vec<CastVote>,
    evicted: Option<BlockBftInfo>,
    rotation: Option<RotationUndo>,
}

/// Sliding window of vote tallies plus the published finality heights.
#[derive(Clone, Debug)]
pub struct VoteLedger {
    config: BftConfig,
    tip_height: u32,
    tally: TallyHeights,
    /// Published heights; the finalized height here never decreases
    heights: BftHeights,
    /// Ascending and contiguous in height
    window: VecDeque<BlockBftInfo>,
    /// One record per header in `(finalized, tip]`, ascending, ending at tip
    journal: VecDeque<UndoRecord>,
}

impl VoteLedger {
    /// Empty ledger with every height at `config.genesis_height`.
    pub fn new(config: BftConfig) -> Self {
        let genesis = config.genesis_height;
        let capacity = config.window_capacity();
        Self {
            config,
            tip_height: genesis,
            tally: TallyHeights {
                prevoted: genesis,
                precommitted: genesis,
            },
            heights: BftHeights::at(genesis),
            window: VecDeque::with_capacity(capacity),
            journal: VecDeque::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    /// Append the header at `tip + 1` and update the finality heights.
    pub fn add_block_header<P: ParametersSource>(
        &mut self,
        header: &BlockHeader,
        registry: &mut ValidatorWeightRegistry,
        params: &mut P,
    ) -> BftResult<BftHeights> {
        if let Err(e) = self.validate_header(header) {
            warn!("[qc-09] Rejected header {}: {}", header, e);
            return Err(e);
        }
        let validator_count = params.parameters_at(header.height)?.len();
        let info = BlockBftInfo::from_header(header, validator_count);
        let before = self.heights;
        let after = self.append(info, registry, params)?;

        if after.max_height_precommitted > before.max_height_precommitted {
            info!(
                height = header.height,
                max_height_prevoted = after.max_height_prevoted,
                "[qc-09] Finalized height advanced {} -> {}",
                before.max_height_precommitted,
                after.max_height_precommitted
            );
        }
        Ok(after)
    }

    fn validate_header(&self, header: &BlockHeader) -> BftResult<()> {
        let h = header.height;
        let expected = self
            .tip_height
            .checked_add(1)
            .ok_or_else(|| BftError::invalid_header(h, "ledger tip at maximum height"))?;
        if h != expected {
            return Err(BftError::invalid_header(
                h,
                format!("expected height {}", expected),
            ));
        }
        if header.max_height_prevoted > h {
            return Err(BftError::invalid_header(
                h,
                format!("max_height_prevoted {} above height", header.max_height_prevoted),
            ));
        }
        if header.max_height_generated > h {
            return Err(BftError::invalid_header(
                h,
                format!("max_height_generated {} above height", header.max_height_generated),
            ));
        }
        Ok(())
    }

    /// Append a fresh tally at `tip + 1`. Heights are not validated here.
    fn append<P: ParametersSource>(
        &mut self,
        info: BlockBftInfo,
        registry: &mut ValidatorWeightRegistry,
        params: &mut P,
    ) -> BftResult<BftHeights> {
        let h = info.height;
        let old = self.tally;
        let evict = self.window.len() >= self.config.window_capacity().max(1);
        let window_start = if evict {
            self.window.get(1)
        } else {
            self.window.front()
        }
        .map_or(h, |i| i.height);

        // Phase 1: all fallible reads
        let lowest = window_start.max(old.precommitted.saturating_add(1));
        let mut span = ParamsSpan {
            lowest,
            params: Vec::with_capacity((h - lowest) as usize + 1),
        };
        for x in lowest..=h {
            span.params.push(params.parameters_at(x)?);
        }

        // Phase 2: apply
        let generator = info.generator_address;
        let claimed_prevoted = info.max_height_prevoted;
        let claimed_generated = info.max_height_generated;

        let mut undo = UndoRecord {
            height: h,
            tally: old,
            generator,
            largest_precommit: registry.get(&generator).map(|v| v.largest_height_precommit),
            prevotes: Vec::new(),
            precommits: Vec::new(),
            evicted: None,
            rotation: None,
        };

        self.window.push_back(info);
        if evict {
            undo.evicted = self.window.pop_front();
        }
        self.tip_height = h;

        if claimed_generated < h {
            let prevote_from = claimed_prevoted
                .max(old.prevoted)
                .saturating_add(1)
                .max(window_start);
            for x in prevote_from..=h {
                if !registry.is_eligible_voter(&generator, x) {
                    continue;
                }
                if let (Some((index, weight)), Some(entry)) =
                    (span.vote_of(&generator, x), self.entry_mut(x))
                {
                    if entry.add_prevote(index, weight) {
                        undo.prevotes.push(CastVote {
                            height: x,
                            index,
                            weight,
                        });
                    }
                }
            }

            let candidates = self.precommit_candidates(
                &generator,
                claimed_prevoted,
                claimed_generated,
                h,
                window_start,
                old,
                registry,
            );
            for x in candidates {
                if !registry.is_eligible_voter(&generator, x) {
                    continue;
                }
                let Some((index, weight)) = span.vote_of(&generator, x) else {
                    continue;
                };
                match registry.record_precommit(&generator, x) {
                    Ok(_) => {
                        if let Some(entry) = self.entry_mut(x) {
                            if entry.add_precommit(index, weight) {
                                undo.precommits.push(CastVote {
                                    height: x,
                                    index,
                                    weight,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        debug!(
                            "[qc-09] Dropped precommit by {} for height {}: {}",
                            short_hex(&generator),
                            x,
                            e
                        );
                        metrics::record_stale_vote();
                    }
                }
            }
        } else {
            debug!(
                "[qc-09] Header at {} by {} claims max_height_generated {}; no votes counted",
                h,
                short_hex(&generator),
                claimed_generated
            );
        }

        let prevoted = self.scan_prevoted(old.prevoted, window_start, &span);
        let precommitted =
            self.scan_precommitted(old.precommitted, prevoted, window_start, &span);
        self.tally = TallyHeights {
            prevoted,
            precommitted,
        };

        undo.rotation = registry.rotate_due(h);
        self.journal.push_back(undo);
        let heights = self.publish();
        self.trim_journal();
        Ok(heights)
    }

    /// Derive the published heights from the tally, keeping the finalized
    /// height at or above every value published before.
    fn publish(&mut self) -> BftHeights {
        let finalized = self
            .heights
            .max_height_precommitted
            .max(self.tally.precommitted);
        self.heights = BftHeights {
            max_height_prevoted: self.tally.prevoted.max(finalized),
            max_height_precommitted: finalized,
            max_height_certified: self.heights.max_height_certified,
        };
        self.heights
    }

    /// Forget undo records no revert can reach: at or below the finalized
    /// height, or beyond the window capacity.
    fn trim_journal(&mut self) {
        let finalized = self.heights.max_height_precommitted;
        let capacity = self.config.window_capacity().max(1);
        while self
            .journal
            .front()
            .is_some_and(|u| u.height <= finalized || self.journal.len() > capacity)
        {
            self.journal.pop_front();
        }
    }

    /// Run rotations scheduled at or below the current tip and attach them
    /// to the tip's undo record.
    pub fn apply_due_rotations(&mut self, registry: &mut ValidatorWeightRegistry) {
        let tip = self.tip_height;
        let Some(rotation) = registry.rotate_due(tip) else {
            return;
        };
        if let Some(undo) = self.journal.back_mut().filter(|u| u.height == tip) {
            undo.rotation = Some(match undo.rotation.take() {
                Some(earlier) => earlier.merge(rotation),
                None => rotation,
            });
        }
    }

    /// Take back the tip header using its undo record.
    ///
    /// Votes at or below the published finalized height are kept.
    fn undo_tip(&mut self, undo: UndoRecord, registry: &mut ValidatorWeightRegistry) {
        let finalized = self.heights.max_height_precommitted;
        if let Some(rotation) = undo.rotation {
            registry.undo_rotation(rotation);
        }
        for vote in undo.precommits.iter().filter(|v| v.height > finalized) {
            if let Some(entry) = self.entry_mut(vote.height) {
                entry.remove_precommit(vote.index, vote.weight);
            }
        }
        for vote in undo.prevotes.iter().filter(|v| v.height > finalized) {
            if let Some(entry) = self.entry_mut(vote.height) {
                entry.remove_prevote(vote.index, vote.weight);
            }
        }
        if let Some(largest) = undo.largest_precommit {
            registry.rewind_precommit(&undo.generator, largest);
        }

        self.window.pop_back();
        if let Some(evicted) = undo.evicted {
            self.window.push_front(evicted);
        }
        self.tally = undo.tally;
        self.tip_height = undo.height.saturating_sub(1);
    }

    #[allow(clippy::too_many_arguments)]
    fn precommit_candidates(
        &self,
        generator: &Address,
        claimed_prevoted: u32,
        claimed_generated: u32,
        h: u32,
        window_start: u32,
        old: TallyHeights,
        registry: &ValidatorWeightRegistry,
    ) -> RangeInclusive<u32> {
        let above_finalized = old
            .precommitted
            .saturating_add(1)
            .max(window_start);
        #[allow(clippy::reversed_empty_ranges)]
        let empty = 1..=0;

        match self.config.precommit_rule {
            PrecommitRule::PrevotedRange => {
                claimed_prevoted.saturating_add(1).max(above_finalized)..=h
            }
            PrecommitRule::PrevoteQuorum => {
                let Some(vote_info) = registry.get(generator) else {
                    return empty;
                };
                let from = vote_info
                    .min_active_height
                    .max(vote_info.largest_height_precommit.saturating_add(1))
                    .max(above_finalized);
                from..=(h - 1).min(old.prevoted)
            }
            PrecommitRule::SingleHeight => {
                let Some(vote_info) = registry.get(generator) else {
                    return empty;
                };
                let target = (h - 1).min(claimed_generated);
                if claimed_generated >= vote_info.min_active_height
                    && claimed_generated > vote_info.largest_height_precommit
                    && target >= above_finalized
                {
                    target..=target
                } else {
                    empty
                }
            }
        }
    }

    fn scan_prevoted(&self, current: u32, window_start: u32, span: &ParamsSpan) -> u32 {
        let from = current.saturating_add(1).max(window_start);
        (from..=self.tip_height)
            .rev()
            .find(|&x| match (self.entry(x), span.at(x)) {
                (Some(entry), Some(p)) => entry.prevote_weight() >= p.prevote_threshold(),
                _ => false,
            })
            .unwrap_or(current)
    }

    fn scan_precommitted(
        &self,
        current: u32,
        prevoted: u32,
        window_start: u32,
        span: &ParamsSpan,
    ) -> u32 {
        let from = current.saturating_add(1).max(window_start);
        (from..=prevoted)
            .rev()
            .find(|&x| match (self.entry(x), span.at(x)) {
                (Some(entry), Some(p)) => entry.precommit_weight() >= p.precommit_threshold(),
                _ => false,
            })
            .unwrap_or(current)
    }

    /// Rebuild the window by replaying the retained headers in
    /// `[window_start, to_height]`.
    ///
    /// The replay runs on scratch state and replaces the live window only
    /// if every step succeeds. Headers above `to_height` are dropped. The
    /// finalized height and the registry's precommit heights never move down,
    /// and the undo journal is discarded: later reverts replay the window.
    pub fn recompute<P: ParametersSource>(
        &mut self,
        to_height: u32,
        window_start: u32,
        registry: &mut ValidatorWeightRegistry,
        params: &mut P,
    ) -> BftResult<BftHeights> {
        let old = self.heights;
        let old_tally = self.tally;
        let retained_from = self.window.front().map(|i| i.height);
        let valid_range = retained_from.is_some_and(|front| {
            front <= window_start && window_start <= to_height && to_height <= self.tip_height
        });
        if !valid_range {
            return Err(BftError::OutOfWindow {
                height: if retained_from.is_some_and(|f| window_start < f) {
                    window_start
                } else {
                    to_height
                },
                window_start: self.window_start(),
                tip: self.tip_height,
            });
        }
        if to_height < old.max_height_precommitted {
            return Err(BftError::ConsistencyViolation {
                reason: format!(
                    "recompute to {} below finalized height {}",
                    to_height, old.max_height_precommitted
                ),
            });
        }

        let base = window_start.saturating_sub(1);
        let scratch_finalized = old_tally.precommitted.min(base);
        let mut scratch = VoteLedger {
            config: self.config.clone(),
            tip_height: base,
            tally: TallyHeights {
                prevoted: base,
                precommitted: scratch_finalized,
            },
            heights: BftHeights {
                max_height_prevoted: base,
                max_height_precommitted: scratch_finalized,
                max_height_certified: old.max_height_certified.min(scratch_finalized),
            },
            window: VecDeque::with_capacity(self.window.len()),
            journal: VecDeque::new(),
        };
        let mut scratch_registry = registry.with_precommits_capped(base);
        for info in self
            .window
            .iter()
            .filter(|i| i.height >= window_start && i.height <= to_height)
        {
            scratch.append(info.cleared(), &mut scratch_registry, params)?;
        }

        let replayed = scratch.tally;
        let precommitted = replayed.precommitted.max(old_tally.precommitted);
        let prevoted = if to_height == self.tip_height {
            replayed.prevoted.max(old_tally.prevoted)
        } else {
            replayed.prevoted.max(precommitted)
        };

        self.window = scratch.window;
        self.tip_height = to_height;
        self.tally = TallyHeights {
            prevoted,
            precommitted,
        };
        self.journal.clear();
        registry.absorb_precommits(&scratch_registry);
        let heights = self.publish();

        debug!(
            "[qc-09] Recomputed window [{}, {}]: prevoted {}, precommitted {}",
            window_start, to_height, heights.max_height_prevoted, heights.max_height_precommitted
        );
        Ok(heights)
    }

    /// Drop every header above `height` (chain reversion).
    ///
    /// Each dropped header is taken back with its undo record, restoring the
    /// tallies, the tally heights and the registry to what they were before
    /// it. When the records no longer reach `height` the retained window is
    /// replayed instead. Reverting below the finalized height is a
    /// consistency violation.
    pub fn remove_headers_after<P: ParametersSource>(
        &mut self,
        height: u32,
        registry: &mut ValidatorWeightRegistry,
        params: &mut P,
    ) -> BftResult<BftHeights> {
        if height >= self.tip_height {
            return Ok(self.heights);
        }
        let finalized = self.heights.max_height_precommitted;
        if height < finalized {
            return Err(BftError::ConsistencyViolation {
                reason: format!(
                    "revert to {} below finalized height {}",
                    height, finalized
                ),
            });
        }

        warn!(
            "[qc-09] Reverting headers ({}, {}]",
            height, self.tip_height
        );
        let journaled = self
            .journal
            .front()
            .is_some_and(|u| u.height <= height.saturating_add(1));
        if journaled {
            while self.tip_height > height {
                let Some(undo) = self.journal.pop_back() else {
                    break;
                };
                self.undo_tip(undo, registry);
            }
            return Ok(self.publish());
        }

        // Undo records no longer cover the range: replay what is retained
        debug!(
            "[qc-09] Undo journal does not reach height {}; replaying window",
            height
        );
        match self.window.front().map(|i| i.height) {
            Some(front) if front <= height => self.recompute(height, front, registry, params),
            _ => {
                self.window.clear();
                self.journal.clear();
                self.tip_height = height;
                self.tally = TallyHeights {
                    prevoted: finalized,
                    precommitted: finalized,
                };
                Ok(self.publish())
            }
        }
    }

    /// Lowest height whose parameters a future append or revert may still
    /// need: the window start, an evicted entry a revert would restore, or
    /// the first height above a tally a revert would restore.
    pub fn retained_from(&self) -> u32 {
        let evicted = self
            .journal
            .iter()
            .find_map(|u| u.evicted.as_ref().map(|e| e.height));
        let restorable_tally = self
            .journal
            .front()
            .map(|u| u.tally.precommitted.saturating_add(1));
        [evicted, restorable_tally]
            .into_iter()
            .flatten()
            .fold(self.window_start(), u32::min)
    }

    /// Raise the certified height. Lower or equal heights are a no-op.
    ///
    /// Returns true if the certified height moved.
    pub fn update_max_height_certified(&mut self, height: u32) -> BftResult<bool> {
        let finalized = self.heights.max_height_precommitted;
        if height > finalized {
            return Err(BftError::InvalidCertifiedHeight { height, finalized });
        }
        if height <= self.heights.max_height_certified {
            return Ok(false);
        }
        self.heights.max_height_certified = height;
        Ok(true)
    }

    pub fn bft_heights(&self) -> BftHeights {
        self.heights
    }

    pub fn tip_height(&self) -> u32 {
        self.tip_height
    }

    /// Lowest retained height, or `tip + 1` when nothing is retained.
    pub fn window_start(&self) -> u32 {
        self.window
            .front()
            .map_or(self.tip_height.saturating_add(1), |i| i.height)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Retained tallies, ascending.
    pub fn window(&self) -> impl Iterator<Item = &BlockBftInfo> {
        self.window.iter()
    }

    pub fn get_block_bft_info(&self, height: u32) -> Option<&BlockBftInfo> {
        self.entry(height)
    }

    pub fn generator_at_height(&self, height: u32) -> Option<Address> {
        self.entry(height).map(|i| i.generator_address)
    }

    /// True if `header` contradicts any retained header by the same
    /// generator.
    pub fn is_header_contradicting_chain(&self, header: &BlockHeader) -> bool {
        let claims = HeaderClaims::from(header);
        self.window
            .iter()
            .filter(|i| i.generator_address == header.generator_address)
            .any(|i| contradiction_reason(&claims, &HeaderClaims::from(i)).is_some())
    }

    /// True if `header` prevotes the widest range its generator could
    /// honestly claim: its last forged block is either outside the window or
    /// a retained block by the same generator.
    pub fn implies_maximal_prevotes(&self, header: &BlockHeader) -> bool {
        let previous = header.max_height_generated;
        if previous >= header.height {
            return false;
        }
        if previous < self.window_start() {
            return true;
        }
        self.generator_at_height(previous) == Some(header.generator_address)
    }

    fn entry(&self, height: u32) -> Option<&BlockBftInfo> {
        let front = self.window.front()?.height;
        let offset = height.checked_sub(front)?;
        self.window.get(offset as usize)
    }

    fn entry_mut(&mut self, height: u32) -> Option<&mut BlockBftInfo> {
        let front = self.window.front()?.height;
        let offset = height.checked_sub(front)?;
        self.window.get_mut(offset as usize)
    }
}
