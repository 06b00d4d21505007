//! # Finality Flows
//!
//! Reference scenarios and the operator-facing flows around them:
//!
//! 1. **Finality**: four equal validators finalize two heights behind the tip
//! 2. **Header rejection**: impossible claims leave the ledger untouched
//! 3. **Fork choice**: discard, long-range sync and tie-break with revert
//! 4. **Validator rotation**: a fifth validator joins mid-chain
//! 5. **Halt latch**: reverting below the finalized height stops mutations

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qc_09_bft_finality::{
        BftApi, BftConfig, BftError, BftHeights, ContradictionReason, ForkChoiceConfig,
        ForkStatus, ObservedHeader, PrecommitRule, ProcessingState, SlotBasis,
    };
    use shared_types::{BlockHeader, ValidatorSetChange, ValidatorWeight};

    use crate::integration::fixtures::{
        addr, block_id, create_service, create_service_with, round_robin, validators,
        ChainDriver, GENESIS,
    };

    // =========================================================================
    // FINALITY
    // =========================================================================

    #[test]
    fn test_four_validators_finalize_after_third_vote() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut expected = Vec::new();

        for (height, generator) in [(11, 1), (12, 2), (13, 3), (14, 4)] {
            let header = BlockHeader {
                id: block_id(height, 0),
                height,
                previous_block_id: block_id(height - 1, 0),
                generator_address: addr(generator),
                timestamp: height as u64 * 10,
                max_height_generated: 0,
                max_height_prevoted: 10,
            };
            expected.push(service.add_block_header(&header).unwrap().max_height_precommitted);
        }

        assert_eq!(expected, vec![10, 10, 11, 12]);
        let snapshot = service.snapshot();
        // Header 14 votes only above the finalized height 11
        assert_eq!(snapshot.get_block_bft_info(11).unwrap().precommit_weight(), 3);
        assert_eq!(snapshot.get_block_bft_info(12).unwrap().precommit_weight(), 3);
        assert_eq!(snapshot.get_block_bft_info(13).unwrap().prevote_weight(), 2);
    }

    #[test]
    fn test_honest_round_robin_keeps_two_block_lag() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);

        for _ in 0..40 {
            let next = service.tip_height() + 1;
            let heights = driver.extend(&service, round_robin(next, 4, GENESIS + 1));
            if next >= GENESIS + 3 {
                assert_eq!(heights.max_height_precommitted, next - 2);
                assert_eq!(heights.max_height_prevoted, next - 2);
            }
        }
    }

    #[test]
    fn test_prevote_quorum_rule_finalizes_one_round_later() {
        let service = create_service(103, PrecommitRule::PrevoteQuorum);
        let mut driver = ChainDriver::new(0);
        let heights = driver.extend_round_robin(&service, 30, 4, GENESIS + 1);

        // Precommits only land on heights prevote-confirmed beforehand
        assert!(heights.max_height_precommitted < heights.max_height_prevoted);
        assert!(heights.max_height_precommitted >= service.tip_height() - 5);
        assert_eq!(heights.max_height_prevoted, service.tip_height() - 2);
    }

    // =========================================================================
    // HEADER REJECTION
    // =========================================================================

    #[test]
    fn test_header_claiming_future_generation_rejected() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 9, 4, GENESIS + 1);
        let before = service.snapshot();
        assert_eq!(before.tip_height, 19);

        let mut header = driver.peek(&service, addr(2));
        header.max_height_generated = 25;
        let result = service.add_block_header(&header);
        assert!(matches!(
            result,
            Err(BftError::InvalidHeader { height: 20, .. })
        ));

        let after = service.snapshot();
        assert_eq!(after.heights, before.heights);
        assert_eq!(after.tip_height, 19);
        assert_eq!(after.window.len(), before.window.len());
    }

    #[test]
    fn test_header_out_of_sequence_rejected() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 3, 4, GENESIS + 1);

        let mut gap = driver.peek(&service, addr(4));
        gap.height += 1;
        assert!(matches!(
            service.add_block_header(&gap),
            Err(BftError::InvalidHeader { .. })
        ));
        assert_eq!(service.tip_height(), 13);
    }

    #[test]
    fn test_header_claiming_current_height_casts_no_votes() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 2, 4, GENESIS + 1);

        let mut header = driver.peek(&service, addr(3));
        header.max_height_generated = header.height;
        let heights = service.add_block_header(&header).unwrap();

        assert_eq!(heights, BftHeights::at(GENESIS));
        let info = service.snapshot().get_block_bft_info(13).cloned().unwrap();
        assert_eq!(info.prevote_weight(), 0);
        assert_eq!(info.precommit_weight(), 0);
        assert_eq!(service.generator_at_height(13), Some(addr(3)));
    }

    // =========================================================================
    // EQUIVOCATION
    // =========================================================================

    #[test]
    fn test_same_height_same_claims_contradict() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let first = BlockHeader {
            id: block_id(50, 1),
            height: 50,
            generator_address: addr(7),
            max_height_generated: 40,
            max_height_prevoted: 10,
            ..Default::default()
        };
        let second = BlockHeader {
            id: block_id(50, 2),
            ..first.clone()
        };

        let evidence = service.detect_contradiction(&first, &second).unwrap();
        assert_eq!(evidence.reason, ContradictionReason::StaleBranch);
        assert_eq!(evidence.generator_address(), addr(7));
        assert!(service.detect_contradiction(&first, &first).is_none());
    }

    #[test]
    fn test_contradiction_against_retained_chain() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 8, 4, GENESIS + 1);

        // G1 forged 11 and 15; honest next block acknowledges 15
        let honest = driver.peek(&service, addr(1));
        assert_eq!(honest.max_height_generated, 15);
        assert!(!service.is_header_contradicting_chain(&honest));
        assert!(service.implies_maximal_prevotes(&honest));

        // Points at G2's block 12 instead of its own 15
        let forgetful = BlockHeader {
            max_height_generated: 12,
            ..honest.clone()
        };
        assert!(service.is_header_contradicting_chain(&forgetful));
        assert!(!service.implies_maximal_prevotes(&forgetful));
    }

    // =========================================================================
    // FORK CHOICE
    // =========================================================================

    fn competing(id: u8, previous: u8, generator: u8, height: u32, prevoted: u32) -> BlockHeader {
        BlockHeader {
            id: [id; 32],
            height,
            previous_block_id: [previous; 32],
            generator_address: addr(generator),
            timestamp: height as u64 * 10,
            max_height_generated: 0,
            max_height_prevoted: prevoted,
        }
    }

    #[test]
    fn test_equal_prevotes_at_same_height_discarded() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let tip = competing(1, 9, 1, 100, 99);
        let received = competing(2, 9, 2, 100, 99);

        let status = service.fork_choice(
            ObservedHeader::new(&received, 1015),
            ObservedHeader::new(&tip, 1000),
        );
        assert_eq!(status, ForkStatus::Discard);
    }

    #[test]
    fn test_more_prevotes_on_other_chain_triggers_sync() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let tip = competing(1, 9, 1, 100, 90);
        let received = competing(2, 7, 2, 98, 95);

        let status = service.fork_choice(
            ObservedHeader::new(&received, 1000),
            ObservedHeader::new(&tip, 1000),
        );
        assert_eq!(status, ForkStatus::DifferentChain);
    }

    #[test]
    fn test_forging_timestamp_breaks_ties() {
        let config = BftConfig {
            genesis_height: GENESIS,
            fork_choice: ForkChoiceConfig {
                block_time: 10,
                slot_basis: SlotBasis::ForgingTimestamp,
            },
            ..Default::default()
        };
        let service = create_service_with(config, 4);
        let tip = BlockHeader {
            timestamp: 1000,
            ..competing(1, 9, 1, 100, 99)
        };
        let early = BlockHeader {
            timestamp: 990,
            ..competing(2, 9, 2, 100, 99)
        };

        // Arrival order no longer matters
        assert_eq!(
            service.fork_choice(
                ObservedHeader::new(&early, 5000),
                ObservedHeader::new(&tip, 1000)
            ),
            ForkStatus::TieBreak
        );
        assert_eq!(
            service.fork_choice(
                ObservedHeader::new(&tip, 0),
                ObservedHeader::new(&early, 5000)
            ),
            ForkStatus::Discard
        );
    }

    #[test]
    fn test_tie_break_reverts_tip_and_applies_sibling() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 9, 4, GENESIS + 1);
        let parent = service.snapshot().window.last().unwrap().block_id;

        let tip = driver.peek(&service, addr(2));
        service.add_block_header(&tip).unwrap();
        driver.record(&tip);
        assert_eq!(service.bft_heights().max_height_precommitted, 18);

        // Sibling from G3 that saw one more prevoted height
        let sibling = BlockHeader {
            id: block_id(20, 1),
            previous_block_id: parent,
            generator_address: addr(3),
            max_height_generated: 17,
            max_height_prevoted: 18,
            ..tip.clone()
        };
        assert!(!service.is_header_contradicting_chain(&sibling));
        let status = service.fork_choice(
            ObservedHeader::new(&sibling, 201),
            ObservedHeader::new(&tip, 200),
        );
        assert_eq!(status, ForkStatus::TieBreak);

        let reverted = service.remove_headers_after(19).unwrap();
        assert_eq!(reverted.max_height_precommitted, 18);
        assert_eq!(service.tip_height(), 19);

        let heights = service.add_block_header(&sibling).unwrap();
        driver.record(&sibling);
        assert_eq!(heights.max_height_precommitted, 18);
        assert_eq!(service.generator_at_height(20), Some(addr(3)));

        let mut last = heights;
        for _ in 0..8 {
            let next = service.tip_height() + 1;
            let heights = driver.extend(&service, round_robin(next, 4, GENESIS + 1));
            assert!(heights.max_height_precommitted >= last.max_height_precommitted);
            assert!(heights.max_height_precommitted <= heights.max_height_prevoted);
            last = heights;
        }
        assert!(last.max_height_precommitted > 18);
    }

    #[test]
    fn test_reapplied_tip_tallies_like_untouched_chain() {
        let straight = create_service(103, PrecommitRule::PrevotedRange);
        let reverted = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        let mut chain = Vec::new();
        for _ in 0..10 {
            let next = straight.tip_height() + 1;
            let header = driver.peek(&straight, round_robin(next, 4, GENESIS + 1));
            straight.add_block_header(&header).unwrap();
            reverted.add_block_header(&header).unwrap();
            driver.record(&header);
            chain.push(header);
        }

        let heights = reverted.remove_headers_after(19).unwrap();
        assert_eq!(heights.max_height_precommitted, 18);
        reverted.add_block_header(&chain[9]).unwrap();
        assert_eq!(reverted.snapshot().window, straight.snapshot().window);

        for _ in 0..12 {
            let next = straight.tip_height() + 1;
            let header = driver.peek(&straight, round_robin(next, 4, GENESIS + 1));
            let expected = straight.add_block_header(&header).unwrap();
            assert_eq!(reverted.add_block_header(&header).unwrap(), expected);
            driver.record(&header);
        }
        assert_eq!(straight.bft_heights().max_height_precommitted, 30);
        assert_eq!(reverted.snapshot().window, straight.snapshot().window);
    }

    // =========================================================================
    // VALIDATOR ROTATION
    // =========================================================================

    #[test]
    fn test_announced_sets_wait_for_their_height() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut without_four = validators(3, 1);
        without_four.push(ValidatorWeight::new(addr(5), 1));
        let with_four = validators(5, 1);

        service
            .apply_validator_set_change(&ValidatorSetChange {
                effective_height: 15,
                validators: without_four,
            })
            .unwrap();
        service
            .apply_validator_set_change(&ValidatorSetChange {
                effective_height: 20,
                validators: with_four,
            })
            .unwrap();

        // Validator 4 still belongs to the set governing 11..=14
        let mut driver = ChainDriver::new(0);
        let heights = driver.extend_round_robin(&service, 4, 4, GENESIS + 1);
        assert_eq!(service.generator_at_height(14), Some(addr(4)));
        assert_eq!(heights.max_height_precommitted, 12);
        let info = service.snapshot().get_block_bft_info(12).cloned().unwrap();
        assert_eq!(info.precommit_weight(), 3);
    }

    #[test]
    fn test_validator_joins_mid_chain() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 2, 4, GENESIS + 1);

        service
            .apply_validator_set_change(&ValidatorSetChange {
                effective_height: 15,
                validators: validators(5, 1),
            })
            .unwrap();
        let params = service.get_parameters_for_height(15).unwrap();
        assert_eq!(params.len(), 5);
        assert_eq!(params.precommit_threshold(), 4);
        assert_eq!(service.get_parameters_for_height(14).unwrap().len(), 4);

        // 13 and 14 still belong to the four-validator round
        driver.extend_round_robin(&service, 2, 4, GENESIS + 1);
        let heights = driver.extend_round_robin(&service, 26, 5, 15);

        assert_eq!(service.tip_height(), 40);
        assert_eq!(heights.max_height_precommitted, 37);
        let info = service.snapshot().get_block_bft_info(37).cloned().unwrap();
        assert_eq!(info.precommit_weight(), 4);
    }

    #[test]
    fn test_heavier_validator_set() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 2, 4, GENESIS + 1);

        let weighted: Vec<ValidatorWeight> = vec![
            ValidatorWeight::new(addr(1), 5),
            ValidatorWeight::new(addr(2), 1),
            ValidatorWeight::new(addr(3), 1),
            ValidatorWeight::new(addr(4), 1),
        ];
        service
            .apply_validator_set_change(&ValidatorSetChange {
                effective_height: 13,
                validators: weighted,
            })
            .unwrap();
        assert_eq!(service.get_parameters_for_height(13).unwrap().precommit_threshold(), 6);

        // Heavy validator alone is not enough
        driver.extend(&service, addr(1));
        assert_eq!(service.bft_heights().max_height_precommitted, GENESIS);

        // Heavy plus one light validator crosses the threshold at 13
        driver.extend(&service, addr(2));
        let heights = service.bft_heights();
        assert_eq!(heights.max_height_prevoted, 13);
        assert_eq!(heights.max_height_precommitted, 13);
    }

    #[test]
    fn test_unannounced_validator_cannot_vote() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 2, 4, GENESIS + 1);

        let intruder = driver.peek(&service, addr(9));
        service.add_block_header(&intruder).unwrap();
        driver.record(&intruder);

        let info = service.snapshot().get_block_bft_info(13).cloned().unwrap();
        assert_eq!(info.prevote_weight(), 0);
        assert_eq!(service.bft_heights().max_height_precommitted, GENESIS);
    }

    // =========================================================================
    // RECOMPUTE AND HALT
    // =========================================================================

    #[test]
    fn test_revert_below_finalized_halts_until_reset() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 10, 4, GENESIS + 1);
        assert_eq!(service.bft_heights().max_height_precommitted, 18);

        assert!(matches!(
            service.remove_headers_after(16),
            Err(BftError::ConsistencyViolation { .. })
        ));
        assert_eq!(
            service.processing_state(),
            ProcessingState::HaltedAwaitingIntervention
        );

        let next = driver.peek(&service, round_robin(21, 4, GENESIS + 1));
        assert!(matches!(
            service.add_block_header(&next),
            Err(BftError::SystemHalted)
        ));
        assert!(matches!(
            service.update_max_height_certified(12),
            Err(BftError::SystemHalted)
        ));
        let snapshot = service.snapshot();
        assert_eq!(snapshot.tip_height, 20);
        assert_eq!(snapshot.heights.max_height_precommitted, 18);

        service.reset_from_halted().unwrap();
        service.add_block_header(&next).unwrap();
        assert_eq!(service.bft_heights().max_height_precommitted, 19);
    }

    #[test]
    fn test_recompute_below_finalized_halts() {
        let service = create_service(4, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 40, 4, GENESIS + 1);
        let snapshot = service.snapshot();
        assert_eq!(snapshot.heights.max_height_precommitted, 48);

        assert!(matches!(
            service.recompute(47, snapshot.window_start()),
            Err(BftError::ConsistencyViolation { .. })
        ));
        assert_eq!(
            service.processing_state(),
            ProcessingState::HaltedAwaitingIntervention
        );
    }

    #[test]
    fn test_recompute_outside_window_rejected() {
        let service = create_service(4, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 40, 4, GENESIS + 1);
        let window_start = service.snapshot().window_start();

        assert!(matches!(
            service.recompute(50, window_start - 1),
            Err(BftError::OutOfWindow { .. })
        ));
        assert!(matches!(
            service.recompute(51, window_start),
            Err(BftError::OutOfWindow { .. })
        ));
        // Not a consistency violation
        assert_eq!(service.processing_state(), ProcessingState::Running);
    }

    #[test]
    fn test_recompute_truncates_above_target() {
        let service = create_service(4, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 40, 4, GENESIS + 1);
        let window_start = service.snapshot().window_start();

        let heights = service.recompute(49, window_start).unwrap();
        assert_eq!(service.tip_height(), 49);
        assert_eq!(heights.max_height_precommitted, 48);
        assert_eq!(heights.max_height_prevoted, 48);
        assert!(service.generator_at_height(50).is_none());
    }

    #[test]
    fn test_certified_height_follows_finality() {
        let service = create_service(103, PrecommitRule::PrevotedRange);
        let mut driver = ChainDriver::new(0);
        driver.extend_round_robin(&service, 6, 4, GENESIS + 1);
        assert_eq!(service.bft_heights().max_height_precommitted, 14);

        assert!(service.update_max_height_certified(13).unwrap());
        assert!(!service.update_max_height_certified(12).unwrap());
        assert!(matches!(
            service.update_max_height_certified(15),
            Err(BftError::InvalidCertifiedHeight {
                height: 15,
                finalized: 14
            })
        ));
        assert_eq!(service.bft_heights().max_height_certified, 13);
    }

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_observe_partial_updates() {
        let service = Arc::new(create_service(4, PrecommitRule::PrevotedRange));

        let writer = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let mut driver = ChainDriver::new(0);
                for _ in 0..80 {
                    driver.extend_round_robin(&service, 1, 4, GENESIS + 1);
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let mut last = BftHeights::at(GENESIS);
                    for _ in 0..300 {
                        let snapshot = service.snapshot();
                        let h = snapshot.heights;
                        assert!(h.max_height_precommitted <= h.max_height_prevoted);
                        assert!(h.max_height_prevoted <= snapshot.tip_height);
                        assert!(h.max_height_precommitted >= last.max_height_precommitted);
                        assert!(snapshot.window.len() <= 12);
                        for pair in snapshot.window.windows(2) {
                            assert_eq!(pair[0].height + 1, pair[1].height);
                        }
                        if let Some(last_info) = snapshot.window.last() {
                            assert_eq!(last_info.height, snapshot.tip_height);
                        }
                        last = h;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(service.tip_height(), 90);
        assert_eq!(service.bft_heights().max_height_precommitted, 88);
    }
}
