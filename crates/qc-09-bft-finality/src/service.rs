//! BFT Finality Service
//!
//! Owns the vote ledger, the validator registry and the parameters store
//! behind a single lock. Every mutation runs under one write guard, so
//! readers observe the state either entirely before or entirely after it.

use crate::config::BftConfig;
use crate::domain::{
    BftHeights, BftParameters, BftParametersStore, BreakerEvent, CircuitBreaker,
    ContradictingHeaders, ForkChoiceResolver, ForkStatus, ObservedHeader, ProcessingState,
    ValidatorWeightRegistry, VoteLedger,
};
use crate::error::{BftError, BftResult};
use crate::metrics;
use crate::ports::inbound::{BftApi, BftSnapshot};
use crate::ports::outbound::KeyValueStore;
use parking_lot::RwLock;
use shared_types::{Address, BlockHeader, ValidatorSetChange};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Internal state guarded by the service lock
struct BftServiceState<S: KeyValueStore> {
    ledger: VoteLedger,
    registry: ValidatorWeightRegistry,
    params: BftParametersStore<S>,
    circuit_breaker: CircuitBreaker,
}

impl<S: KeyValueStore> BftServiceState<S> {
    fn ensure_running(&self) -> BftResult<()> {
        if self.circuit_breaker.is_halted() {
            return Err(BftError::SystemHalted);
        }
        Ok(())
    }

    /// Trip the latch if `result` is a consistency violation.
    fn check_consistency<T>(&mut self, result: BftResult<T>) -> BftResult<T> {
        if let Err(e @ BftError::ConsistencyViolation { .. }) = &result {
            error!("[qc-09] {} - halting until manual intervention", e);
            self.circuit_breaker
                .process_event(BreakerEvent::ConsistencyViolation);
            metrics::set_halted(true);
        }
        result
    }

    /// Drop parameters and registry entries nothing can reach anymore.
    ///
    /// Parameters are kept for every height still in the vote window or
    /// restorable by a revert.
    fn prune(&mut self) {
        let finalized = self.ledger.bft_heights().max_height_precommitted;
        let boundary = finalized.min(self.ledger.retained_from());
        if let Err(e) = self.params.delete_parameters_below(boundary) {
            error!(
                "[qc-09] Failed to prune parameters below {}: {}",
                boundary, e
            );
        }
        self.registry.prune(finalized);
    }
}

/// BFT finality service
pub struct BftService<S: KeyValueStore> {
    config: BftConfig,
    resolver: ForkChoiceResolver,
    state: Arc<RwLock<BftServiceState<S>>>,
}

impl<S: KeyValueStore> BftService<S> {
    /// Create the service at genesis.
    ///
    /// `genesis` is stored at `config.genesis_height` unless the store
    /// already holds a record there, in which case the stored record wins.
    pub fn new(config: BftConfig, kv: S, genesis: BftParameters) -> BftResult<Self> {
        config.validate()?;
        let genesis_height = config.genesis_height;
        let mut params = BftParametersStore::new(kv);

        let genesis = match params.get_entry_for_height(genesis_height) {
            Ok((effective, stored)) if effective == genesis_height => {
                info!(
                    "[qc-09] Reusing stored genesis parameters at height {}",
                    genesis_height
                );
                stored
            }
            Ok(_) | Err(BftError::ParametersNotFound { .. }) => {
                params.set_parameters(genesis_height, &genesis)?;
                genesis
            }
            Err(e) => return Err(e),
        };

        let mut registry = ValidatorWeightRegistry::new();
        registry.rotate(genesis.validators(), genesis_height);

        info!(
            "[qc-09] BFT finality initialized at genesis {} with {} validators, window {}",
            genesis_height,
            genesis.len(),
            config.window_capacity()
        );

        Ok(Self {
            resolver: ForkChoiceResolver::new(config.fork_choice),
            state: Arc::new(RwLock::new(BftServiceState {
                ledger: VoteLedger::new(config.clone()),
                registry,
                params,
                circuit_breaker: CircuitBreaker::new(),
            })),
            config,
        })
    }

    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    pub fn tip_height(&self) -> u32 {
        self.state.read().ledger.tip_height()
    }
}

impl<S: KeyValueStore> BftApi for BftService<S> {
    fn add_block_header(&self, header: &BlockHeader) -> BftResult<BftHeights> {
        let mut guard = self.state.write();
        guard.ensure_running()?;
        let state = &mut *guard;

        let before = state.ledger.bft_heights();
        let result = {
            let mut cache = state.params.cache();
            state
                .ledger
                .add_block_header(header, &mut state.registry, &mut cache)
        };

        match result {
            Ok(heights) => {
                metrics::record_header_applied();
                metrics::set_heights(&heights);
                if heights.max_height_precommitted > before.max_height_precommitted {
                    state.prune();
                }
                Ok(heights)
            }
            Err(e) => {
                metrics::record_header_rejected(e.label());
                if e.is_fatal() {
                    error!("[qc-09] Fatal error at height {}: {}", header.height, e);
                }
                Err(e)
            }
        }
    }

    fn remove_headers_after(&self, height: u32) -> BftResult<BftHeights> {
        let mut guard = self.state.write();
        guard.ensure_running()?;
        let state = &mut *guard;

        let result = {
            let mut cache = state.params.cache();
            state
                .ledger
                .remove_headers_after(height, &mut state.registry, &mut cache)
        };
        let heights = state.check_consistency(result)?;
        metrics::set_heights(&heights);
        Ok(heights)
    }

    fn recompute(&self, to_height: u32, window_start: u32) -> BftResult<BftHeights> {
        let mut guard = self.state.write();
        guard.ensure_running()?;
        let state = &mut *guard;

        let result = {
            let mut cache = state.params.cache();
            state
                .ledger
                .recompute(to_height, window_start, &mut state.registry, &mut cache)
        };
        let heights = state.check_consistency(result)?;
        metrics::set_heights(&heights);
        Ok(heights)
    }

    fn apply_validator_set_change(&self, change: &ValidatorSetChange) -> BftResult<()> {
        let mut guard = self.state.write();
        guard.ensure_running()?;
        let state = &mut *guard;

        let tip = state.ledger.tip_height();
        if change.effective_height <= tip {
            return Err(BftError::InvalidParameters {
                reason: format!(
                    "validator set effective at {} announced after tip {}",
                    change.effective_height, tip
                ),
            });
        }

        let params = BftParameters::from_validators(change.validators.clone())?;
        state
            .params
            .set_parameters(change.effective_height, &params)?;
        // Installed once the tip reaches the height before it takes effect
        state
            .registry
            .schedule(params.validators().to_vec(), change.effective_height - 1);
        state.ledger.apply_due_rotations(&mut state.registry);
        Ok(())
    }

    fn update_max_height_certified(&self, height: u32) -> BftResult<bool> {
        let mut state = self.state.write();
        state.ensure_running()?;
        let moved = state.ledger.update_max_height_certified(height)?;
        if moved {
            metrics::set_heights(&state.ledger.bft_heights());
        }
        Ok(moved)
    }

    fn bft_heights(&self) -> BftHeights {
        self.state.read().ledger.bft_heights()
    }

    fn get_parameters_for_height(&self, height: u32) -> BftResult<BftParameters> {
        self.state.read().params.get_parameters_for_height(height)
    }

    fn generator_at_height(&self, height: u32) -> Option<Address> {
        self.state.read().ledger.generator_at_height(height)
    }

    fn fork_choice(&self, received: ObservedHeader<'_>, tip: ObservedHeader<'_>) -> ForkStatus {
        let status = self.resolver.resolve(received, tip);
        metrics::record_fork_choice(status.label());
        if status == ForkStatus::DoubleForging {
            warn!(
                "[qc-09] Double forging: {} against tip {}",
                received.header, tip.header
            );
        }
        status
    }

    fn detect_contradiction(
        &self,
        a: &BlockHeader,
        b: &BlockHeader,
    ) -> Option<ContradictingHeaders> {
        let evidence = crate::domain::detect_contradiction(a, b)?;
        metrics::record_contradiction(evidence.reason.label());
        warn!(
            "[qc-09] Contradicting headers {} and {} ({:?})",
            evidence.earlier, evidence.later, evidence.reason
        );
        Some(evidence)
    }

    fn is_header_contradicting_chain(&self, header: &BlockHeader) -> bool {
        self.state.read().ledger.is_header_contradicting_chain(header)
    }

    fn implies_maximal_prevotes(&self, header: &BlockHeader) -> bool {
        self.state.read().ledger.implies_maximal_prevotes(header)
    }

    fn snapshot(&self) -> BftSnapshot {
        let state = self.state.read();
        BftSnapshot {
            heights: state.ledger.bft_heights(),
            tip_height: state.ledger.tip_height(),
            window: state.ledger.window().cloned().collect(),
            processing_state: state.circuit_breaker.state(),
        }
    }

    fn processing_state(&self) -> ProcessingState {
        self.state.read().circuit_breaker.state()
    }

    fn reset_from_halted(&self) -> BftResult<()> {
        let mut state = self.state.write();
        if state.circuit_breaker.reset_from_halted() {
            warn!("[qc-09] Halt cleared by manual intervention");
            metrics::set_halted(false);
        }
        Ok(())
    }
}
