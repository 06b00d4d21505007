//! Shared fixtures for the finality integration flows.

use std::collections::HashMap;
use std::sync::Once;

use qc_09_bft_finality::{
    BftApi, BftConfig, BftHeights, BftParameters, BftService, ForkChoiceConfig, InMemoryKVStore,
    PrecommitRule,
};
use quantum_telemetry::{init_logging, TelemetryConfig};
use shared_types::{Address, BlockHeader, BlockId, ValidatorWeight};

pub const GENESIS: u32 = 10;

static LOGGING: Once = Once::new();

/// Install the workspace subscriber once per test binary.
///
/// Quiet by default; set `QC_LOG_LEVEL=debug` to follow the ledger.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let mut config = TelemetryConfig::for_subsystem("09", "bft-finality");
        if std::env::var("QC_LOG_LEVEL").is_err() && std::env::var("RUST_LOG").is_err() {
            config.log_level = "warn".to_string();
        }
        // Another harness may already own the global subscriber
        let _ = init_logging(&config);
    });
}

pub fn addr(n: u8) -> Address {
    [n; 20]
}

/// Validators `1..=count`, all with the same weight.
pub fn validators(count: u8, weight: u64) -> Vec<ValidatorWeight> {
    (1..=count)
        .map(|i| ValidatorWeight::new(addr(i), weight))
        .collect()
}

/// Unique id per (height, branch).
pub fn block_id(height: u32, branch: u8) -> BlockId {
    let mut id = [0u8; 32];
    id[..4].copy_from_slice(&height.to_be_bytes());
    id[4] = branch;
    id
}

/// Generator scheduled at `height` when `count` validators take turns
/// starting at `first_height`.
pub fn round_robin(height: u32, count: u8, first_height: u32) -> Address {
    addr(((height - first_height) % count as u32) as u8 + 1)
}

pub fn create_service_with(config: BftConfig, count: u8) -> BftService<InMemoryKVStore> {
    init_test_logging();
    let genesis = BftParameters::from_validators(validators(count, 1)).unwrap();
    BftService::new(config, InMemoryKVStore::new(), genesis).unwrap()
}

/// Four validators of weight 1 at genesis height 10.
pub fn create_service(round_length: u32, rule: PrecommitRule) -> BftService<InMemoryKVStore> {
    create_service_with(
        BftConfig {
            genesis_height: GENESIS,
            round_length,
            precommit_rule: rule,
            fork_choice: ForkChoiceConfig::default(),
        },
        4,
    )
}

/// Forges headers on one branch with the claims an honest generator makes:
/// `max_height_generated` is its own previous block, `max_height_prevoted`
/// is what the local ledger currently reports.
pub struct ChainDriver {
    branch: u8,
    parent: BlockId,
    last_generated: HashMap<Address, u32>,
}

impl ChainDriver {
    pub fn new(branch: u8) -> Self {
        Self {
            branch,
            parent: block_id(GENESIS, 0),
            last_generated: HashMap::new(),
        }
    }

    /// Next header on this branch without recording it.
    pub fn peek(&self, service: &BftService<InMemoryKVStore>, generator: Address) -> BlockHeader {
        let height = service.tip_height() + 1;
        BlockHeader {
            id: block_id(height, self.branch),
            height,
            previous_block_id: self.parent,
            generator_address: generator,
            timestamp: height as u64 * 10,
            max_height_generated: self.last_generated.get(&generator).copied().unwrap_or(0),
            max_height_prevoted: service.bft_heights().max_height_prevoted,
        }
    }

    /// Mark `header` as part of this branch.
    pub fn record(&mut self, header: &BlockHeader) {
        self.parent = header.id;
        self.last_generated
            .insert(header.generator_address, header.height);
    }

    /// Forge and apply the next header.
    pub fn extend(
        &mut self,
        service: &BftService<InMemoryKVStore>,
        generator: Address,
    ) -> BftHeights {
        let header = self.peek(service, generator);
        let heights = service.add_block_header(&header).unwrap();
        self.record(&header);
        heights
    }

    /// Apply `count` headers from `count_validators` taking turns from
    /// `first_height`.
    pub fn extend_round_robin(
        &mut self,
        service: &BftService<InMemoryKVStore>,
        count: usize,
        count_validators: u8,
        first_height: u32,
    ) -> BftHeights {
        let mut heights = service.bft_heights();
        for _ in 0..count {
            let next = service.tip_height() + 1;
            heights = self.extend(service, round_robin(next, count_validators, first_height));
        }
        heights
    }

    pub fn set_parent(&mut self, parent: BlockId) {
        self.parent = parent;
    }
}
