// HYBRID CONSENSUS INTEGRATION TESTS
// Full PoH -> PoS -> PoW pipeline against the in-memory collaborators, for a
// single node and for two nodes exchanging messages by hand.

use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use synn_consensus::{
    solve_pow, target_for, validate_poh, verify_pow, Collaborators, ConsensusConfig, ConsensusError,
    DifficultyController, Proposed, SubBlock, SubBlockMessage, SubBlockProposer, SubBlockStage,
    SynnergyConsensus, VoteMessage, MAX_FUTURE_DRIFT_MS, TOPIC_BLOCK, TOPIC_SUB_BLOCK, TOPIC_VOTE,
};
use synn_core::{
    sub_headers_root, unix_millis, Address, Block, BlockBody, BlockHeader, Ed25519Signer, InboundMessage,
    Ledger, LoopbackNetwork, MemoryLedger, MemoryPool, Signer, StaticAuthority, SubBlockHeader, POS_ROLE,
    POW_ROLE, ZERO_HASH,
};
use synn_economics::{reward_marker_key, EmissionSchedule, RewardDistributor, RewardSplit};
use tokio_util::sync::CancellationToken;

const TREASURY: Address = [0x77; 20];

struct Node {
    engine: Arc<SynnergyConsensus>,
    pool: Arc<MemoryPool>,
    ledger: Arc<MemoryLedger>,
    network: Arc<LoopbackNetwork>,
    signer: Arc<Ed25519Signer>,
    authority: Arc<StaticAuthority>,
}

fn signer(seed: u8) -> Ed25519Signer {
    Ed25519Signer::from_seed(POS_ROLE, [seed; 32]).with_role_seed(POW_ROLE, [seed.wrapping_add(100); 32])
}

fn pos_key(seed: u8) -> Vec<u8> {
    signer(seed).public_key(POS_ROLE).unwrap()
}

fn test_config() -> ConsensusConfig {
    ConsensusConfig {
        initial_difficulty: 1000,
        target_block_interval_ms: 1_000,
        ..ConsensusConfig::default()
    }
}

/// Node `seed` with the given authorities registered in order.
fn node(seed: u8, registry: &[(Vec<u8>, u64)], config: ConsensusConfig) -> Node {
    let signer = Arc::new(signer(seed));
    let authority = Arc::new(
        StaticAuthority::new(TREASURY)
            .with_own_key(POS_ROLE, signer.public_key(POS_ROLE).unwrap())
            .with_own_key(POW_ROLE, signer.public_key(POW_ROLE).unwrap()),
    );
    for (pk, stake) in registry {
        authority.register(pk.clone(), *stake).unwrap();
    }
    let ledger = Arc::new(MemoryLedger::new());
    let pool = Arc::new(MemoryPool::new());
    let network = Arc::new(LoopbackNetwork::new());
    let rewards = RewardDistributor::new(
        EmissionSchedule::default(),
        RewardSplit::default(),
        ledger.clone(),
        authority.clone(),
    )
    .unwrap();
    let engine = SynnergyConsensus::new(
        config,
        Collaborators {
            source: pool.clone(),
            network: network.clone(),
            signer: signer.clone(),
            authority: authority.clone(),
            ledger: ledger.clone(),
        },
        rewards,
    )
    .unwrap();
    Node {
        engine: Arc::new(engine),
        pool,
        ledger,
        network,
        signer,
        authority,
    }
}

fn solo_node(config: ConsensusConfig) -> Node {
    node(1, &[(pos_key(1), 100)], config)
}

fn message(topic: &str, payload: Vec<u8>) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload,
    }
}

/// Re-solve `block` after overwriting its header timestamp.
fn with_timestamp(block: &Block, timestamp: i64) -> Block {
    let mut header = block.header.clone();
    header.timestamp = timestamp;
    let header = solve_pow(header, 10_000_000, &CancellationToken::new()).unwrap();
    Block::new(header, block.body.clone())
}

#[test]
fn test_end_to_end_tx1_tx2_scenario() {
    let pool = Arc::new(MemoryPool::new());
    pool.submit(b"tx1".to_vec());
    pool.submit(b"tx2".to_vec());
    let authority = Arc::new(StaticAuthority::new(TREASURY).with_own_key(POS_ROLE, pos_key(1)));
    let proposer = SubBlockProposer::new(pool, authority, 5_000, 1);

    let sub_block = proposer.propose_sub_block().unwrap();
    assert_eq!(sub_block.body().len(), 2);
    assert_eq!(sub_block.header().poh_hash.len(), 32);

    assert!(validate_poh(sub_block.clone()).is_ok());

    let (mut header, body) = sub_block.into_parts();
    header.poh_hash = [0xde; 32];
    assert!(matches!(
        validate_poh(SubBlock::new(header, body)),
        Err(ConsensusError::PoHMismatch { .. })
    ));
}

#[tokio::test]
async fn test_single_node_seal_at_difficulty_1000() {
    let n = solo_node(test_config());
    n.pool.submit(b"tx1".to_vec());
    n.pool.submit(b"tx2".to_vec());

    let header = n.engine.propose_sub_block_at(1_700_000_000_000).await.unwrap();
    assert_eq!(n.engine.status_of(&header.hash()), Some(SubBlockStage::Proposed));
    assert_eq!(n.network.sent_on(TOPIC_SUB_BLOCK).len(), 1);
    assert_eq!(n.network.sent_on(TOPIC_VOTE).len(), 1);

    let sealable = n.engine.collect_sealable();
    assert_eq!(sealable.len(), 1);
    assert_eq!(sealable[0].tally().voters, vec![0]);

    let block = n
        .engine
        .seal_main_block_pow(&sealable, &CancellationToken::new())
        .unwrap();
    assert_eq!(block.height(), 1);
    assert_eq!(block.header.difficulty, BigUint::from(1000u32));
    assert!(BigUint::from_bytes_be(&block.header.pow_hash) <= target_for(&BigUint::from(1000u32)));
    assert!(verify_pow(&block.header).is_ok());

    assert_eq!(n.ledger.last_block_height(), 1);
    assert_eq!(n.engine.status_of(&header.hash()), Some(SubBlockStage::Sealed));
    assert_eq!(n.engine.difficulty().samples(), 1);
    assert_eq!(n.engine.pending_len(), 0);

    let total = EmissionSchedule::default().reward_at(1);
    let miner = n.signer.public_key(POW_ROLE).unwrap();
    assert_eq!(n.ledger.balance_of(&miner).unwrap(), &total * 30u32 / 100u32);
    assert_eq!(n.ledger.balance_of(&pos_key(1)).unwrap(), &total * 30u32 / 100u32);
    assert_eq!(n.ledger.balance_of(&TREASURY).unwrap(), &total * 40u32 / 100u32);
    assert!(n.ledger.has_state(&reward_marker_key(1)).unwrap());
}

#[test]
fn test_five_timestamps_at_target_leave_difficulty_unchanged() {
    let controller = DifficultyController::new(BigUint::from(1000u32), 1_000, 100).unwrap();
    for i in 0..5 {
        controller.record_seal(1_700_000_000_000 + i * 1_000);
    }
    assert_eq!(controller.retarget_difficulty(), BigUint::from(1000u32));
}

#[tokio::test]
async fn test_quorum_needs_second_validator() {
    let registry = [(pos_key(1), 50), (pos_key(2), 50)];
    let a = node(1, &registry, test_config());
    let b = node(2, &registry, test_config());

    a.pool.submit(b"tx1".to_vec());
    let header = a.engine.propose_sub_block_at(1_000).await.unwrap();

    // 50 of 100 stake is below two thirds
    assert!(a.engine.collect_sealable().is_empty());
    assert_eq!(a.engine.pending_len(), 1);

    let sub_block_payload = a.network.sent_on(TOPIC_SUB_BLOCK)[0].clone();
    b.engine
        .handle_message(message(TOPIC_SUB_BLOCK, sub_block_payload))
        .await
        .unwrap();
    assert_eq!(b.engine.status_of(&header.hash()), Some(SubBlockStage::Proposed));

    let b_vote = b.network.sent_on(TOPIC_VOTE)[0].clone();
    a.engine.handle_message(message(TOPIC_VOTE, b_vote)).await.unwrap();
    let a_vote = a.network.sent_on(TOPIC_VOTE)[0].clone();
    b.engine.handle_message(message(TOPIC_VOTE, a_vote)).await.unwrap();

    let sealable = a.engine.collect_sealable();
    assert_eq!(sealable.len(), 1);
    assert_eq!(sealable[0].tally().voters, vec![0, 1]);
    assert_eq!(sealable[0].tally().voted_stake, 100);

    let block = a
        .engine
        .seal_main_block_pow(&sealable, &CancellationToken::new())
        .unwrap();
    let payload = bincode::serialize(&block).unwrap();
    b.engine.handle_message(message(TOPIC_BLOCK, payload)).await.unwrap();

    assert_eq!(b.ledger.last_block_hash(), block.hash());
    assert_eq!(b.engine.pending_len(), 0);
    assert_eq!(b.engine.difficulty().current(), a.engine.difficulty().current());
    assert_eq!(b.engine.status_of(&header.hash()), Some(SubBlockStage::Sealed));
}

#[tokio::test]
async fn test_votes_from_unrecognised_or_inactive_voters_rejected() {
    let registry = [(pos_key(1), 50), (pos_key(2), 50)];
    let a = node(1, &registry, test_config());

    a.pool.submit(b"tx1".to_vec());
    let header = a.engine.propose_sub_block_at(1_000).await.unwrap();

    // a well-formed signature from a key that is not an authority
    let outsider = signer(9);
    let forged = VoteMessage {
        header_hash: header.hash(),
        validator_index: 2,
        signature: outsider.sign(POS_ROLE, &header.hash()).unwrap(),
    };
    let err = a
        .engine
        .handle_message(message(TOPIC_VOTE, bincode::serialize(&forged).unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::UnauthorizedVoter { .. }));

    // a vote recorded while active stops counting once its validator is deactivated
    let b_signer = signer(2);
    let b_vote = VoteMessage {
        header_hash: header.hash(),
        validator_index: 1,
        signature: b_signer.sign(POS_ROLE, &header.hash()).unwrap(),
    };
    assert!(a.engine.stake_validator().accept_vote(&b_vote).unwrap());
    a.authority.set_active(&pos_key(2), false).unwrap();

    assert!(matches!(
        a.engine.stake_validator().accept_vote(&b_vote),
        Err(ConsensusError::UnauthorizedVoter { .. })
    ));

    // the remaining active stake is all A's, so A's own vote is a quorum
    let sealable = a.engine.collect_sealable();
    assert_eq!(sealable.len(), 1);
    assert_eq!(sealable[0].tally().voters, vec![0]);
    assert_eq!(sealable[0].tally().voted_stake, 50);
    assert_eq!(sealable[0].tally().total_stake, 50);
}

#[tokio::test]
async fn test_import_rejects_wrong_difficulty_and_bad_work() {
    let a = solo_node(test_config());
    a.pool.submit(b"tx1".to_vec());
    a.engine.propose_sub_block_at(1_000).await.unwrap();
    let sealable = a.engine.collect_sealable();
    let block = a
        .engine
        .seal_main_block_pow(&sealable, &CancellationToken::new())
        .unwrap();

    let other = solo_node(ConsensusConfig {
        initial_difficulty: 2000,
        ..test_config()
    });
    assert!(matches!(
        other.engine.import_block(block.clone()),
        Err(ConsensusError::DifficultyMismatch { height: 1, .. })
    ));

    let peer = solo_node(test_config());
    let mut tampered: Block = block.clone();
    tampered.header.nonce = tampered.header.nonce.wrapping_add(1);
    assert!(matches!(
        peer.engine.import_block(tampered),
        Err(ConsensusError::InvalidProofOfWork { height: 1, .. })
    ));
    assert_eq!(peer.ledger.last_block_height(), 0);

    // votes travel separately from the block
    assert!(matches!(
        peer.engine.import_block(block.clone()),
        Err(ConsensusError::MissingVote { validator_index: 0, .. })
    ));
    let a_vote = a.network.sent_on(TOPIC_VOTE)[0].clone();
    peer.engine.handle_message(message(TOPIC_VOTE, a_vote)).await.unwrap();

    assert!(peer.engine.import_block(block.clone()).unwrap());
    assert!(!peer.engine.import_block(block).unwrap());
}

#[test]
fn test_import_rejects_sub_blocks_without_authority_votes() {
    let victim = solo_node(test_config());
    let attacker = b"attacker-validator".to_vec();
    let sub_headers = vec![SubBlockHeader {
        height: 1,
        validator: attacker.clone(),
        poh_hash: [7; 32],
        timestamp: 1_000,
    }];
    let header = BlockHeader {
        height: 1,
        timestamp: unix_millis(),
        prev_hash: victim.ledger.last_block_hash(),
        miner_pk: attacker.clone(),
        difficulty: BigUint::from(1000u32),
        sub_headers_root: sub_headers_root(&sub_headers),
        nonce: 0,
        pow_hash: ZERO_HASH,
    };
    let header = solve_pow(header, 10_000_000, &CancellationToken::new()).unwrap();
    let forged = Block::new(header, BlockBody { sub_headers });
    assert!(verify_pow(&forged.header).is_ok());

    let err = victim.engine.import_block(forged).unwrap_err();
    assert!(matches!(err, ConsensusError::UnauthorizedVoter { .. }));
    assert!(!err.is_recoverable());
    assert_eq!(victim.ledger.last_block_height(), 0);
    assert_eq!(victim.ledger.balance_of(&attacker).unwrap(), BigUint::from(0u32));
    assert!(!victim.ledger.has_state(&reward_marker_key(1)).unwrap());
}

#[tokio::test]
async fn test_import_rejects_out_of_range_timestamps() {
    let a = solo_node(test_config());
    let peer = solo_node(test_config());

    a.pool.submit(b"tx1".to_vec());
    a.engine.propose_sub_block_at(1_000).await.unwrap();
    let sealable = a.engine.collect_sealable();
    let first = a
        .engine
        .seal_main_block_pow(&sealable, &CancellationToken::new())
        .unwrap();
    let a_vote = a.network.sent_on(TOPIC_VOTE)[0].clone();
    peer.engine.handle_message(message(TOPIC_VOTE, a_vote)).await.unwrap();

    let future = with_timestamp(&first, unix_millis() + MAX_FUTURE_DRIFT_MS + 60_000);
    assert!(matches!(
        peer.engine.import_block(future),
        Err(ConsensusError::InvalidTimestamp { height: 1, .. })
    ));
    assert!(peer.engine.import_block(first).unwrap());

    a.pool.submit(b"tx2".to_vec());
    a.engine.propose_sub_block_at(2_000).await.unwrap();
    let sealable = a.engine.collect_sealable();
    let second = a
        .engine
        .seal_main_block_pow(&sealable, &CancellationToken::new())
        .unwrap();

    let rewound = with_timestamp(&second, i64::MIN);
    assert!(matches!(
        peer.engine.import_block(rewound),
        Err(ConsensusError::InvalidTimestamp { height: 2, .. })
    ));
    assert_eq!(peer.ledger.last_block_height(), 1);
    assert_eq!(peer.engine.difficulty().current(), BigUint::from(1000u32));
}

#[tokio::test]
async fn test_sealed_sub_block_is_never_requeued() {
    let a = solo_node(ConsensusConfig {
        initial_difficulty: 1,
        target_block_interval_ms: 1,
        ..test_config()
    });
    a.pool.submit(b"tx1".to_vec());
    let header = a.engine.propose_sub_block_at(1_000).await.unwrap();
    let first = a
        .engine
        .seal_pending(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    // bury the block well below the chain tip
    for i in 0..40u8 {
        a.pool.submit(vec![b'f', i]);
        a.engine.propose_sub_block_at(2_000 + i64::from(i)).await.unwrap();
        a.engine
            .seal_pending(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(a.ledger.last_block_height(), 41);
    assert_eq!(a.ledger.block_at(1).unwrap().hash(), first.hash());

    let replay = a.network.sent_on(TOPIC_SUB_BLOCK)[0].clone();
    a.engine
        .handle_message(message(TOPIC_SUB_BLOCK, replay.clone()))
        .await
        .unwrap();
    assert_eq!(a.engine.status_of(&header.hash()), Some(SubBlockStage::Sealed));
    assert_eq!(a.engine.pending_len(), 0);
    assert!(a.engine.collect_sealable().is_empty());

    let decoded: SubBlockMessage = bincode::deserialize(&replay).unwrap();
    let sub_block: SubBlock<Proposed> = decoded.into();
    assert!(!a.engine.enqueue(sub_block));
}

#[tokio::test]
async fn test_failed_seal_requeues_sub_blocks() {
    let n = solo_node(ConsensusConfig {
        initial_difficulty: u64::MAX,
        max_pow_attempts: 1,
        ..test_config()
    });
    n.pool.submit(b"tx1".to_vec());
    n.engine.propose_sub_block_at(1_000).await.unwrap();

    let err = n.engine.seal_pending(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ConsensusError::SealFailed { attempts: 1, .. }));
    assert!(err.is_recoverable());
    assert_eq!(n.engine.pending_len(), 1);
    assert_eq!(n.ledger.last_block_height(), 0);
}

#[tokio::test]
async fn test_undecodable_message_rejected() {
    let n = solo_node(test_config());
    let err = n
        .engine
        .handle_message(message(TOPIC_BLOCK, vec![0xff; 3]))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::Codec { .. }));
}

#[tokio::test]
async fn test_engine_loops_seal_and_shut_down() {
    let n = solo_node(ConsensusConfig {
        initial_difficulty: 1,
        sub_block_interval_ms: 10,
        block_interval_ms: 50,
        ..test_config()
    });
    for i in 0..3u8 {
        n.pool.submit(vec![b't', b'x', i]);
    }

    let shutdown = CancellationToken::new();
    let handles = n.engine.clone().start(shutdown.clone());

    for _ in 0..500 {
        if n.ledger.last_block_height() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    assert!(n.ledger.last_block_height() >= 1);
    assert!(!n.network.sent_on(TOPIC_BLOCK).is_empty());
    assert!(n.pool.is_empty());
}
