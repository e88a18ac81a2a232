// SUB-BLOCK LIFECYCLE
//
// SAFETY INVARIANTS:
// 1. Only `SubBlock<Proposed>` can be built from raw parts or decoded from the wire
// 2. Only the PoH validator produces `SubBlock<PoHVerified>`
// 3. Only the stake validator produces `SubBlock<StakeVerified>`
// 4. The sealer accepts nothing but `SubBlock<StakeVerified>`
//
// Stage transitions are crate-private, so an unvalidated sub-block cannot
// reach the sealer through any public path.

use crate::votes::VoteTally;
use serde::{Deserialize, Serialize};
use synn_core::{Hash32, SubBlockBody, SubBlockHeader};

/// Runtime tag for where a sub-block is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubBlockStage {
    Proposed,
    PoHVerified,
    StakeVerified,
    /// Aggregated into a sealed main block
    Sealed,
}

impl SubBlockStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubBlockStage::Proposed => "PROPOSED",
            SubBlockStage::PoHVerified => "POH_VERIFIED",
            SubBlockStage::StakeVerified => "STAKE_VERIFIED",
            SubBlockStage::Sealed => "SEALED",
        }
    }
}

mod private {
    pub trait Sealed {}
}

/// Compile-time stage marker.
pub trait SubBlockState: private::Sealed + Clone + std::fmt::Debug + Send + Sync + 'static {
    fn stage(&self) -> SubBlockStage;
}

/// Built by the proposer or decoded from a peer; nothing checked yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Proposed;

/// PoH digest recomputed and matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoHVerified(());

/// Every recorded vote verified against an active authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeVerified {
    tally: VoteTally,
}

impl private::Sealed for Proposed {}
impl private::Sealed for PoHVerified {}
impl private::Sealed for StakeVerified {}

impl SubBlockState for Proposed {
    fn stage(&self) -> SubBlockStage {
        SubBlockStage::Proposed
    }
}

impl SubBlockState for PoHVerified {
    fn stage(&self) -> SubBlockStage {
        SubBlockStage::PoHVerified
    }
}

impl SubBlockState for StakeVerified {
    fn stage(&self) -> SubBlockStage {
        SubBlockStage::StakeVerified
    }
}

/// A PoH-stamped batch of transactions, tagged with its validation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBlock<S: SubBlockState = Proposed> {
    header: SubBlockHeader,
    body: SubBlockBody,
    state: S,
}

impl SubBlock<Proposed> {
    pub fn new(header: SubBlockHeader, body: SubBlockBody) -> Self {
        SubBlock {
            header,
            body,
            state: Proposed,
        }
    }

    pub(crate) fn into_poh_verified(self) -> SubBlock<PoHVerified> {
        SubBlock {
            header: self.header,
            body: self.body,
            state: PoHVerified(()),
        }
    }
}

impl SubBlock<PoHVerified> {
    pub(crate) fn into_stake_verified(self, tally: VoteTally) -> SubBlock<StakeVerified> {
        SubBlock {
            header: self.header,
            body: self.body,
            state: StakeVerified { tally },
        }
    }
}

impl SubBlock<StakeVerified> {
    /// Votes counted when the sub-block was verified.
    pub fn tally(&self) -> &VoteTally {
        &self.state.tally
    }
}

impl<S: SubBlockState> SubBlock<S> {
    pub fn header(&self) -> &SubBlockHeader {
        &self.header
    }

    pub fn body(&self) -> &SubBlockBody {
        &self.body
    }

    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    pub fn stage(&self) -> SubBlockStage {
        self.state.stage()
    }

    /// Drop the validation tag. Re-entering the pipeline starts from `Proposed`.
    pub fn into_proposed(self) -> SubBlock<Proposed> {
        SubBlock::new(self.header, self.body)
    }

    pub fn into_parts(self) -> (SubBlockHeader, SubBlockBody) {
        (self.header, self.body)
    }

    pub fn to_message(&self) -> SubBlockMessage {
        SubBlockMessage {
            header: self.header.clone(),
            body: self.body.clone(),
        }
    }
}

/// Wire form of a sub-block, published on the `subblock` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlockMessage {
    pub header: SubBlockHeader,
    pub body: SubBlockBody,
}

impl From<SubBlockMessage> for SubBlock<Proposed> {
    fn from(msg: SubBlockMessage) -> Self {
        SubBlock::new(msg.header, msg.body)
    }
}
