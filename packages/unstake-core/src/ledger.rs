//! The ledger as the core sees it: a read-only oracle and the [`PoolContext`]
//! snapshot built from it.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fee::Fee;
use crate::flash_loan::{FlashLoanFee, FlashLoanMarker};
use crate::lifecycle::{Clock, PositionRecord, StakePosition};
use crate::pda::{
    derive_fee, derive_flash_account, derive_flash_loan_fee, derive_pool_sol_reserves,
    derive_protocol_fee, derive_stake_account_record,
};
use crate::pool::PoolState;
use crate::protocol_fee::ProtocolFee;
use crate::serde_helpers::pubkey_str;
use crate::state::{
    parse_fee, parse_flash_account, parse_flash_loan_fee, parse_mint_supply, parse_pool,
    parse_protocol_fee, parse_stake_account, parse_stake_account_record,
};

// ─── Oracle ───────────────────────────────────────────────────────────────────

/// Balances, account data and time, as provided by the host ledger.
pub trait LedgerOracle {
    /// Raw data of `address`, or `None` if the account does not exist.
    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    /// Lamport balance of `address`; zero for a missing account.
    fn lamports(&self, address: &Pubkey) -> Result<u64>;

    fn clock(&self) -> Result<Clock>;
}

impl<T: LedgerOracle + ?Sized> LedgerOracle for &T {
    fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        (**self).account_data(address)
    }

    fn lamports(&self, address: &Pubkey) -> Result<u64> {
        (**self).lamports(address)
    }

    fn clock(&self) -> Result<Clock> {
        (**self).clock()
    }
}

fn require_data(oracle: &impl LedgerOracle, address: &Pubkey) -> Result<Vec<u8>> {
    oracle.account_data(address)?.ok_or(Error::AccountNotFound(*address))
}

// ─── Context ──────────────────────────────────────────────────────────────────

/// A stake account held by the pool, with its custody record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedPosition {
    pub stake:  StakePosition,
    pub record: PositionRecord,
}

/// Everything an operation on one pool reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolContext {
    #[serde(with = "pubkey_str")]
    pub program_id:     Pubkey,
    pub state:          PoolState,
    pub fee:            Fee,
    pub protocol_fee:   ProtocolFee,
    /// `None` when flash loans are not enabled for the pool.
    #[serde(default)]
    pub flash_loan_fee: Option<FlashLoanFee>,
    /// Outstanding flash loan, only ever `Some` inside an operation.
    #[serde(default)]
    pub flash_loan:     Option<FlashLoanMarker>,
    pub clock:          Clock,
    #[serde(default)]
    pub positions:      Vec<OwnedPosition>,
}

impl PoolContext {
    /// Read a pool and its fee accounts. Positions are left empty; see
    /// [`PoolContext::load_positions`].
    pub fn load(oracle: &impl LedgerOracle, program_id: &Pubkey, pool_address: &Pubkey) -> Result<Self> {
        let pool = parse_pool(&require_data(oracle, pool_address)?)?;
        let reserves = derive_pool_sol_reserves(pool_address, program_id).0;
        let liquid_reserves = oracle.lamports(&reserves)?;
        let lp_supply = parse_mint_supply(&require_data(oracle, &pool.lp_mint)?)?;

        let fee = parse_fee(&require_data(oracle, &derive_fee(pool_address, program_id).0)?)?;
        let protocol_fee = parse_protocol_fee(&require_data(oracle, &derive_protocol_fee(program_id).0)?)?;

        let flash_loan_fee = oracle
            .account_data(&derive_flash_loan_fee(pool_address, program_id).0)?
            .map(|d| parse_flash_loan_fee(&d))
            .transpose()?;
        let flash_loan = oracle
            .account_data(&derive_flash_account(pool_address, program_id).0)?
            .map(|d| parse_flash_account(&d))
            .transpose()?;

        let clock = oracle.clock()?;

        debug!(
            pool = %pool_address,
            %reserves,
            liquid_reserves,
            lp_supply,
            incoming_stake = pool.incoming_stake,
            epoch = clock.epoch,
            "loaded pool"
        );

        Ok(Self {
            program_id: *program_id,
            state: PoolState {
                address: *pool_address,
                pool,
                reserves,
                liquid_reserves,
                lp_supply,
                flash_loaned: flash_loan.map_or(0, |m| m.lamports_borrowed),
            },
            fee,
            protocol_fee,
            flash_loan_fee,
            flash_loan,
            clock,
            positions: Vec::new(),
        })
    }

    /// Attach the given pool-held stake accounts. Accounts without a
    /// custody record are skipped with a warning.
    pub fn load_positions(&mut self, oracle: &impl LedgerOracle, stakes: &[Pubkey]) -> Result<()> {
        let mut positions = Vec::with_capacity(stakes.len());
        for stake in stakes {
            let record_addr = derive_stake_account_record(&self.state.address, stake, &self.program_id).0;
            let Some(record_data) = oracle.account_data(&record_addr)? else {
                warn!(%stake, "stake account held by reserves has no record; skipping");
                continue;
            };
            positions.push(OwnedPosition {
                stake:  load_stake_position(oracle, stake)?,
                record: parse_stake_account_record(&record_data)?,
            });
        }
        self.positions = positions;
        Ok(())
    }

    pub fn position(&self, stake: &Pubkey) -> Option<&OwnedPosition> {
        self.positions.iter().find(|p| p.stake.address == *stake)
    }

    pub(crate) fn position_index(&self, stake: &Pubkey) -> Option<usize> {
        self.positions.iter().position(|p| p.stake.address == *stake)
    }
}

/// Read and parse a stake account.
pub fn load_stake_position(oracle: &impl LedgerOracle, stake: &Pubkey) -> Result<StakePosition> {
    let data = require_data(oracle, stake)?;
    let lamports = oracle.lamports(stake)?;
    parse_stake_account(*stake, lamports, &data)
}
