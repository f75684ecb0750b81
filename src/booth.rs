//! Quadratic-cost ballot state machine.
//!
//! A [`Booth`] serves one motion.  Each voter's position on that motion is a
//! leaf of the sparse ledger committed in their card; the booth never stores
//! positions itself.  Every operation proves the current leaf against the
//! card's root, prices the transition with [`cost`], plans the resulting
//! credit and vote transfers, checks that the whole plan can settle, and only
//! then mutates the host.  A failed operation leaves balances and the card
//! untouched.
//!
//! Two deployment shapes share this code (see [`BoothConfig`]):
//!
//! * a two-sided booth moves vote collateral from its reserve into the
//!   motion's support or oppose accumulator;
//! * a single-sided box is its own accumulator and only accepts positions on
//!   the side it was instantiated for.
//!
//! Credits always flow between the voter and the booth's own address.

use crate::address::Address;
use crate::config::BoothConfig;
use crate::error::{BallotError, Result};
use crate::fixed::cost;
use crate::sign::{consolidation_message, operator_address, verify_signature};
use crate::smt::{digest_to_hex, DefaultHashes, Digest, MerkleProof, SparseLedger};
use crate::stream::{TxKind, TxRecord};
use crate::template::{Params, Template};
use crate::token::{CardStore, TokenLedger};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Motion identifier; doubles as the leaf index on every card.
pub type MotionId = u64;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Positive positions.
    Support,
    /// Negative positions.
    Oppose,
}

impl Side {
    /// Side a ledger value sits on; `None` for zero.
    pub fn of(value: i128) -> Option<Self> {
        match value {
            v if v > 0 => Some(Side::Support),
            v if v < 0 => Some(Side::Oppose),
            _ => None,
        }
    }
}

/// Tag heading the booth template.
pub const BOOTH_TEMPLATE_TAG: &[u8] = b"qvote.booth.v1";

/// Placeholder names of the booth template.
pub mod slot {
    /// Credits token.
    pub const VOICE_CREDITS: &str = "VOICE_CREDITS";
    /// Votes token.
    pub const VOICE_TOKENS: &str = "VOICE_TOKENS";
    /// Operator public key.
    pub const OPERATOR: &str = "OPERATOR";
    /// External vote sink.
    pub const COLLECTION: &str = "COLLECTION";
    /// Encoded [`BoothConfig`](crate::BoothConfig).
    pub const LAYOUT: &str = "LAYOUT";
    /// Support accumulator of a two-sided booth.
    pub const YES_BOX: &str = "YES_BOX";
    /// Oppose accumulator of a two-sided booth.
    pub const NO_BOX: &str = "NO_BOX";
    /// Motion id, 48-bit.
    pub const MOTION_ID: &str = "MOTION_ID";
    /// Served side: 1 support, 0 oppose, 2 both.
    pub const IS_YES: &str = "IS_YES";
}

const MOTION_ID_WIDTH: usize = 6;

/// The reference booth template: a tag followed by one slot per parameter.
pub fn booth_template() -> Result<Template> {
    Template::descriptor(
        BOOTH_TEMPLATE_TAG,
        &[
            (slot::VOICE_CREDITS, 20),
            (slot::VOICE_TOKENS, 20),
            (slot::OPERATOR, 32),
            (slot::COLLECTION, 20),
            (slot::LAYOUT, 3),
            (slot::YES_BOX, 20),
            (slot::NO_BOX, 20),
            (slot::MOTION_ID, MOTION_ID_WIDTH),
            (slot::IS_YES, MOTION_ID_WIDTH),
        ],
    )
}

/// Template parameters of one booth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoothParams {
    /// Credits token.
    pub credits: Address,
    /// Votes token.
    pub votes: Address,
    /// Key whose signature authorizes consolidation.
    pub operator_key: VerifyingKey,
    /// Destination of withdrawn votes when the sink is external.
    pub collection: Address,
    /// Motion served.
    pub motion: MotionId,
    /// Side served by a single-sided box; ignored by two-sided booths.
    pub side: Side,
    /// Support accumulator of a two-sided booth.
    pub support: Address,
    /// Oppose accumulator of a two-sided booth.
    pub oppose: Address,
}

impl BoothParams {
    /// Copy retargeted at another motion and side.
    pub fn for_motion(&self, motion: MotionId, side: Side) -> Self {
        Self {
            motion,
            side,
            ..self.clone()
        }
    }

    /// Copy with explicit accumulators, for a two-sided booth.
    pub fn with_accumulators(&self, support: Address, oppose: Address) -> Self {
        Self {
            support,
            oppose,
            ..self.clone()
        }
    }

    /// First specialization pass: parameters shared by every motion.
    pub fn deployment_params(&self, config: &BoothConfig) -> Params {
        Params::new()
            .address(slot::VOICE_CREDITS, &self.credits)
            .address(slot::VOICE_TOKENS, &self.votes)
            .bytes(slot::OPERATOR, self.operator_key.to_bytes().to_vec())
            .address(slot::COLLECTION, &self.collection)
            .bytes(slot::LAYOUT, config.layout_bytes().to_vec())
    }

    /// Second specialization pass: motion index, direction and accumulators.
    pub fn motion_params(&self, config: &BoothConfig) -> Result<Params> {
        let (flag, support, oppose) = if config.two_sided {
            (2, self.support, self.oppose)
        } else {
            let flag = match self.side {
                Side::Support => 1,
                Side::Oppose => 0,
            };
            (flag, Address::ZERO, Address::ZERO)
        };
        Ok(Params::new()
            .uint(slot::MOTION_ID, MOTION_ID_WIDTH, self.motion)?
            .uint(slot::IS_YES, MOTION_ID_WIDTH, flag)?
            .address(slot::YES_BOX, &support)
            .address(slot::NO_BOX, &oppose))
    }
}

/// Outcome of a successful cast or withdraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Booth that settled the operation.
    pub booth: Address,
    /// Card whose ledger changed.
    pub card: u64,
    /// Motion (leaf index) touched.
    pub motion: MotionId,
    /// Card holder.
    pub voter: Address,
    /// Position before the operation.
    pub before: i128,
    /// Position after the operation.
    pub after: i128,
    /// Credits taken from the voter.
    pub credits_debited: u128,
    /// Credits returned to the voter.
    pub credits_refunded: u128,
    /// Vote movements, in the order they settled.
    pub records: Vec<TxRecord>,
    /// Card root after the operation.
    pub root: Digest,
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    token: Address,
    from: Address,
    to: Address,
    amount: u128,
    spender: Option<Address>,
}

#[derive(Debug, Default)]
struct Settlement {
    transfers: Vec<Transfer>,
    card_write: Option<(u64, Digest)>,
}

impl Settlement {
    fn push(&mut self, token: Address, from: Address, to: Address, amount: u128) {
        if amount == 0 || from == to {
            return;
        }
        self.transfers.push(Transfer {
            token,
            from,
            to,
            amount,
            spender: None,
        });
    }

    fn push_delegated(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) {
        if amount == 0 {
            return;
        }
        self.transfers.push(Transfer {
            token,
            from,
            to,
            amount,
            spender: Some(spender),
        });
    }

    // Replays the plan against running balances and allowances so that
    // `apply` cannot fail half-way.
    fn preflight<H: TokenLedger + CardStore>(&self, host: &H, writer: &Address) -> Result<()> {
        let mut balances: HashMap<(Address, Address), u128> = HashMap::new();
        let mut allowances: HashMap<(Address, Address, Address), u128> = HashMap::new();
        for t in &self.transfers {
            if let Some(spender) = t.spender {
                let allowed = allowances
                    .entry((t.token, t.from, spender))
                    .or_insert_with(|| host.allowance(&t.token, &t.from, &spender));
                if *allowed < t.amount {
                    return Err(BallotError::InsufficientAllowance {
                        token: t.token,
                        owner: t.from,
                        spender,
                        needed: t.amount,
                        available: *allowed,
                    });
                }
                *allowed -= t.amount;
            }
            let from = balances
                .entry((t.token, t.from))
                .or_insert_with(|| host.balance_of(&t.token, &t.from));
            if *from < t.amount {
                return Err(BallotError::InsufficientBalance {
                    token: t.token,
                    owner: t.from,
                    needed: t.amount,
                    available: *from,
                });
            }
            *from -= t.amount;
            let to = balances
                .entry((t.token, t.to))
                .or_insert_with(|| host.balance_of(&t.token, &t.to));
            *to = to.checked_add(t.amount).ok_or_else(|| {
                BallotError::ArithmeticOverflow(format!("balance of {} in {}", t.to, t.token))
            })?;
        }
        if let Some((card, _)) = self.card_write {
            if !host.can_write(writer, card)? {
                return Err(BallotError::Unauthorized(format!(
                    "booth {writer} is not approved on card {card}"
                )));
            }
        }
        Ok(())
    }

    fn apply<H: TokenLedger + CardStore>(self, host: &mut H, writer: &Address) -> Result<()> {
        for t in self.transfers {
            match t.spender {
                Some(spender) => {
                    host.transfer_from(&t.token, &spender, &t.from, &t.to, t.amount)?
                }
                None => host.transfer(&t.token, &t.from, &t.to, t.amount)?,
            }
        }
        if let Some((card, root)) = self.card_write {
            host.write_data(writer, card, root)?;
        }
        Ok(())
    }
}

/// One instantiated booth.
#[derive(Debug, Clone)]
pub struct Booth {
    config: BoothConfig,
    params: BoothParams,
    address: Address,
    operator: Address,
    defaults: Arc<DefaultHashes>,
}

impl Booth {
    /// Derives the booth's address from `template` and builds it.
    pub fn instantiate(template: &Template, config: BoothConfig, params: BoothParams) -> Result<Self> {
        config.validate()?;
        let defaults = Arc::new(DefaultHashes::new(config.depth)?);
        Self::instantiate_with(template, config, params, defaults)
    }

    /// Like [`Booth::instantiate`] but reuses precomputed default hashes.
    pub fn instantiate_with(
        template: &Template,
        config: BoothConfig,
        params: BoothParams,
        defaults: Arc<DefaultHashes>,
    ) -> Result<Self> {
        if defaults.depth() != config.depth {
            return Err(BallotError::InvalidTransition(format!(
                "default hashes for depth {} do not match configured depth {}",
                defaults.depth(),
                config.depth
            )));
        }
        defaults.check_index(params.motion)?;
        let address = Self::derive_address(template, &config, &params)?;
        let operator = operator_address(&params.operator_key);
        info!(
            component = "BOOTH",
            evt = "INSTANTIATE",
            booth = %address,
            motion = params.motion,
            two_sided = config.two_sided,
            sink_external = config.sink_is_external
        );
        Ok(Self {
            config,
            params,
            address,
            operator,
            defaults,
        })
    }

    /// Address a booth with these parameters would have, without building it.
    pub fn derive_address(
        template: &Template,
        config: &BoothConfig,
        params: &BoothParams,
    ) -> Result<Address> {
        let deployed = template.specialize(&params.deployment_params(config))?;
        Ok(deployed.specialize(&params.motion_params(config)?)?.address())
    }

    /// Content-derived address; also the booth's reserve account.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Account consolidated balances are swept to.
    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Deployment shape.
    pub fn config(&self) -> &BoothConfig {
        &self.config
    }

    /// Template parameters.
    pub fn params(&self) -> &BoothParams {
        &self.params
    }

    /// Leaf index this booth reads and writes on every card.
    pub fn motion_index(&self) -> u64 {
        self.params.motion
    }

    /// Shared default hashes.
    pub fn defaults(&self) -> &Arc<DefaultHashes> {
        &self.defaults
    }

    /// Root of a card with no positions.
    pub fn empty_root(&self) -> Digest {
        self.defaults.empty_root()
    }

    /// Accumulator holding votes for `side`.
    pub fn accumulator(&self, side: Side) -> Result<Address> {
        if self.config.two_sided {
            return Ok(match side {
                Side::Support => self.params.support,
                Side::Oppose => self.params.oppose,
            });
        }
        if side == self.params.side {
            Ok(self.address)
        } else {
            Err(BallotError::InvalidTransition(format!(
                "booth {} only serves {:?} positions",
                self.address, self.params.side
            )))
        }
    }

    /// Where withdrawn votes go.
    pub fn sink(&self) -> Address {
        if self.config.sink_is_external {
            self.params.collection
        } else {
            self.address
        }
    }

    /// Mints card `id` to `owner` with an empty ledger.
    pub fn issue_card<H: CardStore>(&self, host: &mut H, owner: &Address, id: u64) -> Result<()> {
        host.mint_card(owner, id, self.empty_root())
    }

    /// Root-only view of a card's ledger.
    pub fn card_ledger<H: CardStore>(&self, host: &H, card: u64) -> Result<SparseLedger> {
        Ok(SparseLedger::with_root(
            self.defaults.clone(),
            host.read_data(card)?,
        ))
    }

    /// Moves the caller's position from `before` to `after` at non-decreasing cost.
    pub fn cast<H: TokenLedger + CardStore>(
        &self,
        host: &mut H,
        caller: &Address,
        card: u64,
        proof: &MerkleProof,
        before: i128,
        after: i128,
    ) -> Result<Receipt> {
        let planned = self.plan_cast(host, caller, card, proof, before, after);
        self.commit(host, planned, "CAST")
    }

    /// Moves the caller's position `amount` toward zero and refunds the cost difference.
    pub fn withdraw<H: TokenLedger + CardStore>(
        &self,
        host: &mut H,
        caller: &Address,
        card: u64,
        proof: &MerkleProof,
        before: i128,
        amount: u128,
    ) -> Result<Receipt> {
        let planned = self.plan_withdraw(host, caller, card, proof, before, amount);
        self.commit(host, planned, "WITHDRAW")
    }

    /// Sweeps the booth's whole balance of `token` to the operator.
    ///
    /// Returns the amount swept; an empty balance is a successful no-op.
    pub fn consolidate<H: TokenLedger>(
        &self,
        host: &mut H,
        token: &Address,
        signature: &Signature,
    ) -> Result<u128> {
        let message = consolidation_message(&self.address);
        if let Err(err) = verify_signature(&self.params.operator_key, &message, signature) {
            warn!(component = "BOOTH", evt = "CONSOLIDATE_REJECT", booth = %self.address, error = %err);
            return Err(err);
        }
        let balance = host.balance_of(token, &self.address);
        if balance > 0 {
            host.transfer(token, &self.address, &self.operator, balance)?;
        }
        info!(
            component = "BOOTH",
            evt = "CONSOLIDATE",
            booth = %self.address,
            token = %token,
            amount = %balance
        );
        Ok(balance)
    }

    fn plan_cast<H: TokenLedger + CardStore>(
        &self,
        host: &H,
        caller: &Address,
        card: u64,
        proof: &MerkleProof,
        before: i128,
        after: i128,
    ) -> Result<(Settlement, Receipt)> {
        self.ensure_holder(host, caller, card)?;
        let mut ledger = self.card_ledger(host, card)?;
        let index = self.motion_index();
        ledger.verify(index, before, proof)?;

        let side_before = Side::of(before);
        let side_after = Side::of(after);
        for side in [side_before, side_after].into_iter().flatten() {
            self.accumulator(side)?;
        }
        let cost_before = cost(before)?;
        let cost_after = cost(after)?;
        if cost_after < cost_before {
            return Err(BallotError::InvalidTransition(format!(
                "cast from {before} to {after} lowers cost; withdraw instead"
            )));
        }
        let shrinks = match (side_before, side_after) {
            (Some(_), None) => true,
            (Some(b), Some(a)) if a == b => after.unsigned_abs() < before.unsigned_abs(),
            _ => false,
        };
        if shrinks {
            return Err(BallotError::InvalidTransition(format!(
                "cast from {before} to {after} shrinks the position; withdraw instead"
            )));
        }

        let debit = cost_after - cost_before;
        let mut settlement = Settlement::default();
        let mut records = Vec::new();
        settlement.push_delegated(self.params.credits, self.address, *caller, self.address, debit);
        match (side_before, side_after) {
            (Some(b), Some(a)) if a != b => {
                let released = before.unsigned_abs();
                let acc = self.accumulator(b)?;
                settlement.push(self.params.votes, acc, self.address, released);
                records.push(self.record(TxKind::Withdraw, acc, caller, released));
                let deposited = after.unsigned_abs();
                let acc = self.accumulator(a)?;
                settlement.push(self.params.votes, self.address, acc, deposited);
                records.push(self.record(TxKind::Cast, acc, caller, deposited));
            }
            (_, Some(a)) => {
                let deposited = after.unsigned_abs() - before.unsigned_abs();
                if deposited > 0 {
                    let acc = self.accumulator(a)?;
                    settlement.push(self.params.votes, self.address, acc, deposited);
                    records.push(self.record(TxKind::Cast, acc, caller, deposited));
                }
            }
            (_, None) => {}
        }
        let root = ledger.write(index, before, proof, after)?;
        settlement.card_write = Some((card, root));
        let receipt = Receipt {
            booth: self.address,
            card,
            motion: self.params.motion,
            voter: *caller,
            before,
            after,
            credits_debited: debit,
            credits_refunded: 0,
            records,
            root,
        };
        Ok((settlement, receipt))
    }

    fn plan_withdraw<H: TokenLedger + CardStore>(
        &self,
        host: &H,
        caller: &Address,
        card: u64,
        proof: &MerkleProof,
        before: i128,
        amount: u128,
    ) -> Result<(Settlement, Receipt)> {
        self.ensure_holder(host, caller, card)?;
        let mut ledger = self.card_ledger(host, card)?;
        let index = self.motion_index();
        ledger.verify(index, before, proof)?;

        let magnitude = before.unsigned_abs();
        if amount > magnitude {
            return Err(BallotError::InvalidTransition(format!(
                "withdraw of {amount} exceeds position {before}"
            )));
        }
        let step = i128::try_from(amount)
            .map_err(|_| BallotError::ArithmeticOverflow(format!("withdraw amount {amount}")))?;
        let after = match Side::of(before) {
            Some(Side::Support) => before - step,
            Some(Side::Oppose) => before + step,
            None => before,
        };
        let refund = cost(before)?
            .checked_sub(cost(after)?)
            .ok_or_else(|| BallotError::ArithmeticOverflow(format!("refund {before} -> {after}")))?;

        let mut settlement = Settlement::default();
        let mut records = Vec::new();
        if let Some(side) = Side::of(before) {
            let acc = self.accumulator(side)?;
            settlement.push(self.params.credits, self.address, *caller, refund);
            settlement.push(self.params.votes, acc, self.sink(), amount);
            if amount > 0 {
                records.push(self.record(TxKind::Withdraw, acc, caller, amount));
            }
        }
        let root = ledger.write(index, before, proof, after)?;
        settlement.card_write = Some((card, root));
        let receipt = Receipt {
            booth: self.address,
            card,
            motion: self.params.motion,
            voter: *caller,
            before,
            after,
            credits_debited: 0,
            credits_refunded: refund,
            records,
            root,
        };
        Ok((settlement, receipt))
    }

    fn commit<H: TokenLedger + CardStore>(
        &self,
        host: &mut H,
        planned: Result<(Settlement, Receipt)>,
        evt: &'static str,
    ) -> Result<Receipt> {
        let outcome = planned.and_then(|(settlement, receipt)| {
            settlement.preflight(host, &self.address)?;
            settlement.apply(host, &self.address)?;
            Ok(receipt)
        });
        match &outcome {
            Ok(receipt) => info!(
                component = "BOOTH",
                evt,
                booth = %self.address,
                card = receipt.card,
                before = %receipt.before,
                after = %receipt.after,
                debited = %receipt.credits_debited,
                refunded = %receipt.credits_refunded,
                root = %digest_to_hex(&receipt.root)
            ),
            Err(err) => warn!(component = "BOOTH", evt, booth = %self.address, error = %err, "rejected"),
        }
        outcome
    }

    fn ensure_holder<H: CardStore>(&self, host: &H, caller: &Address, card: u64) -> Result<()> {
        let owner = host.owner_of(card)?;
        if owner != *caller {
            return Err(BallotError::Unauthorized(format!(
                "{caller} does not hold card {card}"
            )));
        }
        Ok(())
    }

    fn record(&self, kind: TxKind, accumulator: Address, voter: &Address, magnitude: u128) -> TxRecord {
        TxRecord {
            kind,
            accumulator,
            voter: *voter,
            magnitude,
            raw: None,
        }
    }
}
