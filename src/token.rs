//! Fungible-balance and mutable-data-card collaborators.
//!
//! The ballot state machine only talks to the host ledger through
//! [`TokenLedger`] and [`CardStore`].  [`MemoryHost`] implements both over
//! in-memory maps and is what the simulator and tests settle against.

use crate::address::Address;
use crate::error::{BallotError, Result};
use crate::smt::Digest;
use std::collections::{BTreeMap, BTreeSet};

/// Multi-token fungible balance ledger.
pub trait TokenLedger {
    /// Balance of `owner` in `token`.
    fn balance_of(&self, token: &Address, owner: &Address) -> u128;

    /// Amount `spender` may move out of `owner`'s balance.
    fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> u128;

    /// Sets `spender`'s allowance over `owner`'s balance.
    fn approve(&mut self, token: &Address, owner: &Address, spender: &Address, amount: u128);

    /// Moves `amount` from `from` to `to`.
    fn transfer(&mut self, token: &Address, from: &Address, to: &Address, amount: u128)
        -> Result<()>;

    /// Moves `amount` from `from` to `to`, consuming `spender`'s allowance.
    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<()>;

    /// Creates `amount` new units for `to`.
    fn mint(&mut self, token: &Address, to: &Address, amount: u128) -> Result<()>;
}

/// Store of owner-held cards, each carrying one 32-byte payload.
pub trait CardStore {
    /// Mints card `id` to `owner` with an initial payload.
    fn mint_card(&mut self, owner: &Address, id: u64, data: Digest) -> Result<()>;

    /// Adds `spender` to the accounts allowed to write card `id`'s payload;
    /// only the owner may approve.
    fn approve_card(&mut self, owner: &Address, spender: &Address, id: u64) -> Result<()>;

    /// Current holder of card `id`.
    fn owner_of(&self, id: u64) -> Result<Address>;

    /// `true` when `caller` may write card `id`.
    fn can_write(&self, caller: &Address, id: u64) -> Result<bool>;

    /// Current payload of card `id`.
    fn read_data(&self, id: u64) -> Result<Digest>;

    /// Replaces card `id`'s payload; owner or approved spender only.
    fn write_data(&mut self, caller: &Address, id: u64, data: Digest) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct TokenBook {
    balances: BTreeMap<Address, u128>,
    allowances: BTreeMap<Address, BTreeMap<Address, u128>>,
}

/// Card record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Current holder.
    pub owner: Address,
    /// Accounts allowed to write the payload besides the owner.
    pub approved: BTreeSet<Address>,
    /// Payload; for ballot cards, a sparse ledger root.
    pub data: Digest,
}

/// In-memory host ledger.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    tokens: BTreeMap<Address, TokenBook>,
    cards: BTreeMap<u64, Card>,
}

impl MemoryHost {
    /// Empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Card record if minted.
    pub fn card(&self, id: u64) -> Option<&Card> {
        self.cards.get(&id)
    }

    /// Hands card `id` to a new holder, clearing its approvals.
    pub fn transfer_card(&mut self, from: &Address, to: &Address, id: u64) -> Result<()> {
        let card = self.cards.get_mut(&id).ok_or(BallotError::UnknownCard(id))?;
        if card.owner != *from {
            return Err(BallotError::Unauthorized(format!(
                "{from} does not hold card {id}"
            )));
        }
        card.owner = *to;
        card.approved.clear();
        Ok(())
    }

    /// Sum of every balance of `token`.
    pub fn total_supply(&self, token: &Address) -> u128 {
        self.tokens
            .get(token)
            .map(|book| book.balances.values().copied().sum())
            .unwrap_or(0)
    }

    fn book(&mut self, token: &Address) -> &mut TokenBook {
        self.tokens.entry(*token).or_default()
    }

    fn debit(&mut self, token: &Address, owner: &Address, amount: u128) -> Result<()> {
        let book = self.book(token);
        let balance = book.balances.entry(*owner).or_default();
        if *balance < amount {
            return Err(BallotError::InsufficientBalance {
                token: *token,
                owner: *owner,
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&mut self, token: &Address, owner: &Address, amount: u128) -> Result<()> {
        let balance = self.book(token).balances.entry(*owner).or_default();
        *balance = balance.checked_add(amount).ok_or_else(|| {
            BallotError::ArithmeticOverflow(format!("balance of {owner} in {token}"))
        })?;
        Ok(())
    }
}

impl TokenLedger for MemoryHost {
    fn balance_of(&self, token: &Address, owner: &Address) -> u128 {
        self.tokens
            .get(token)
            .and_then(|book| book.balances.get(owner))
            .copied()
            .unwrap_or(0)
    }

    fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> u128 {
        self.tokens
            .get(token)
            .and_then(|book| book.allowances.get(owner))
            .and_then(|grants| grants.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn approve(&mut self, token: &Address, owner: &Address, spender: &Address, amount: u128) {
        self.book(token)
            .allowances
            .entry(*owner)
            .or_default()
            .insert(*spender, amount);
    }

    fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<()> {
        if self.balance_of(token, from) < amount {
            return Err(BallotError::InsufficientBalance {
                token: *token,
                owner: *from,
                needed: amount,
                available: self.balance_of(token, from),
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        // overflow is checked before the debit so a failed credit cannot burn funds
        self.balance_of(token, to).checked_add(amount).ok_or_else(|| {
            BallotError::ArithmeticOverflow(format!("balance of {to} in {token}"))
        })?;
        self.debit(token, from, amount)?;
        self.credit(token, to, amount)
    }

    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<()> {
        let allowed = self.allowance(token, from, spender);
        if allowed < amount {
            return Err(BallotError::InsufficientAllowance {
                token: *token,
                owner: *from,
                spender: *spender,
                needed: amount,
                available: allowed,
            });
        }
        self.transfer(token, from, to, amount)?;
        self.approve(token, from, spender, allowed - amount);
        Ok(())
    }

    fn mint(&mut self, token: &Address, to: &Address, amount: u128) -> Result<()> {
        self.credit(token, to, amount)
    }
}

impl CardStore for MemoryHost {
    fn mint_card(&mut self, owner: &Address, id: u64, data: Digest) -> Result<()> {
        if self.cards.contains_key(&id) {
            return Err(BallotError::DuplicateCard { id });
        }
        self.cards.insert(
            id,
            Card {
                owner: *owner,
                approved: BTreeSet::new(),
                data,
            },
        );
        Ok(())
    }

    fn approve_card(&mut self, owner: &Address, spender: &Address, id: u64) -> Result<()> {
        let card = self.cards.get_mut(&id).ok_or(BallotError::UnknownCard(id))?;
        if card.owner != *owner {
            return Err(BallotError::Unauthorized(format!(
                "{owner} cannot approve card {id}"
            )));
        }
        card.approved.insert(*spender);
        Ok(())
    }

    fn owner_of(&self, id: u64) -> Result<Address> {
        self.cards
            .get(&id)
            .map(|card| card.owner)
            .ok_or(BallotError::UnknownCard(id))
    }

    fn can_write(&self, caller: &Address, id: u64) -> Result<bool> {
        let card = self.cards.get(&id).ok_or(BallotError::UnknownCard(id))?;
        Ok(card.owner == *caller || card.approved.contains(caller))
    }

    fn read_data(&self, id: u64) -> Result<Digest> {
        self.cards
            .get(&id)
            .map(|card| card.data)
            .ok_or(BallotError::UnknownCard(id))
    }

    fn write_data(&mut self, caller: &Address, id: u64, data: Digest) -> Result<()> {
        if !self.can_write(caller, id)? {
            return Err(BallotError::Unauthorized(format!(
                "{caller} may not write card {id}"
            )));
        }
        if let Some(card) = self.cards.get_mut(&id) {
            card.data = data;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[test]
    fn transfer_moves_balance_and_rejects_overdraw() {
        let mut host = MemoryHost::new();
        let token = addr(1);
        host.mint(&token, &addr(2), 100).unwrap();
        host.transfer(&token, &addr(2), &addr(3), 60).unwrap();
        assert_eq!(host.balance_of(&token, &addr(2)), 40);
        assert_eq!(host.balance_of(&token, &addr(3)), 60);
        let err = host.transfer(&token, &addr(2), &addr(3), 41).unwrap_err();
        assert!(matches!(err, BallotError::InsufficientBalance { needed: 41, available: 40, .. }));
        assert_eq!(host.total_supply(&token), 100);
    }

    #[test]
    fn transfer_from_consumes_allowance() {
        let mut host = MemoryHost::new();
        let token = addr(1);
        host.mint(&token, &addr(2), 100).unwrap();
        host.approve(&token, &addr(2), &addr(9), 30);
        host.transfer_from(&token, &addr(9), &addr(2), &addr(9), 25)
            .unwrap();
        assert_eq!(host.allowance(&token, &addr(2), &addr(9)), 5);
        assert!(host
            .transfer_from(&token, &addr(9), &addr(2), &addr(9), 6)
            .is_err());
        assert_eq!(host.balance_of(&token, &addr(2)), 75);
    }

    #[test]
    fn card_writes_need_owner_or_approval() {
        let mut host = MemoryHost::new();
        host.mint_card(&addr(2), 123, [0u8; 32]).unwrap();
        assert!(host.mint_card(&addr(3), 123, [0u8; 32]).is_err());
        assert!(host.write_data(&addr(9), 123, [1u8; 32]).is_err());
        assert!(host.approve_card(&addr(9), &addr(9), 123).is_err());
        host.approve_card(&addr(2), &addr(9), 123).unwrap();
        host.write_data(&addr(9), 123, [1u8; 32]).unwrap();
        assert_eq!(host.read_data(123).unwrap(), [1u8; 32]);

        host.transfer_card(&addr(2), &addr(4), 123).unwrap();
        assert_eq!(host.owner_of(123).unwrap(), addr(4));
        assert!(!host.can_write(&addr(9), 123).unwrap());
        assert!(matches!(host.read_data(7), Err(BallotError::UnknownCard(7))));
    }
}
