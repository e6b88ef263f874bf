use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::BTreeMap;

use super::crypto::Address;
use super::transaction::Transaction;

/// Balance granted to every newly opened account
pub const STARTING_BALANCE: u64 = 100;

/// Errors that can occur during account operations
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    AccountNotFound(Address),

    #[error("Account already exists: {0}")]
    DuplicateAccount(Address),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Balance overflow crediting {0}")]
    BalanceOverflow(Address),
}

/// Represents a participant profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// The account's address
    pub address: Address,

    /// Optional display label
    pub name: Option<String>,

    /// The account's balance
    pub balance: u64,

    /// Free-form profile data
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
}

impl Account {
    /// Creates a new account holding the starting grant
    pub fn new(address: Address) -> Self {
        Account {
            address,
            name: None,
            balance: STARTING_BALANCE,
            data: Map::new(),
        }
    }

    /// Checks if the account can pay `amount`
    pub fn has_sufficient_balance(&self, amount: u64) -> bool {
        self.balance >= amount
    }

    /// Decreases the account's balance
    ///
    /// # Returns
    ///
    /// `InsufficientBalance` without touching the balance when `amount`
    /// exceeds it
    pub fn withdraw(&mut self, amount: u64) -> Result<(), AccountError> {
        if !self.has_sufficient_balance(amount) {
            return Err(AccountError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }

        self.balance -= amount;
        Ok(())
    }

    /// Increases the account's balance
    pub fn deposit(&mut self, amount: u64) -> Result<(), AccountError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| AccountError::BalanceOverflow(self.address.clone()))?;
        Ok(())
    }

    pub fn edit_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    /// Merges `data` into the profile; existing keys are overwritten,
    /// others are preserved
    pub fn merge_data(&mut self, data: &Map<String, Value>) {
        for (key, value) in data {
            self.data.insert(key.clone(), value.clone());
        }
    }
}

/// Ledger of all accounts known to a chain store
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    accounts: BTreeMap<Address, Account>,

    /// Fees routed to the treasury
    treasury: u64,

    /// Total value created by grants and treasury credits
    issued: u64,
}

impl AccountState {
    /// Creates an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new account with the starting grant
    ///
    /// # Returns
    ///
    /// `DuplicateAccount` if the address is already registered or is the
    /// treasury; the ledger is left unchanged in that case
    pub fn register(&mut self, address: Address) -> Result<&Account, AccountError> {
        if address.is_network() || self.accounts.contains_key(&address) {
            return Err(AccountError::DuplicateAccount(address));
        }

        self.issued = self
            .issued
            .checked_add(STARTING_BALANCE)
            .ok_or_else(|| AccountError::BalanceOverflow(address.clone()))?;
        Ok(self.accounts.entry(address.clone()).or_insert_with(|| Account::new(address)))
    }

    /// Gets an account by address
    pub fn get(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Applies a transaction to the ledger.
    ///
    /// Treasury-authored transactions credit their destination without
    /// debiting anyone. Any other transaction debits `amount` from `handle`
    /// and credits `destination`, or the treasury when the destination is
    /// [`Address::network`]. Transactions paid to the treasury also carry
    /// profile edits, which are applied to the originator.
    ///
    /// Either the whole transaction is applied or nothing changes.
    pub fn apply(&mut self, transaction: &Transaction) -> Result<(), AccountError> {
        if transaction.is_network_issued() {
            if !transaction.destination.is_network() {
                self.check_credit(&transaction.destination, transaction.amount, true)?;
                self.credit(&transaction.destination, transaction.amount)?;
                self.issued += transaction.amount;
            }
            return Ok(());
        }

        let sender = self
            .accounts
            .get(&transaction.handle)
            .ok_or_else(|| AccountError::AccountNotFound(transaction.handle.clone()))?;

        if !sender.has_sufficient_balance(transaction.amount) {
            return Err(AccountError::InsufficientBalance {
                required: transaction.amount,
                available: sender.balance,
            });
        }

        if transaction.destination.is_network() {
            let treasury = self
                .treasury
                .checked_add(transaction.amount)
                .ok_or_else(|| AccountError::BalanceOverflow(Address::network()))?;

            let sender = self.account_mut(&transaction.handle)?;
            sender.withdraw(transaction.amount)?;
            if let Some(name) = transaction.edited_name() {
                sender.edit_name(name);
            }
            if let Some(data) = transaction.edited_data() {
                sender.merge_data(data);
            }
            self.treasury = treasury;
        } else if transaction.destination != transaction.handle {
            self.check_credit(&transaction.destination, transaction.amount, false)?;

            self.account_mut(&transaction.handle)?.withdraw(transaction.amount)?;
            self.credit(&transaction.destination, transaction.amount)?;
        }

        Ok(())
    }

    /// Checks that crediting `amount` to `address` overflows neither its
    /// balance nor the issuance counter, counting the grant of a new account.
    /// `minting` adds `amount` itself to issuance.
    fn check_credit(&self, address: &Address, amount: u64, minting: bool) -> Result<(), AccountError> {
        let overflow = || AccountError::BalanceOverflow(address.clone());
        let (balance, grant) = match self.accounts.get(address) {
            Some(account) => (account.balance, 0),
            None => (STARTING_BALANCE, STARTING_BALANCE),
        };
        let minted = if minting { amount } else { 0 };

        balance.checked_add(amount).ok_or_else(overflow)?;
        self.issued
            .checked_add(grant)
            .and_then(|issued| issued.checked_add(minted))
            .ok_or_else(overflow)?;
        Ok(())
    }

    /// Credits an address, opening its account first when it has none
    fn credit(&mut self, address: &Address, amount: u64) -> Result<(), AccountError> {
        if !self.accounts.contains_key(address) {
            self.register(address.clone())?;
        }
        self.account_mut(address)?.deposit(amount)
    }

    fn account_mut(&mut self, address: &Address) -> Result<&mut Account, AccountError> {
        self.accounts
            .get_mut(address)
            .ok_or_else(|| AccountError::AccountNotFound(address.clone()))
    }

    /// Gets all accounts ordered by address
    pub fn all(&self) -> Vec<Account> {
        self.accounts.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Sum of every account balance
    #[cfg(test)]
    pub fn total_balance(&self) -> u64 {
        self.accounts.values().map(|account| account.balance).sum()
    }

    /// Fees collected by the treasury
    #[cfg(test)]
    pub fn treasury(&self) -> u64 {
        self.treasury
    }

    /// Value created by grants and treasury credits
    #[cfg(test)]
    pub fn issued(&self) -> u64 {
        self.issued
    }
}
