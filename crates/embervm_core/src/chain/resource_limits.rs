use std::collections::HashSet;

use embervm_chainbase::UndoSession;
use spdlog::{debug, info};

use super::{
    Name,
    config::RATE_LIMITING_PRECISION,
    error::ChainError,
    resource::{
        AccountLimits, AccountLimitsByOwnerIndex, AccountResourceLimit, AccountUsage, Quota,
        RamUsage, ResourceLimitsConfig, ResourceLimitsState,
    },
    snapshot::{SnapshotReader, SnapshotWriter},
    utils::chain_assert,
};

/// The accounting API consumed by transaction execution and block
/// production. All state lives in the five resource tables; every method
/// threads an explicit [`UndoSession`] so a failed transaction or block is
/// discarded by unwinding the enclosing session.
pub struct ResourceLimitsManager {}

impl Default for ResourceLimitsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLimitsManager {
    pub fn new() -> Self {
        Self {}
    }

    /// Create the config and state singletons at genesis. Virtual limits
    /// start at the guaranteed floor.
    pub fn initialize_database(&self, session: &mut UndoSession) -> Result<(), ChainError> {
        let config = ResourceLimitsConfig::default();
        config.validate()?;
        session.insert(&config).map_err(|e| {
            ChainError::DatabaseError(format!("failed to insert resource limits config: {}", e))
        })?;

        let mut state = ResourceLimitsState::default();
        state.virtual_cpu_limit = config.cpu_limit_parameters.max;
        state.virtual_net_limit = config.net_limit_parameters.max;
        session.insert(&state).map_err(|e| {
            ChainError::DatabaseError(format!("failed to insert resource limits state: {}", e))
        })?;

        info!(
            "initialized resource limits; virtual cpu limit {} virtual net limit {}",
            state.virtual_cpu_limit, state.virtual_net_limit
        );
        Ok(())
    }

    /// Lazily create the per-account rows with unmetered quotas and zeroed
    /// usage. Idempotent.
    pub fn initialize_account(
        &self,
        session: &mut UndoSession,
        account: Name,
    ) -> Result<(), ChainError> {
        let existing = session
            .find_by_secondary::<AccountLimits, AccountLimitsByOwnerIndex>((false, account))?;
        if existing.is_none() {
            let id = session.generate_id::<AccountLimits>()?;
            let limits = AccountLimits::new(
                id,
                account,
                false,
                Quota::Unlimited,
                Quota::Unlimited,
                Quota::Unlimited,
            );
            session.insert(&limits).map_err(|e| {
                ChainError::DatabaseError(format!("failed to insert account limits: {}", e))
            })?;
        }

        if session.find::<AccountUsage>(account)?.is_none() {
            session.insert(&AccountUsage::new(account)).map_err(|e| {
                ChainError::DatabaseError(format!("failed to insert account usage: {}", e))
            })?;
        }

        if session.find::<RamUsage>(account)?.is_none() {
            session.insert(&RamUsage::new(account)).map_err(|e| {
                ChainError::DatabaseError(format!("failed to insert ram usage: {}", e))
            })?;
        }

        Ok(())
    }

    /// Stage new allowances for `account`. The staged row only affects
    /// aggregate capacity once `process_account_limit_updates` folds it in.
    /// Returns whether the RAM quota decreased, so the caller can re-verify
    /// the ledger.
    pub fn set_account_limits(
        &self,
        session: &mut UndoSession,
        account: Name,
        ram_bytes: Quota,
        net_weight: Quota,
        cpu_weight: Quota,
    ) -> Result<bool, ChainError> {
        let staged = session
            .find_by_secondary::<AccountLimits, AccountLimitsByOwnerIndex>((true, account))?;
        let mut limits = match staged {
            Some(limits) => limits,
            None => {
                let actual = session
                    .find_by_secondary::<AccountLimits, AccountLimitsByOwnerIndex>((
                        false, account,
                    ))?
                    .ok_or_else(|| {
                        ChainError::DatabaseError(format!(
                            "account '{}' has no resource limits",
                            account
                        ))
                    })?;
                let id = session.generate_id::<AccountLimits>()?;
                let staged = AccountLimits::new(
                    id,
                    account,
                    true,
                    actual.ram_bytes,
                    actual.net_weight,
                    actual.cpu_weight,
                );
                session.insert(&staged).map_err(|e| {
                    ChainError::DatabaseError(format!(
                        "failed to stage account limits: {}",
                        e
                    ))
                })?;
                staged
            }
        };

        let decreased_limit = match ram_bytes {
            Quota::Bounded(new_ram) => match limits.ram_bytes {
                Quota::Unlimited => true,
                Quota::Bounded(old_ram) => new_ram < old_ram,
            },
            Quota::Unlimited => false,
        };

        session.modify(&mut limits, |limits| {
            limits.ram_bytes = ram_bytes;
            limits.net_weight = net_weight;
            limits.cpu_weight = cpu_weight;
        })?;

        Ok(decreased_limit)
    }

    /// Current allowances for `account`; staged values win over the actual
    /// row so a decreased RAM quota is enforced immediately.
    pub fn get_account_limits(
        &self,
        session: &mut UndoSession,
        account: Name,
    ) -> Result<(Quota, Quota, Quota), ChainError> {
        let limits = match session
            .find_by_secondary::<AccountLimits, AccountLimitsByOwnerIndex>((true, account))?
        {
            Some(limits) => limits,
            None => session
                .find_by_secondary::<AccountLimits, AccountLimitsByOwnerIndex>((false, account))?
                .ok_or_else(|| {
                    ChainError::DatabaseError(format!(
                        "account '{}' has no resource limits",
                        account
                    ))
                })?,
        };
        Ok((limits.ram_bytes, limits.net_weight, limits.cpu_weight))
    }

    /// Fold every staged limit row into its actual row and the aggregate
    /// weight sums, then drop the staged rows. Capacity queries read stale
    /// weights until this runs; callers invoke it once per block, before
    /// transactions.
    pub fn process_account_limit_updates(
        &self,
        session: &mut UndoSession,
    ) -> Result<(), ChainError> {
        let mut state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        let mut total_ram_bytes = state.total_ram_bytes;
        let mut total_cpu_weight = state.total_cpu_weight;
        let mut total_net_weight = state.total_net_weight;

        let index = session.get_index::<AccountLimits, AccountLimitsByOwnerIndex>();
        let mut itr = index.lower_bound((true, Name::new(0)));
        while let Some(staged) = itr.next()? {
            if !staged.pending {
                break;
            }
            let mut actual = session
                .find_by_secondary::<AccountLimits, AccountLimitsByOwnerIndex>((
                    false,
                    staged.owner,
                ))?
                .ok_or_else(|| {
                    ChainError::InternalError(Some(format!(
                        "account '{}' has staged limits but no actual limits",
                        staged.owner
                    )))
                })?;

            update_total(&mut total_ram_bytes, actual.ram_bytes, staged.ram_bytes, "ram_bytes")?;
            update_total(
                &mut total_cpu_weight,
                actual.cpu_weight,
                staged.cpu_weight,
                "cpu_weight",
            )?;
            update_total(
                &mut total_net_weight,
                actual.net_weight,
                staged.net_weight,
                "net_weight",
            )?;

            let (ram_bytes, net_weight, cpu_weight) =
                (staged.ram_bytes, staged.net_weight, staged.cpu_weight);
            session.modify(&mut actual, |actual| {
                actual.ram_bytes = ram_bytes;
                actual.net_weight = net_weight;
                actual.cpu_weight = cpu_weight;
            })?;
            session.remove(staged)?;
        }

        session.modify(&mut state, |state| {
            state.total_ram_bytes = total_ram_bytes;
            state.total_cpu_weight = total_cpu_weight;
            state.total_net_weight = total_net_weight;
        })?;
        Ok(())
    }

    /// Bill `cpu_usage` and `net_usage` to every authorizing account and to
    /// the open block, rejecting the transaction if any account's smoothed
    /// usage would exceed its proportional share or the block would exceed
    /// the current virtual limit. All checks run before the block totals
    /// are written; the caller unwinds the transaction's session on error.
    pub fn add_transaction_usage(
        &self,
        session: &mut UndoSession,
        accounts: &HashSet<Name>,
        cpu_usage: u64,
        net_usage: u64,
        ordinal: u32,
    ) -> Result<(), ChainError> {
        let mut state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        let config = session.get::<ResourceLimitsConfig>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits config is missing".to_string())
        })?;

        for account in accounts {
            let (_, net_weight, cpu_weight) = self.get_account_limits(session, *account)?;
            let mut usage = session.get::<AccountUsage>(*account).map_err(|_| {
                ChainError::DatabaseError(format!(
                    "account '{}' has no resource usage",
                    account
                ))
            })?;

            let mut cpu_after = usage.cpu_usage;
            let mut net_after = usage.net_usage;
            cpu_after.add(
                cpu_usage,
                ordinal,
                config.account_cpu_usage_average_window as u64,
            )?;
            net_after.add(
                net_usage,
                ordinal,
                config.account_net_usage_average_window as u64,
            )?;
            session.modify(&mut usage, |usage| {
                usage.cpu_usage = cpu_after;
                usage.net_usage = net_after;
            })?;

            if let Quota::Bounded(cpu_weight) = cpu_weight {
                if state.total_cpu_weight > 0 {
                    // extend to 128 bits over the window so the proportional
                    // share keeps full precision
                    let window_size = config.account_cpu_usage_average_window as u128;
                    let virtual_capacity_in_window =
                        state.virtual_cpu_limit as u128 * window_size;
                    let cpu_used_in_window = cpu_after.value_ex as u128 * window_size
                        / RATE_LIMITING_PRECISION as u128;
                    let max_user_use_in_window = virtual_capacity_in_window * cpu_weight as u128
                        / state.total_cpu_weight as u128;
                    chain_assert(
                        cpu_used_in_window <= max_user_use_in_window,
                        ChainError::TxCpuUsageExceeded(*account),
                    )?;
                }
            }

            if let Quota::Bounded(net_weight) = net_weight {
                if state.total_net_weight > 0 {
                    let window_size = config.account_net_usage_average_window as u128;
                    let virtual_capacity_in_window =
                        state.virtual_net_limit as u128 * window_size;
                    let net_used_in_window = net_after.value_ex as u128 * window_size
                        / RATE_LIMITING_PRECISION as u128;
                    let max_user_use_in_window = virtual_capacity_in_window * net_weight as u128
                        / state.total_net_weight as u128;
                    chain_assert(
                        net_used_in_window <= max_user_use_in_window,
                        ChainError::TxNetUsageExceeded(*account),
                    )?;
                }
            }
        }

        // account for the transaction in the open block, and do not let the
        // block run past the limits fixed at its opening
        let pending_cpu_usage = state.pending_cpu_usage.checked_add(cpu_usage).ok_or_else(|| {
            ChainError::InvalidArgument("overflow in pending block cpu usage".to_string())
        })?;
        let pending_net_usage = state.pending_net_usage.checked_add(net_usage).ok_or_else(|| {
            ChainError::InvalidArgument("overflow in pending block net usage".to_string())
        })?;
        chain_assert(
            pending_cpu_usage <= state.virtual_cpu_limit,
            ChainError::BlockResourceExhausted("cpu".to_string()),
        )?;
        chain_assert(
            pending_net_usage <= state.virtual_net_limit,
            ChainError::BlockResourceExhausted("net".to_string()),
        )?;
        session.modify(&mut state, |state| {
            state.pending_cpu_usage = pending_cpu_usage;
            state.pending_net_usage = pending_net_usage;
        })?;

        Ok(())
    }

    /// Close the block's accounting: integrate the pending totals into the
    /// block averages, run the elastic controller for both resources, and
    /// zero the pending totals for the next block.
    pub fn process_block_usage(
        &self,
        session: &mut UndoSession,
        block_ordinal: u32,
    ) -> Result<(), ChainError> {
        let config = session.get::<ResourceLimitsConfig>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits config is missing".to_string())
        })?;
        let mut state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;

        let mut next = state.clone();
        next.average_block_cpu_usage.add(
            next.pending_cpu_usage,
            block_ordinal,
            config.cpu_limit_parameters.periods as u64,
        )?;
        next.update_virtual_cpu_limit(&config)?;
        next.pending_cpu_usage = 0;

        next.average_block_net_usage.add(
            next.pending_net_usage,
            block_ordinal,
            config.net_limit_parameters.periods as u64,
        )?;
        next.update_virtual_net_limit(&config)?;
        next.pending_net_usage = 0;

        debug!(
            "closed block {}; virtual cpu limit {} virtual net limit {}",
            block_ordinal, next.virtual_cpu_limit, next.virtual_net_limit
        );

        session.modify(&mut state, move |state| *state = next)?;
        Ok(())
    }

    /// Apply a signed delta to the RAM ledger. Underflow or overflow means
    /// a bug upstream (for example a double free) and is never clamped.
    pub fn add_pending_ram_usage(
        &self,
        session: &mut UndoSession,
        account: Name,
        ram_delta: i64,
    ) -> Result<(), ChainError> {
        if ram_delta == 0 {
            return Ok(());
        }

        let mut usage = session.get::<RamUsage>(account).map_err(|_| {
            ChainError::DatabaseError(format!("account '{}' has no ram usage", account))
        })?;

        let new_usage = usage.ram_usage.checked_add_signed(ram_delta).ok_or_else(|| {
            ChainError::TransactionError(format!(
                "ram usage delta would underflow or overflow for account '{}'",
                account
            ))
        })?;

        session.modify(&mut usage, |usage| {
            usage.ram_usage = new_usage;
        })?;

        Ok(())
    }

    pub fn verify_account_ram_usage(
        &self,
        session: &mut UndoSession,
        account: Name,
    ) -> Result<(), ChainError> {
        let (ram_bytes, _, _) = self.get_account_limits(session, account)?;
        let usage = session.get::<RamUsage>(account).map_err(|_| {
            ChainError::DatabaseError(format!("account '{}' has no ram usage", account))
        })?;

        if let Quota::Bounded(quota) = ram_bytes {
            chain_assert(
                usage.ram_usage <= quota,
                ChainError::RamUsageExceeded(account, usage.ram_usage, quota),
            )?;
        }
        Ok(())
    }

    pub fn get_account_ram_usage(
        &self,
        session: &mut UndoSession,
        account: Name,
    ) -> Result<u64, ChainError> {
        let usage = session.get::<RamUsage>(account).map_err(|_| {
            ChainError::DatabaseError(format!("account '{}' has no ram usage", account))
        })?;
        Ok(usage.ram_usage)
    }

    /// The account's share of the virtual CPU limit under current
    /// congestion. Pass the current ordinal to read the average as if the
    /// idle blocks since the account's last activity had already decayed it.
    pub fn get_account_cpu_limit(
        &self,
        session: &mut UndoSession,
        account: Name,
        current_ordinal: Option<u32>,
    ) -> Result<AccountResourceLimit, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        let config = session.get::<ResourceLimitsConfig>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits config is missing".to_string())
        })?;
        let usage = session.get::<AccountUsage>(account).map_err(|_| {
            ChainError::DatabaseError(format!("account '{}' has no resource usage", account))
        })?;
        let (_, _, cpu_weight) = self.get_account_limits(session, account)?;

        let window_size = config.account_cpu_usage_average_window as u64;
        let used = match current_ordinal {
            Some(ordinal) => usage.cpu_usage.decayed_average(ordinal, window_size)?,
            None => usage.cpu_usage.average(),
        };
        let max = proportional_share(state.virtual_cpu_limit, cpu_weight, state.total_cpu_weight);
        Ok(AccountResourceLimit::new(used, max.saturating_sub(used), max))
    }

    /// The account's share of the virtual NET limit under current
    /// congestion. Mirrors [`ResourceLimitsManager::get_account_cpu_limit`].
    pub fn get_account_net_limit(
        &self,
        session: &mut UndoSession,
        account: Name,
        current_ordinal: Option<u32>,
    ) -> Result<AccountResourceLimit, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        let config = session.get::<ResourceLimitsConfig>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits config is missing".to_string())
        })?;
        let usage = session.get::<AccountUsage>(account).map_err(|_| {
            ChainError::DatabaseError(format!("account '{}' has no resource usage", account))
        })?;
        let (_, net_weight, _) = self.get_account_limits(session, account)?;

        let window_size = config.account_net_usage_average_window as u64;
        let used = match current_ordinal {
            Some(ordinal) => usage.net_usage.decayed_average(ordinal, window_size)?,
            None => usage.net_usage.average(),
        };
        let max = proportional_share(state.virtual_net_limit, net_weight, state.total_net_weight);
        Ok(AccountResourceLimit::new(used, max.saturating_sub(used), max))
    }

    pub fn get_virtual_block_cpu_limit(
        &self,
        session: &mut UndoSession,
    ) -> Result<u64, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        Ok(state.virtual_cpu_limit)
    }

    pub fn get_virtual_block_net_limit(
        &self,
        session: &mut UndoSession,
    ) -> Result<u64, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        Ok(state.virtual_net_limit)
    }

    /// CPU headroom left in the open block.
    pub fn get_block_cpu_limit(&self, session: &mut UndoSession) -> Result<u64, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        Ok(state.virtual_cpu_limit.saturating_sub(state.pending_cpu_usage))
    }

    /// NET headroom left in the open block.
    pub fn get_block_net_limit(&self, session: &mut UndoSession) -> Result<u64, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        Ok(state.virtual_net_limit.saturating_sub(state.pending_net_usage))
    }

    pub fn get_total_cpu_weight(&self, session: &mut UndoSession) -> Result<u64, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        Ok(state.total_cpu_weight)
    }

    pub fn get_total_net_weight(&self, session: &mut UndoSession) -> Result<u64, ChainError> {
        let state = session.get::<ResourceLimitsState>(0).map_err(|_| {
            ChainError::DatabaseError("resource limits state is missing".to_string())
        })?;
        Ok(state.total_net_weight)
    }

    /// Dump all five resource tables in table order, rows ascending by
    /// primary key, for deterministic full-state snapshots.
    pub fn add_to_snapshot(
        &self,
        session: &UndoSession,
        writer: &mut SnapshotWriter,
    ) -> Result<(), ChainError> {
        writer.add_section::<ResourceLimitsConfig>(session)?;
        writer.add_section::<ResourceLimitsState>(session)?;
        writer.add_section::<AccountLimits>(session)?;
        writer.add_section::<AccountUsage>(session)?;
        writer.add_section::<RamUsage>(session)?;
        Ok(())
    }

    /// Restore all five resource tables from a snapshot produced by
    /// [`ResourceLimitsManager::add_to_snapshot`], in the same order.
    pub fn read_from_snapshot(
        &self,
        session: &mut UndoSession,
        reader: &mut SnapshotReader,
    ) -> Result<(), ChainError> {
        reader.read_section::<ResourceLimitsConfig>(session)?;
        reader.read_section::<ResourceLimitsState>(session)?;
        reader.read_section::<AccountLimits>(session)?;
        reader.read_section::<AccountUsage>(session)?;
        reader.read_section::<RamUsage>(session)?;
        Ok(())
    }
}

fn proportional_share(virtual_limit: u64, weight: Quota, total_weight: u64) -> u64 {
    match weight {
        Quota::Unlimited => virtual_limit,
        Quota::Bounded(weight) => {
            if total_weight == 0 {
                0
            } else {
                (virtual_limit as u128 * weight as u128 / total_weight as u128) as u64
            }
        }
    }
}

fn update_total(
    total: &mut u64,
    value: Quota,
    staged_value: Quota,
    which: &str,
) -> Result<(), ChainError> {
    if let Quota::Bounded(value) = value {
        *total = total.checked_sub(value).ok_or_else(|| {
            ChainError::InternalError(Some(format!(
                "underflow when reverting old {} from the aggregate total",
                which
            )))
        })?;
    }
    if let Quota::Bounded(staged_value) = staged_value {
        *total = total.checked_add(staged_value).ok_or_else(|| {
            ChainError::InternalError(Some(format!(
                "overflow when applying new {} to the aggregate total",
                which
            )))
        })?;
    }
    Ok(())
}
