#[cfg(test)]
mod unittests;

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use embervm_chainbase::{Database, UndoSession};
    use embervm_core::chain::{
        Name, ResourceLimitsManager,
        error::ChainError,
        resource::{
            AccountLimits, AccountUsage, Quota, RamUsage, ResourceLimitsConfig,
            ResourceLimitsState,
        },
        utils::prepare_db_object,
    };
    use tempfile::TempDir;

    /// Shared fixture: a scratch database with the resource tables
    /// initialized, driven the way the block-processing pipeline drives the
    /// real thing.
    pub struct Testing {
        pub db: Database,
        pub resource_limits_manager: ResourceLimitsManager,
        _dir: TempDir,
    }

    impl Testing {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().expect("failed to create temp dir");
            let db = Database::temporary(dir.path()).expect("failed to open database");
            prepare_db_object::<ResourceLimitsConfig>(&db).expect("failed to prepare partitions");
            prepare_db_object::<ResourceLimitsState>(&db).expect("failed to prepare partitions");
            prepare_db_object::<AccountLimits>(&db).expect("failed to prepare partitions");
            prepare_db_object::<AccountUsage>(&db).expect("failed to prepare partitions");
            prepare_db_object::<RamUsage>(&db).expect("failed to prepare partitions");
            Testing {
                db,
                resource_limits_manager: ResourceLimitsManager::new(),
                _dir: dir,
            }
        }

        /// Open an undo session with the config and state singletons created.
        pub fn start(&self) -> UndoSession {
            let mut session = self.db.undo_session().expect("failed to open undo session");
            self.resource_limits_manager
                .initialize_database(&mut session)
                .expect("failed to initialize resource limits");
            session
        }

        pub fn create_account(&self, session: &mut UndoSession, name: &str) -> Name {
            let account: Name = name.parse().expect("invalid account name");
            self.resource_limits_manager
                .initialize_account(session, account)
                .expect("failed to initialize account");
            account
        }

        pub fn set_weights(
            &self,
            session: &mut UndoSession,
            account: Name,
            net_weight: Quota,
            cpu_weight: Quota,
        ) {
            self.resource_limits_manager
                .set_account_limits(session, account, Quota::Unlimited, net_weight, cpu_weight)
                .expect("failed to set account limits");
        }

        /// Bill one transaction inside its own nested session, the way the
        /// producer applies speculative transactions: kept on success,
        /// unwound exactly on failure.
        pub fn push_usage(
            &self,
            session: &mut UndoSession,
            account: Name,
            cpu_usage: u64,
            net_usage: u64,
            ordinal: u32,
        ) -> Result<(), ChainError> {
            let tx_session = session.start_undo_session();
            let mut accounts = HashSet::new();
            accounts.insert(account);
            match self.resource_limits_manager.add_transaction_usage(
                session,
                &accounts,
                cpu_usage,
                net_usage,
                ordinal,
            ) {
                Ok(()) => {
                    tx_session.squash().expect("failed to squash tx session");
                    Ok(())
                }
                Err(e) => {
                    tx_session.undo().expect("failed to undo tx session");
                    Err(e)
                }
            }
        }
    }
}
