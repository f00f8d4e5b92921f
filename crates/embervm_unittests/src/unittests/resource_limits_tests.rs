#[cfg(test)]
mod resource_limits_tests {
    use anyhow::Result;
    use embervm_core::chain::{
        SnapshotReader, SnapshotWriter,
        error::ChainError,
        resource::Quota,
    };

    use crate::tests::Testing;

    #[test]
    fn initialize_account_is_idempotent() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        chain
            .resource_limits_manager
            .initialize_account(&mut session, alice)?;

        let limits = chain
            .resource_limits_manager
            .get_account_limits(&mut session, alice)?;
        assert_eq!(limits, (Quota::Unlimited, Quota::Unlimited, Quota::Unlimited));
        assert_eq!(
            chain
                .resource_limits_manager
                .get_account_ram_usage(&mut session, alice)?,
            0
        );
        Ok(())
    }

    #[test]
    fn weights_are_stale_until_limit_updates_run() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        chain.set_weights(&mut session, alice, Quota::Bounded(1), Quota::Bounded(1));

        // staged but not folded in: the weight sum is still zero, so the
        // bounded account has no capacity yet
        let limit = chain
            .resource_limits_manager
            .get_account_cpu_limit(&mut session, alice, None)?;
        assert_eq!(limit.max, 0);
        assert_eq!(
            chain
                .resource_limits_manager
                .get_total_cpu_weight(&mut session)?,
            0
        );

        chain
            .resource_limits_manager
            .process_account_limit_updates(&mut session)?;
        assert_eq!(
            chain
                .resource_limits_manager
                .get_total_cpu_weight(&mut session)?,
            1
        );
        Ok(())
    }

    #[test]
    fn proportional_shares_follow_the_weights() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let weights = [("alice", 1u64), ("bob", 2u64), ("carol", 3u64)];
        for (name, weight) in weights {
            let account = chain.create_account(&mut session, name);
            chain.set_weights(
                &mut session,
                account,
                Quota::Bounded(weight),
                Quota::Bounded(weight),
            );
        }
        chain
            .resource_limits_manager
            .process_account_limit_updates(&mut session)?;

        let virtual_limit = chain
            .resource_limits_manager
            .get_virtual_block_cpu_limit(&mut session)?;
        assert_eq!(virtual_limit, 200_000);

        let total = chain
            .resource_limits_manager
            .get_total_cpu_weight(&mut session)?;
        assert_eq!(total, 6);

        for (name, weight) in weights {
            let account = name.parse()?;
            let limit = chain
                .resource_limits_manager
                .get_account_cpu_limit(&mut session, account, None)?;
            assert_eq!(limit.max, virtual_limit * weight / total);
            assert_eq!(limit.used, 0);
            assert_eq!(limit.available, limit.max);
        }
        Ok(())
    }

    #[test]
    fn unlimited_accounts_get_the_full_virtual_limit() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let bob = chain.create_account(&mut session, "bob");
        chain.set_weights(&mut session, bob, Quota::Bounded(5), Quota::Bounded(5));
        chain
            .resource_limits_manager
            .process_account_limit_updates(&mut session)?;

        let limit = chain
            .resource_limits_manager
            .get_account_cpu_limit(&mut session, alice, None)?;
        assert_eq!(limit.max, 200_000);
        Ok(())
    }

    #[test]
    fn set_account_limits_reports_ram_decreases() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let manager = &chain.resource_limits_manager;

        // unlimited -> bounded counts as a decrease
        assert!(manager.set_account_limits(
            &mut session,
            alice,
            Quota::Bounded(1000),
            Quota::Unlimited,
            Quota::Unlimited
        )?);
        assert!(!manager.set_account_limits(
            &mut session,
            alice,
            Quota::Bounded(2000),
            Quota::Unlimited,
            Quota::Unlimited
        )?);
        assert!(manager.set_account_limits(
            &mut session,
            alice,
            Quota::Bounded(500),
            Quota::Unlimited,
            Quota::Unlimited
        )?);
        assert!(!manager.set_account_limits(
            &mut session,
            alice,
            Quota::Unlimited,
            Quota::Unlimited,
            Quota::Unlimited
        )?);
        Ok(())
    }

    #[test]
    fn ram_quota_is_enforced_at_the_exact_boundary() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let manager = &chain.resource_limits_manager;
        manager.set_account_limits(
            &mut session,
            alice,
            Quota::Bounded(1000),
            Quota::Unlimited,
            Quota::Unlimited,
        )?;

        manager.add_pending_ram_usage(&mut session, alice, 600)?;
        manager.verify_account_ram_usage(&mut session, alice)?;

        manager.add_pending_ram_usage(&mut session, alice, 400)?;
        manager.verify_account_ram_usage(&mut session, alice)?;

        manager.add_pending_ram_usage(&mut session, alice, 1)?;
        assert_eq!(
            manager.verify_account_ram_usage(&mut session, alice),
            Err(ChainError::RamUsageExceeded(alice, 1001, 1000))
        );

        // freeing brings the ledger back under quota
        manager.add_pending_ram_usage(&mut session, alice, -1)?;
        manager.verify_account_ram_usage(&mut session, alice)?;
        assert_eq!(manager.get_account_ram_usage(&mut session, alice)?, 1000);
        Ok(())
    }

    #[test]
    fn ram_ledger_underflow_is_a_hard_error() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let manager = &chain.resource_limits_manager;

        manager.add_pending_ram_usage(&mut session, alice, 100)?;
        assert!(matches!(
            manager.add_pending_ram_usage(&mut session, alice, -200),
            Err(ChainError::TransactionError(_))
        ));
        // never clamped: the ledger still holds the last valid value
        assert_eq!(manager.get_account_ram_usage(&mut session, alice)?, 100);
        Ok(())
    }

    #[test]
    fn unlimited_ram_is_never_rejected() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let manager = &chain.resource_limits_manager;

        manager.add_pending_ram_usage(&mut session, alice, i64::MAX / 2)?;
        manager.verify_account_ram_usage(&mut session, alice)?;
        Ok(())
    }

    #[test]
    fn account_usage_is_capped_at_its_proportional_share() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let bob = chain.create_account(&mut session, "bob");
        chain.set_weights(&mut session, alice, Quota::Unlimited, Quota::Bounded(1));
        chain.set_weights(&mut session, bob, Quota::Unlimited, Quota::Bounded(999_999));
        chain
            .resource_limits_manager
            .process_account_limit_updates(&mut session)?;

        // alice holds one millionth of the weight: her share of the cpu
        // window is 200_000 * 172_800 / 1_000_000 = 34_560
        chain.push_usage(&mut session, alice, 30_000, 0, 1)?;

        let before = chain
            .resource_limits_manager
            .get_block_cpu_limit(&mut session)?;
        assert_eq!(
            chain.push_usage(&mut session, alice, 20_000, 0, 1),
            Err(ChainError::TxCpuUsageExceeded(alice))
        );
        // the rejected transaction left no trace
        assert_eq!(
            chain
                .resource_limits_manager
                .get_block_cpu_limit(&mut session)?,
            before
        );

        // bob holds nearly all the weight, so the same usage is fine
        chain.push_usage(&mut session, bob, 40_000, 0, 1)?;
        Ok(())
    }

    #[test]
    fn net_usage_is_capped_like_cpu() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let bob = chain.create_account(&mut session, "bob");
        chain.set_weights(&mut session, alice, Quota::Bounded(1), Quota::Unlimited);
        chain.set_weights(&mut session, bob, Quota::Bounded(999_999), Quota::Unlimited);
        chain
            .resource_limits_manager
            .process_account_limit_updates(&mut session)?;

        // alice's share of the net window: 1 MiB * 172_800 / 1_000_000 = 181_193
        assert_eq!(
            chain.push_usage(&mut session, alice, 0, 200_000, 1),
            Err(ChainError::TxNetUsageExceeded(alice))
        );
        chain.push_usage(&mut session, alice, 0, 150_000, 1)?;
        Ok(())
    }

    #[test]
    fn block_exhausts_after_exactly_floor_capacity_over_cost_transactions() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let payer = chain.create_account(&mut session, "payer");

        // virtual cpu limit opens at the floor of 200_000; at 30_000 per
        // transaction exactly six fit
        for i in 0..6 {
            chain
                .push_usage(&mut session, payer, 30_000, 0, 1)
                .unwrap_or_else(|e| panic!("transaction {} rejected: {}", i, e));
        }
        assert_eq!(
            chain.push_usage(&mut session, payer, 30_000, 0, 1),
            Err(ChainError::BlockResourceExhausted("cpu".to_string()))
        );
        assert_eq!(
            chain
                .resource_limits_manager
                .get_block_cpu_limit(&mut session)?,
            20_000
        );
        Ok(())
    }

    #[test]
    fn idle_block_expands_the_virtual_limit_one_ratio_step() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let payer = chain.create_account(&mut session, "payer");

        chain.push_usage(&mut session, payer, 180_000, 0, 1)?;
        chain
            .resource_limits_manager
            .process_block_usage(&mut session, 1)?;

        // the one-minute average is far below the 10% target, so the limit
        // relaxes: 200_000 * 1000 / 999 = 200_200
        assert_eq!(
            chain
                .resource_limits_manager
                .get_virtual_block_cpu_limit(&mut session)?,
            200_200
        );
        // pending usage was folded into the average and reset
        assert_eq!(
            chain
                .resource_limits_manager
                .get_block_cpu_limit(&mut session)?,
            200_200
        );
        Ok(())
    }

    #[test]
    fn sustained_congestion_contracts_back_to_the_floor() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let payer = chain.create_account(&mut session, "payer");
        let manager = &chain.resource_limits_manager;

        let floor = 200_000u64;
        let ceiling = floor * 1000;
        let mut saw_expansion = false;
        for ordinal in 1..=20u32 {
            chain.push_usage(&mut session, payer, floor, 0, ordinal)?;
            manager.process_block_usage(&mut session, ordinal)?;
            let virtual_limit = manager.get_virtual_block_cpu_limit(&mut session)?;
            assert!(virtual_limit >= floor && virtual_limit <= ceiling);
            if virtual_limit > floor {
                saw_expansion = true;
            }
        }
        // the average lags the load: the limit relaxes first, then the
        // controller claws it back to the guaranteed floor
        assert!(saw_expansion);
        assert_eq!(manager.get_virtual_block_cpu_limit(&mut session)?, floor);
        Ok(())
    }

    #[test]
    fn lazy_decay_read_reflects_idle_blocks() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");

        chain.push_usage(&mut session, alice, 150_000, 0, 1)?;
        let now = chain
            .resource_limits_manager
            .get_account_cpu_limit(&mut session, alice, Some(1))?;
        let later = chain
            .resource_limits_manager
            .get_account_cpu_limit(&mut session, alice, Some(200_000))?;
        assert!(now.used > 0);
        assert_eq!(later.used, 0);
        assert_eq!(later.available, later.max);
        Ok(())
    }

    #[test]
    fn snapshot_round_trips_with_identical_digest() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        let bob = chain.create_account(&mut session, "bob");
        let manager = &chain.resource_limits_manager;
        chain.set_weights(&mut session, alice, Quota::Bounded(10), Quota::Bounded(10));
        chain.set_weights(&mut session, bob, Quota::Bounded(30), Quota::Bounded(30));
        manager.process_account_limit_updates(&mut session)?;
        chain.push_usage(&mut session, alice, 10_000, 500, 1)?;
        manager.add_pending_ram_usage(&mut session, alice, 4096)?;
        manager.process_block_usage(&mut session, 1)?;

        let mut writer = SnapshotWriter::new();
        manager.add_to_snapshot(&session, &mut writer)?;
        let packed = writer.pack()?;
        let digest = writer.digest()?;

        // restore into a fresh database and dump again
        let restored = Testing::new();
        let mut restored_session = restored.db.undo_session()?;
        let mut reader = SnapshotReader::new(&packed)?;
        restored
            .resource_limits_manager
            .read_from_snapshot(&mut restored_session, &mut reader)?;

        let mut writer = SnapshotWriter::new();
        restored
            .resource_limits_manager
            .add_to_snapshot(&restored_session, &mut writer)?;
        assert_eq!(writer.digest()?, digest);

        assert_eq!(
            restored
                .resource_limits_manager
                .get_account_ram_usage(&mut restored_session, alice)?,
            4096
        );
        assert_eq!(
            restored
                .resource_limits_manager
                .get_total_cpu_weight(&mut restored_session)?,
            40
        );
        Ok(())
    }

    #[test]
    fn a_failed_block_rolls_back_to_open() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let payer = chain.create_account(&mut session, "payer");
        let manager = &chain.resource_limits_manager;

        let block_session = session.start_undo_session();
        chain.push_usage(&mut session, payer, 50_000, 1000, 1)?;
        chain.push_usage(&mut session, payer, 50_000, 1000, 1)?;

        // validation failed: the whole block unwinds, transaction sessions
        // included
        block_session.undo()?;
        assert_eq!(manager.get_block_cpu_limit(&mut session)?, 200_000);
        let limit = manager.get_account_cpu_limit(&mut session, payer, None)?;
        assert_eq!(limit.used, 0);
        Ok(())
    }
}
