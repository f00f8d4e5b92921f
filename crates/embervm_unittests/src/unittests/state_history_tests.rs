#[cfg(test)]
mod state_history_tests {
    use anyhow::Result;
    use embervm_chainbase::TableDelta;
    use embervm_core::{chain::resource::Quota, state_history::StateHistoryLog};
    use embervm_serialization::{Read, Write};

    use crate::tests::Testing;

    #[test]
    fn block_deltas_round_trip_through_the_log() -> Result<()> {
        let chain = Testing::new();
        let mut session = chain.start();
        let alice = chain.create_account(&mut session, "alice");
        chain.set_weights(&mut session, alice, Quota::Bounded(1), Quota::Bounded(1));
        chain
            .resource_limits_manager
            .process_account_limit_updates(&mut session)?;
        chain.push_usage(&mut session, alice, 1000, 100, 1)?;
        chain
            .resource_limits_manager
            .process_block_usage(&mut session, 1)?;

        let deltas = session.collect_deltas()?;
        let tables: Vec<&str> = deltas.iter().map(|d| d.table.as_str()).collect();
        assert!(tables.contains(&"resource_limits_state"));
        assert!(tables.contains(&"account_limits"));
        assert!(tables.contains(&"account_usage"));
        // tables arrive sorted by name so the payload is deterministic
        let mut sorted = tables.clone();
        sorted.sort_unstable();
        assert_eq!(tables, sorted);

        // the staged limit row was erased when the update folded in
        let limits = deltas.iter().find(|d| d.table == "account_limits").unwrap();
        assert!(limits.rows.iter().any(|r| !r.present));
        assert!(limits.rows.iter().any(|r| r.present));

        let payload = deltas.pack()?;
        let dir = tempfile::tempdir()?;
        let mut log = StateHistoryLog::open(dir.path(), "resource")?;
        log.append(1, &payload)?;

        let read_back = log.read_block(1)?;
        let mut pos = 0;
        let decoded = Vec::<TableDelta>::read(&read_back, &mut pos)?;
        assert_eq!(decoded, deltas);
        Ok(())
    }
}
