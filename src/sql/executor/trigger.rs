use tracing::debug;

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        executor::expression::{Scope, row_matches_where},
        parser::{parse_sql, parse_where_expression},
        plan::Plan,
        schema::{Table, Trigger, TriggerEvent, TriggerTiming},
        types::{ColumnRef, Row},
    },
};

/// Fires the table's triggers for one row change. `old` and `new` are
/// bound as the `OLD` and `NEW` pseudo-rows of the WHEN condition and the
/// body statements.
pub fn fire<T: Transaction + 'static>(
    txn: &mut T,
    table: &Table,
    timing: TriggerTiming,
    event: TriggerEvent,
    old: Option<&Row>,
    new: Option<&Row>,
) -> Result<()> {
    let triggers: Vec<Trigger> = table.triggers_for(timing, event).cloned().collect();
    if triggers.is_empty() {
        return Ok(());
    }

    let mut columns = Vec::new();
    let mut row = Vec::new();
    for (qualifier, values) in [("OLD", old), ("NEW", new)] {
        if let Some(values) = values {
            columns.extend(
                table
                    .columns
                    .iter()
                    .map(|c| ColumnRef::new(Some(qualifier.to_string()), c.name.clone())),
            );
            row.extend(values.iter().cloned());
        }
    }
    let scope = Scope::new(&columns, &row, None);

    txn.enter_trigger()?;
    let result = run_triggers(txn, &triggers, &scope);
    txn.exit_trigger();
    result
}

fn run_triggers<T: Transaction + 'static>(
    txn: &mut T,
    triggers: &[Trigger],
    scope: &Scope<'_>,
) -> Result<()> {
    for trigger in triggers {
        if let Some(when) = &trigger.when {
            let condition = parse_where_expression(when)?;
            if !row_matches_where(&condition, scope, txn)? {
                continue;
            }
        }
        debug!(
            trigger = %trigger.name,
            table = %trigger.table_name,
            "{} {} trigger fired",
            trigger.timing,
            trigger.event
        );
        for sql in &trigger.body {
            let stmt = parse_sql(sql, &[])?;
            let result = Plan::build(stmt)?.execute_in(txn, Some(scope))?;
            txn.record_changes(result.changes());
        }
    }
    Ok(())
}
