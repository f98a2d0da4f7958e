use serde::{Deserialize, Serialize};

use crate::model::{EntryKind, Record, Task, Transaction};

/// Totals over a set of transactions, usually the currently filtered view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub income: i64,
    pub expense: i64,
    pub balance: i64,
    pub count: usize,
}

impl Summary {
    pub fn of<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record<Transaction>>,
    {
        let mut summary = Self::default();
        for record in records {
            let tx = &record.fields;
            match tx.kind {
                EntryKind::Income => summary.income = summary.income.saturating_add(tx.amount),
                EntryKind::Expense => summary.expense = summary.expense.saturating_add(tx.amount),
            }
            summary.count += 1;
        }
        summary.balance = summary.income.saturating_sub(summary.expense);
        summary
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
}

impl TaskSummary {
    pub fn of<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record<Task>>,
    {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            if record.fields.completed {
                summary.completed += 1;
            } else {
                summary.pending += 1;
            }
        }
        summary
    }
}
