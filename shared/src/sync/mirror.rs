use crate::filter::DateRange;
use crate::model::{Record, RecordFields, RecordId, RecordKey};

/// In-memory, UI-facing copy of one collection. Front of the list is newest.
#[derive(Debug, Clone, PartialEq)]
pub struct Mirror<T> {
    records: Vec<Record<T>>,
}

impl<T> Default for Mirror<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

fn matches_key<T>(record: &Record<T>, key: &RecordKey) -> bool {
    match key {
        RecordKey::Remote(id) => record.id.as_ref() == Some(id),
        RecordKey::Local(local_id) => record.id.is_none() && &record.local_id == local_id,
    }
}

impl<T: RecordFields> Mirror<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_remote(records: Vec<Record<T>>) -> Self {
        let mut mirror = Self::new();
        mirror.replace_all(records);
        mirror
    }

    #[must_use]
    pub fn records(&self) -> &[Record<T>] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn position(&self, key: &RecordKey) -> Option<usize> {
        self.records.iter().position(|r| matches_key(r, key))
    }

    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record<T>> {
        self.records.iter().find(|r| matches_key(r, key))
    }

    pub fn get_mut(&mut self, key: &RecordKey) -> Option<&mut Record<T>> {
        self.records.iter_mut().find(|r| matches_key(r, key))
    }

    /// Optimistic inserts always land at the front, whatever their date.
    pub fn prepend(&mut self, record: Record<T>) {
        self.records.insert(0, record);
    }

    /// Prepends a batch in one step, keeping the batch's own order.
    pub fn prepend_all(&mut self, records: Vec<Record<T>>) {
        if records.is_empty() {
            return;
        }
        let mut merged = records;
        merged.append(&mut self.records);
        self.records = merged;
    }

    /// Replaces the record at `key` in place. Returns `false` if absent.
    pub fn replace(&mut self, key: &RecordKey, record: Record<T>) -> bool {
        match self.position(key) {
            Some(index) => {
                self.records[index] = record;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &RecordKey) -> Option<Record<T>> {
        let index = self.position(key)?;
        Some(self.records.remove(index))
    }

    /// Removes every synced record in `ids`. Returns how many were removed.
    pub fn remove_ids(&mut self, ids: &[RecordId]) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| r.id.as_ref().map_or(true, |id| !ids.contains(id)));
        before - self.records.len()
    }

    /// Adopts an authoritative listing, ordered by creation time descending.
    pub fn replace_all(&mut self, mut records: Vec<Record<T>>) {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.records = records;
    }

    pub fn filtered<'a>(
        &'a self,
        range: &'a DateRange,
    ) -> impl Iterator<Item = &'a Record<T>> + 'a {
        self.records.iter().filter(move |r| range.matches(*r))
    }

    /// Ids of synced records in the filtered view, in view order.
    #[must_use]
    pub fn synced_ids_in(&self, range: &DateRange) -> Vec<RecordId> {
        self.filtered(range).filter_map(|r| r.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, Task, Transaction, UnixTimeMs};
    use chrono::NaiveDate;

    fn task(id: &str, created: u64, text: &str) -> Record<Task> {
        Record::synced(RecordId::new(id), None, UnixTimeMs(created), Task::new(text).unwrap())
    }

    fn ids(mirror: &Mirror<Task>) -> Vec<String> {
        mirror
            .records()
            .iter()
            .map(|r| r.id.as_ref().map_or_else(|| "?".into(), ToString::to_string))
            .collect()
    }

    #[test]
    fn test_from_remote_sorts_newest_first() {
        let mirror = Mirror::from_remote(vec![
            task("1", 10, "a"),
            task("3", 30, "c"),
            task("2", 20, "b"),
        ]);
        assert_eq!(ids(&mirror), vec!["3", "2", "1"]);
    }

    #[test]
    fn test_prepend_ignores_chronology() {
        let mut mirror = Mirror::from_remote(vec![task("2", 20, "b")]);
        mirror.prepend(task("1", 10, "older"));
        assert_eq!(ids(&mirror), vec!["1", "2"]);
    }

    #[test]
    fn test_prepend_all_keeps_batch_order() {
        let mut mirror = Mirror::from_remote(vec![task("9", 90, "x")]);
        mirror.prepend_all(vec![task("1", 1, "a"), task("2", 2, "b"), task("3", 3, "c")]);
        assert_eq!(ids(&mirror), vec!["1", "2", "3", "9"]);
    }

    #[test]
    fn test_placeholder_addressed_by_local_key() {
        let mut mirror = Mirror::from_remote(vec![task("1", 1, "a")]);
        let placeholder = Record::placeholder(Task::new("new").unwrap(), None, UnixTimeMs(5));
        let key = placeholder.key();
        mirror.prepend(placeholder);

        assert_eq!(mirror.position(&key), Some(0));
        assert!(mirror.replace(&key, task("2", 5, "new")));
        assert_eq!(mirror.position(&key), None);
        assert_eq!(ids(&mirror), vec!["2", "1"]);
    }

    #[test]
    fn test_remove_ids_leaves_placeholders() {
        let mut mirror = Mirror::from_remote(vec![task("1", 1, "a"), task("2", 2, "b")]);
        mirror.prepend(Record::placeholder(Task::new("p").unwrap(), None, UnixTimeMs(3)));

        let removed = mirror.remove_ids(&[RecordId::new("1"), RecordId::new("7")]);

        assert_eq!(removed, 1);
        assert_eq!(ids(&mirror), vec!["?", "2"]);
    }

    #[test]
    fn test_synced_ids_in_range() {
        let d = |day: u32| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let tx = |id: &str, day: u32| {
            Record::synced(
                RecordId::new(id),
                None,
                UnixTimeMs(u64::from(day)),
                Transaction::new(d(day), "x", 1, EntryKind::Expense).unwrap(),
            )
        };
        let mut mirror = Mirror::from_remote(vec![tx("1", 1), tx("2", 10), tx("3", 20)]);
        mirror.prepend(Record::placeholder(
            Transaction::new(d(15), "p", 1, EntryKind::Expense).unwrap(),
            None,
            UnixTimeMs(99),
        ));

        let range = DateRange {
            start: Some(d(5)),
            end: Some(d(25)),
        };

        assert_eq!(mirror.synced_ids_in(&range), vec![RecordId::new("3"), RecordId::new("2")]);
        assert_eq!(mirror.filtered(&range).count(), 3);
    }
}
