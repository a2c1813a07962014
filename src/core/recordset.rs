/// Cursor over the rows returned by a routed select
use crate::core::backend::RowSet;
use crate::core::{FetchMode, Record, Role, Value};

/// A forward cursor positioned at the first row
#[derive(Debug, Clone)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    mode: FetchMode,
    position: usize,
    served_by: Role,
}

impl RecordSet {
    pub fn new(rows: RowSet, mode: FetchMode, served_by: Role) -> Self {
        Self {
            columns: rows.columns,
            rows: rows.rows,
            mode,
            position: 0,
            served_by,
        }
    }

    /// True once the cursor has moved past the last row
    pub fn eof(&self) -> bool {
        self.position >= self.rows.len()
    }

    /// Current row, shaped by the fetch mode
    pub fn fields(&self) -> Option<Record> {
        self.rows
            .get(self.position)
            .map(|row| Record::shape(&self.columns, row, self.mode))
    }

    /// Column of the current row by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.rows.get(self.position)?.get(index)
    }

    /// Advance; returns false when the cursor reaches the end
    pub fn move_next(&mut self) -> bool {
        if self.position < self.rows.len() {
            self.position += 1;
        }
        !self.eof()
    }

    pub fn move_first(&mut self) {
        self.position = 0;
    }

    pub fn record_count(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Role of the backend that produced the rows
    pub fn served_by(&self) -> Role {
        self.served_by
    }

    /// Keep `limit` rows starting at `offset`
    pub(crate) fn window(mut self, limit: Option<usize>, offset: usize) -> Self {
        let start = offset.min(self.rows.len());
        self.rows.drain(..start);
        if let Some(limit) = limit {
            self.rows.truncate(limit);
        }
        self.position = 0;
        self
    }
}

impl Iterator for RecordSet {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let record = self.fields()?;
        self.position += 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> RowSet {
        RowSet::new(
            vec!["id".to_string(), "col1".to_string()],
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(2), Value::Int(20)],
                vec![Value::Int(3), Value::Int(30)],
            ],
        )
    }

    #[test]
    fn test_cursor_starts_at_first_row() {
        let mut rs = RecordSet::new(rows(), FetchMode::Assoc, Role::Replica);
        assert!(!rs.eof());
        assert_eq!(rs.field("col1"), Some(&Value::Int(10)));

        assert!(rs.move_next());
        assert_eq!(rs.field("col1"), Some(&Value::Int(20)));
        assert!(rs.move_next());
        assert!(!rs.move_next());
        assert!(rs.eof());
        assert!(rs.fields().is_none());

        rs.move_first();
        assert_eq!(rs.fields().unwrap().get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_empty_cursor() {
        let rs = RecordSet::new(RowSet::default(), FetchMode::Assoc, Role::Primary);
        assert!(rs.eof());
        assert_eq!(rs.record_count(), 0);
    }

    #[test]
    fn test_window() {
        let rs = RecordSet::new(rows(), FetchMode::Num, Role::Primary).window(Some(1), 1);
        let collected: Vec<Record> = rs.collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].get("1"), Some(&Value::Int(20)));

        let rs = RecordSet::new(rows(), FetchMode::Assoc, Role::Primary).window(None, 10);
        assert!(rs.eof());
    }
}
