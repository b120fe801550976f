use crate::{error::Result, row_source::Row};

/// Collapses runs of rows sharing the same key column into their first row.
///
/// Only the previous row's key is remembered, so the input must already be
/// grouped by key (shapes.txt lists all points of one shape together). A key
/// that shows up again after a different key starts a new run and is yielded
/// again; nothing here detects that.
pub struct ContiguousDedup<I> {
    rows: I,
    key_column: &'static str,
    previous_key: Option<Option<String>>,
}

impl<I> ContiguousDedup<I>
where
    I: Iterator<Item = Result<Row>>,
{
    pub fn new(rows: I, key_column: &'static str) -> Self {
        ContiguousDedup {
            rows,
            key_column,
            previous_key: None,
        }
    }
}

impl<I> Iterator for ContiguousDedup<I>
where
    I: Iterator<Item = Result<Row>>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };
            let key = row.text(self.key_column);
            if self.previous_key.as_ref() == Some(&key) {
                continue;
            }
            self.previous_key = Some(key);
            return Some(Ok(row));
        }
    }
}
