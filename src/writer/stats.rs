use std::fmt;

/// Statistics for one writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records written into transactions (committed or not)
    pub records_written: usize,
    /// Records made visible by a successful commit
    pub records_committed: usize,
    /// Transactions committed
    pub transactions_committed: usize,
    /// Transaction batches fetched from the endpoint
    pub batches_opened: usize,
    /// Uncommitted records rolled back by an abort, a failure or close
    pub records_discarded: usize,
}

impl fmt::Display for WriterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Committed {} of {} records in {} transactions across {} batch(es)",
            self.records_committed,
            self.records_written,
            self.transactions_committed,
            self.batches_opened
        )?;
        if self.records_discarded > 0 {
            write!(f, ", {} discarded", self.records_discarded)?;
        }
        Ok(())
    }
}
