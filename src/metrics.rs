//! Write statistics for an archive session
//!
//! Counts what a context has put on disk, for progress reporting by
//! import tools.

/// Counters for one archive context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Result records written (marks excluded)
    pub results: u64,
    /// Mark records written
    pub marks: u64,
    /// Metadata records written
    pub metadata_records: u64,
    /// Metadata records found already on disk and skipped
    pub metadata_reused: u64,
    /// Temporal index entries written
    pub index_entries: u64,
    /// Data volumes started after the first
    pub volume_switches: u64,
    /// Bytes appended to data volumes, labels excluded
    pub data_bytes: u64,
    /// Bytes appended to the metadata volume
    pub meta_bytes: u64,
}

impl WriteStats {
    /// Create new counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a data volume write
    pub fn record_data(&mut self, bytes: usize, mark: bool) {
        if mark {
            self.marks += 1;
        } else {
            self.results += 1;
        }
        self.data_bytes += bytes as u64;
    }

    /// Record a metadata write
    pub fn record_meta(&mut self, bytes: usize) {
        self.metadata_records += 1;
        self.meta_bytes += bytes as u64;
    }

    /// Average encoded result size in bytes
    pub fn average_record_size(&self) -> f64 {
        let records = self.results + self.marks;
        if records == 0 {
            return 0.0;
        }
        self.data_bytes as f64 / records as f64
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Archive Write Statistics ===\n\n");
        report.push_str(&format!("Results written: {}\n", self.results));
        report.push_str(&format!("Marks written: {}\n", self.marks));
        report.push_str(&format!(
            "Metadata records: {} written, {} reused\n",
            self.metadata_records, self.metadata_reused
        ));
        report.push_str(&format!("Index entries: {}\n", self.index_entries));
        report.push_str(&format!("Volume switches: {}\n", self.volume_switches));
        report.push_str(&format!("Data bytes: {}\n", self.data_bytes));
        report.push_str(&format!("Metadata bytes: {}\n", self.meta_bytes));
        report.push_str(&format!(
            "Average record size: {:.1} bytes\n",
            self.average_record_size()
        ));

        report
    }
}
