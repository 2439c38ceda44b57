//! Trace replay driver
//!
//! Keeps the per-cpu tables and the object table current, then hands each entry
//! to [`SerialSections`]. Side tables are updated before dispatch so a lock or
//! access entry always sees the call-site, thread and objects in effect at its
//! timestamp.

use crate::config::SersecConfig;
use crate::cpu::CpuTables;
use crate::error::Result;
use crate::objects::ObjectTable;
use crate::serial::SerialSections;
use crate::trace::TraceEntry;
use tracing::info;

#[derive(Debug, Default)]
pub struct Analyzer {
    cpus: CpuTables,
    objects: ObjectTable,
    sections: SerialSections,
    entries_seen: u64,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::with_config(&SersecConfig::default())
    }

    pub fn with_config(config: &SersecConfig) -> Self {
        Self {
            cpus: CpuTables::new(),
            objects: ObjectTable::new(),
            sections: SerialSections::with_config(config),
            entries_seen: 0,
        }
    }

    /// Process one entry
    pub fn process(&mut self, entry: &TraceEntry) -> Result<()> {
        self.entries_seen += 1;
        self.cpus.observe(entry)?;
        self.objects.observe(entry);
        self.sections.handle(entry, &self.cpus, &self.objects)
    }

    /// Process entries in order, stopping at the first error
    pub fn run<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TraceEntry>,
    {
        for entry in entries {
            self.process(entry)?;
        }
        info!(
            "replayed {} entries into {} serial-section buckets ({} cycles)",
            self.entries_seen,
            self.sections.len(),
            self.sections.total_cycles()
        );
        Ok(())
    }

    pub fn entries_seen(&self) -> u64 {
        self.entries_seen
    }

    pub fn sections(&self) -> &SerialSections {
        &self.sections
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn into_sections(self) -> SerialSections {
        self.sections
    }
}
