//! Newline-delimited-JSON trace reader: the one concrete [`TraceStream`]
//! this binary ships. Each line is one record; unrecognized fields are
//! ignored so traces can carry extra metadata the simulator doesn't need.

use std::io::BufRead;

use cachesim_core::{MarkerKind, MemRef, TraceStream};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawRecord {
    InstrFetch { tid: u64, pc: u64, size: u32 },
    Read { tid: u64, pc: u64, addr: u64, size: u32 },
    Write { tid: u64, pc: u64, addr: u64, size: u32 },
    InstrPrefetch { tid: u64, pc: u64, size: u32 },
    DataPrefetch { tid: u64, pc: u64, addr: u64, size: u32 },
    InstrFlush { tid: u64, addr: u64, size: u32 },
    DataFlush { tid: u64, addr: u64, size: u32 },
    ThreadExit { tid: u64 },
    InstrNoFetch,
    Marker { kind: String, value: u64 },
}

impl From<RawRecord> for MemRef {
    fn from(raw: RawRecord) -> Self {
        match raw {
            RawRecord::InstrFetch { tid, pc, size } => Self::InstrFetch { tid, pc, size },
            RawRecord::Read { tid, pc, addr, size } => Self::Read { tid, pc, addr, size },
            RawRecord::Write { tid, pc, addr, size } => Self::Write { tid, pc, addr, size },
            RawRecord::InstrPrefetch { tid, pc, size } => Self::InstrPrefetch { tid, pc, size },
            RawRecord::DataPrefetch { tid, pc, addr, size } => {
                Self::DataPrefetch { tid, pc, addr, size }
            }
            RawRecord::InstrFlush { tid, addr, size } => Self::InstrFlush { tid, addr, size },
            RawRecord::DataFlush { tid, addr, size } => Self::DataFlush { tid, addr, size },
            RawRecord::ThreadExit { tid } => Self::ThreadExit { tid },
            RawRecord::InstrNoFetch => Self::InstrNoFetch,
            RawRecord::Marker { kind, value } => Self::Marker {
                kind: if kind == "cpu_id" {
                    MarkerKind::CpuId
                } else {
                    MarkerKind::Other(value as u32)
                },
                value,
            },
        }
    }
}

/// Reads one [`MemRef`] per line from a JSONL file.
pub struct JsonlTraceReader {
    lines: std::io::Lines<std::io::BufReader<std::fs::File>>,
    shard_index: u32,
}

impl JsonlTraceReader {
    /// Open `path` for reading. Fails the same way any file open can fail;
    /// the caller maps that into the CLI's own exit-code convention.
    pub fn open(path: &std::path::Path, shard_index: u32) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self {
            lines: std::io::BufReader::new(file).lines(),
            shard_index,
        })
    }
}

impl TraceStream for JsonlTraceReader {
    fn current_shard_index(&self) -> u32 {
        self.shard_index
    }

    fn next_record(&mut self) -> Option<MemRef> {
        loop {
            let line = self.lines.next()?.ok()?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(&line) {
                Ok(raw) => return Some(raw.into()),
                Err(err) => {
                    tracing::warn!(%err, %line, "skipping malformed trace record");
                }
            }
        }
    }
}
