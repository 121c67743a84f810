use std::fmt;

/// Disk I/O counters: reads, writes and seeks.
///
/// A new seek is counted when an I/O touches a different file than the last
/// one, or a block that is not adjacent (distance greater than one) to the
/// last block visited.
#[derive(Debug, Default)]
pub struct IoProfiler {
    num_seeks: u64,
    num_disk_reads: u64,
    num_disk_writes: u64,
    last: Option<(usize, u32)>,
}

impl IoProfiler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn seeks(&self) -> u64 {
        self.num_seeks
    }

    pub fn disk_reads(&self) -> u64 {
        self.num_disk_reads
    }

    pub fn disk_writes(&self) -> u64 {
        self.num_disk_writes
    }

    pub fn total_io(&self) -> u64 {
        self.num_disk_reads + self.num_disk_writes
    }

    pub(crate) fn record_read(&mut self, file: usize, blk_nr: u32) {
        self.count_seek_maybe(file, blk_nr);
        self.num_disk_reads += 1;
    }

    pub(crate) fn record_write(&mut self, file: usize, blk_nr: u32) {
        self.count_seek_maybe(file, blk_nr);
        self.num_disk_writes += 1;
    }

    fn count_seek_maybe(&mut self, file: usize, blk_nr: u32) {
        let adjacent = match self.last {
            Some((last_file, last_blk)) => {
                file == last_file && (i64::from(blk_nr) - i64::from(last_blk)).abs() <= 1
            }
            None => false,
        };
        if !adjacent {
            self.num_seeks += 1;
        }
        self.last = Some((file, blk_nr));
    }
}

impl fmt::Display for IoProfiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Number of disk seeks/reads/writes/IOs: {}/{}/{}/{}",
            self.num_seeks,
            self.num_disk_reads,
            self.num_disk_writes,
            self.total_io()
        )
    }
}
