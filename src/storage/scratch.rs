use crate::error::StorageError;
use crate::storage::WriteCommand;

/// Largest entry size (4 GiB) a writer will address
pub const MAX_ENTRY_SIZE: u64 = 1 << 32;

/// Pending content of a writable stream
///
/// Starts empty. `original_len` is the committed size of the entry when the
/// writer was opened; growth past it is what counts against the quota.
#[derive(Debug, Default)]
pub(crate) struct ScratchBuffer {
    data: Vec<u8>,
    cursor: u64,
    original_len: u64,
}

impl ScratchBuffer {
    pub(crate) fn new(original_len: u64) -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
            original_len,
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Apply `command`, refusing growth beyond `available` bytes when a quota is set
    pub(crate) fn apply(
        &mut self,
        command: WriteCommand,
        available: Option<u64>,
    ) -> Result<(), StorageError> {
        match command {
            WriteCommand::Data(data) => self.write_at(self.cursor, &data, available),
            WriteCommand::Write { position, data } => {
                let position = position.unwrap_or(self.cursor);
                self.write_at(position, &data, available)
            }
            WriteCommand::Seek { position } => {
                check_offset("seek position", position)?;
                self.cursor = position;
                Ok(())
            }
            WriteCommand::Truncate { size } => {
                check_offset("truncate size", size)?;
                self.check_quota(size, available)?;
                self.data.resize(to_index(size)?, 0);
                self.cursor = self.cursor.min(size);
                Ok(())
            }
        }
    }

    fn write_at(
        &mut self,
        position: u64,
        data: &[u8],
        available: Option<u64>,
    ) -> Result<(), StorageError> {
        check_offset("write position", position)?;
        let end = position
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_ENTRY_SIZE)
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "write of {} bytes at {} exceeds the maximum entry size",
                    data.len(),
                    position
                ))
            })?;

        let new_len = end.max(self.data.len() as u64);
        self.check_quota(new_len, available)?;

        let start = to_index(position)?;
        if start > self.data.len() {
            self.data.resize(start, 0);
        }
        let end = to_index(end)?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        self.cursor = end as u64;
        Ok(())
    }

    fn check_quota(&self, new_len: u64, available: Option<u64>) -> Result<(), StorageError> {
        let Some(available) = available else {
            return Ok(());
        };
        let growth = new_len.saturating_sub(self.original_len);
        if growth > available {
            return Err(StorageError::QuotaExceeded {
                requested: growth,
                available,
            });
        }
        Ok(())
    }
}

fn check_offset(what: &str, offset: u64) -> Result<(), StorageError> {
    if offset > MAX_ENTRY_SIZE {
        return Err(StorageError::InvalidArgument(format!(
            "{what} {offset} exceeds the maximum entry size"
        )));
    }
    Ok(())
}

fn to_index(offset: u64) -> Result<usize, StorageError> {
    usize::try_from(offset)
        .map_err(|_| StorageError::InvalidArgument(format!("offset {offset} is not addressable")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_writes_advance_cursor() {
        let mut scratch = ScratchBuffer::new(0);
        scratch.apply("ad".into(), None).unwrap();
        scratch.apply("d".into(), None).unwrap();
        assert_eq!(scratch.data(), b"add");
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut scratch = ScratchBuffer::new(0);
        scratch
            .apply(
                WriteCommand::Write {
                    position: Some(2),
                    data: b"x".to_vec(),
                },
                None,
            )
            .unwrap();
        assert_eq!(scratch.data(), &[0, 0, b'x']);
    }

    #[test]
    fn test_seek_then_overwrite() {
        let mut scratch = ScratchBuffer::new(0);
        scratch.apply("hello".into(), None).unwrap();
        scratch.apply(WriteCommand::Seek { position: 1 }, None).unwrap();
        scratch.apply("EL".into(), None).unwrap();
        assert_eq!(scratch.data(), b"hELlo");
    }

    #[test]
    fn test_truncate_shrinks_and_clamps_cursor() {
        let mut scratch = ScratchBuffer::new(0);
        scratch.apply("hello".into(), None).unwrap();
        scratch.apply(WriteCommand::Truncate { size: 2 }, None).unwrap();
        scratch.apply("!".into(), None).unwrap();
        assert_eq!(scratch.data(), b"he!");
    }

    #[test]
    fn test_quota_counts_growth_past_original_size() {
        // Rewriting within the committed size needs no quota
        let mut scratch = ScratchBuffer::new(3);
        scratch.apply("add".into(), Some(0)).unwrap();

        let err = scratch.apply("more".into(), Some(2)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                requested: 4,
                available: 2
            }
        ));
        assert_eq!(scratch.data(), b"add");
    }

    #[test]
    fn test_out_of_range_offsets_are_invalid() {
        let mut scratch = ScratchBuffer::new(0);
        let err = scratch
            .apply(
                WriteCommand::Truncate {
                    size: MAX_ENTRY_SIZE + 1,
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));

        let err = scratch
            .apply(
                WriteCommand::Write {
                    position: Some(MAX_ENTRY_SIZE),
                    data: b"x".to_vec(),
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }
}
