//! CTZ skip-list index arithmetic.
//!
//! A file's data blocks form a backwards skip-list: the block at list
//! index `n` (n >= 1) begins with `ctz(n) + 1` little-endian u32 pointers,
//! where pointer `k` addresses the block at index `n - 2^k`. Block 0 is
//! pure data. The structure record stores the *last* block of the list
//! (`head`) plus the total file size; everything else is derived.

use lfsr_types::ParseError;

/// Number of back-pointer words stored at the start of list block `index`.
#[must_use]
pub fn pointer_words(index: u32) -> u32 {
    if index == 0 {
        0
    } else {
        index.trailing_zeros() + 1
    }
}

/// Data bytes held by list block `index`.
pub fn data_capacity(index: u32, block_size: u32) -> Result<u32, ParseError> {
    let pointer_bytes = pointer_words(index) * 4;
    if pointer_bytes >= block_size {
        return Err(ParseError::InvalidField {
            field: "block_size",
            reason: "too small for skip-list pointers",
        });
    }
    Ok(block_size - pointer_bytes)
}

/// Number of list blocks a file of `size` bytes occupies.
pub fn block_count_for_size(size: u32, block_size: u32) -> Result<u32, ParseError> {
    if size == 0 {
        return Ok(0);
    }
    let mut remaining = u64::from(size);
    let mut index = 0_u32;
    loop {
        remaining = remaining.saturating_sub(u64::from(data_capacity(index, block_size)?));
        index = index.checked_add(1).ok_or(ParseError::IntegerConversion {
            field: "ctz_block_count",
        })?;
        if remaining == 0 {
            return Ok(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_words_follow_trailing_zeros() {
        assert_eq!(pointer_words(0), 0);
        assert_eq!(pointer_words(1), 1);
        assert_eq!(pointer_words(2), 2);
        assert_eq!(pointer_words(3), 1);
        assert_eq!(pointer_words(4), 3);
        assert_eq!(pointer_words(8), 4);
        assert_eq!(pointer_words(12), 3);
    }

    #[test]
    fn capacities_shrink_with_pointer_count() {
        assert_eq!(data_capacity(0, 512).unwrap(), 512);
        assert_eq!(data_capacity(1, 512).unwrap(), 508);
        assert_eq!(data_capacity(2, 512).unwrap(), 504);
        assert_eq!(data_capacity(4, 512).unwrap(), 500);
        assert!(data_capacity(8, 16).is_err());
    }

    #[test]
    fn block_count_matches_capacity_sums() {
        assert_eq!(block_count_for_size(0, 512).unwrap(), 0);
        assert_eq!(block_count_for_size(1, 512).unwrap(), 1);
        assert_eq!(block_count_for_size(512, 512).unwrap(), 1);
        assert_eq!(block_count_for_size(513, 512).unwrap(), 2);
        // 512 + 508 bytes fit exactly in two blocks.
        assert_eq!(block_count_for_size(1020, 512).unwrap(), 2);
        assert_eq!(block_count_for_size(1021, 512).unwrap(), 3);
    }
}
