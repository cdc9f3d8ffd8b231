//! Part size validation for multipart sessions

use super::error::{UpyunError, UpyunResult};
use super::types::PartPlan;
use super::{DEFAULT_PART_SIZE, MAX_PART_NUM};

/// Derive the part layout for a payload of `total_size` bytes
///
/// A requested size of 0 selects [`DEFAULT_PART_SIZE`]. Sizes must be a
/// whole multiple of the base unit and the resulting part count may not
/// exceed [`MAX_PART_NUM`].
pub fn plan_parts(requested_part_size: u64, total_size: u64) -> UpyunResult<PartPlan> {
    let part_size = if requested_part_size == 0 {
        DEFAULT_PART_SIZE
    } else {
        requested_part_size
    };

    if part_size < DEFAULT_PART_SIZE {
        return Err(UpyunError::Validation(format!(
            "part size {} is below the minimum of {}",
            part_size, DEFAULT_PART_SIZE
        )));
    }

    if part_size % DEFAULT_PART_SIZE != 0 {
        return Err(UpyunError::Validation(format!(
            "part size {} must be a multiple of {}",
            part_size, DEFAULT_PART_SIZE
        )));
    }

    let part_count = total_size.div_ceil(part_size);
    if part_count > MAX_PART_NUM {
        return Err(UpyunError::Validation(format!(
            "{} parts exceed the maximum part number {}",
            part_count, MAX_PART_NUM
        )));
    }

    Ok(PartPlan {
        part_size,
        part_count,
    })
}
