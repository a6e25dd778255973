//! Value assignment shared by enum members, channels and messages.
//!
//! Unvalued entries take `previous + 1`, starting at 0; an explicit value
//! resets the running counter. Flag sets use the next power of two instead.

/// Assigns sequential values. Returns the index of the first entry whose
/// value cannot be represented when the counter runs past `u64::MAX`.
pub fn assign_sequential<I>(explicit: I) -> Result<Vec<u64>, usize>
where
    I: IntoIterator<Item = Option<u64>>,
{
    let mut next = Some(0u64);
    let mut values = Vec::new();
    for (idx, value) in explicit.into_iter().enumerate() {
        let value = match value {
            Some(v) => v,
            None => next.ok_or(idx)?,
        };
        next = value.checked_add(1);
        values.push(value);
    }
    Ok(values)
}

/// Assigns flag bits: unvalued members take the next power of two above the
/// previous member's value, starting at 1.
pub fn assign_flag_bits<I>(explicit: I) -> Result<Vec<u64>, usize>
where
    I: IntoIterator<Item = Option<u64>>,
{
    let mut next = Some(1u64);
    let mut values = Vec::new();
    for (idx, value) in explicit.into_iter().enumerate() {
        let value = match value {
            Some(v) => v,
            None => next.ok_or(idx)?,
        };
        next = value
            .checked_add(1)
            .and_then(|v| v.checked_next_power_of_two());
        values.push(value);
    }
    Ok(values)
}

/// Returns `(first, second)` indices of the first repeated value.
pub fn find_duplicate(values: &[u64]) -> Option<(usize, usize)> {
    let mut seen = std::collections::HashMap::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate() {
        if let Some(first) = seen.insert(*value, idx) {
            return Some((first, idx));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_gaps_after_explicit_values() {
        let values = assign_sequential([None, Some(1), None, Some(10), None]).unwrap();
        assert_eq!(values, vec![0, 1, 2, 10, 11]);
    }

    #[test]
    fn draw_then_invalidate() {
        let values = assign_sequential([Some(1), None]).unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn overflow_is_reported_at_the_unvalued_entry() {
        let err = assign_sequential([Some(u64::MAX), None]).unwrap_err();
        assert_eq!(err, 1);
        assert_eq!(assign_sequential([Some(u64::MAX)]).unwrap(), vec![u64::MAX]);
    }

    #[test]
    fn flag_bits() {
        let values = assign_flag_bits([None, None, Some(0x10), None, Some(3), None]).unwrap();
        assert_eq!(values, vec![1, 2, 0x10, 0x20, 3, 4]);
    }

    #[test]
    fn duplicates() {
        assert_eq!(find_duplicate(&[0, 1, 2]), None);
        assert_eq!(find_duplicate(&[4, 1, 4]), Some((0, 2)));
        let values = assign_sequential([Some(2), Some(1), None]).unwrap();
        assert_eq!(find_duplicate(&values), Some((0, 2)));
    }
}
