use crate::AddressRange;
use std::cmp::Ordering;
use thiserror::Error;

/// Generic map of physical address ranges to values of type `T`.
///
/// The ranges cannot overlap.
#[derive(Debug)]
pub struct AddressMap<T> {
    ordered_ranges: Vec<(AddressRange, T)>,
}

impl<T> Default for AddressMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AddressMap<T> {
    /// Create new empty map.
    pub fn new() -> Self {
        Self {
            ordered_ranges: Vec::new(),
        }
    }

    /// Returns the value that the address range containing `address` maps to, or `None` if no
    /// range contains `address`.
    pub fn value(&self, address: u64) -> Option<&T> {
        self.range_value(address).map(|(_, value)| value)
    }

    pub fn value_mut(&mut self, address: u64) -> Option<&mut T> {
        match self.search(address) {
            Ok(index) => Some(&mut self.ordered_ranges[index].1),
            Err(_) => None,
        }
    }

    /// Returns the address range that contains `address`, and the value that it maps to, or
    /// `None` if `address` is in a vacant region.
    pub fn range_value(&self, address: u64) -> Option<(AddressRange, &T)> {
        match self.search(address) {
            Ok(index) => {
                let (range, value) = &self.ordered_ranges[index];
                Some((*range, value))
            }
            Err(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AddressRange, T)> {
        self.ordered_ranges.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (AddressRange, T)> {
        self.ordered_ranges.iter_mut()
    }

    fn search(&self, address: u64) -> Result<usize, usize> {
        self.ordered_ranges.binary_search_by(|(range, _)| {
            if address < range.start() {
                Ordering::Greater
            } else if address > range.end() {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        })
    }
}

impl<T> TryFrom<Vec<(AddressRange, T)>> for AddressMap<T> {
    type Error = AddressMapError;

    fn try_from(mut value: Vec<(AddressRange, T)>) -> Result<Self, Self::Error> {
        value.sort_by_key(|(range, _)| range.start());

        let mut iter = value.iter();
        if let Some((mut prev_range, _)) = iter.next() {
            for &(range, _) in iter {
                if range.start() <= prev_range.end() {
                    return Err(AddressMapError::OverlappingAddressRanges);
                }
                prev_range = range;
            }
        }

        Ok(Self {
            ordered_ranges: value,
        })
    }
}

#[derive(Error, Debug)]
pub enum AddressMapError {
    /// Attempt to add an address range that overlaps with a previously added address range.
    #[error("address range overlaps with previously added address range")]
    OverlappingAddressRanges,
}

#[macro_export]
macro_rules! addr_map {
    ($([$start:expr, $end:expr] => $value:expr,)*) => {
        $crate::address_map::AddressMap::try_from(vec![
            $(($crate::address_range![$start, $end], $value)),*
        ]).unwrap()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let map = addr_map! {
            [0x0000, 0x0FFF] => 1,
            [0x4000, 0x7FFF] => 2,
        };
        assert_eq!(Some(&1), map.value(0x0000));
        assert_eq!(Some(&1), map.value(0x0FFF));
        assert_eq!(None, map.value(0x1000));
        assert_eq!(Some(&2), map.value(0x4000));
        assert_eq!(None, map.value(0x8000));
    }

    #[test]
    fn test_overlap_rejected() {
        let result = AddressMap::try_from(vec![
            (crate::address_range![0x0000, 0x0FFF], 1),
            (crate::address_range![0x0FFF, 0x1FFF], 2),
        ]);
        assert!(result.is_err());
    }
}
