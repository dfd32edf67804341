//! Memory address and address-range types.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address in the target's virtual address space
///
/// This wrapper around `u64` keeps addresses from being mixed up with sizes,
/// counts, or register values that happen to share the same integer type.
///
/// ## Example
///
/// ```rust
/// use rspd_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts).
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use rspd_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    #[must_use]
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Distance in bytes from `base` up to this address, if `base <= self`.
    #[must_use]
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

/// Half-open byte range `[start, start + len)` in the target address space
///
/// Range arithmetic is done in `u128` so a range ending exactly at the top of
/// the 64-bit address space does not overflow.
///
/// ```rust
/// use rspd_core::types::{Address, AddressRange};
///
/// let cached = AddressRange::new(Address::from(0x7000), 0x10);
/// let write = AddressRange::new(Address::from(0x700c), 8);
/// assert!(cached.intersects(&write));
/// assert!(!cached.contains(&write));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange
{
    /// First byte of the range
    pub start: Address,
    /// Number of bytes covered
    pub len: usize,
}

impl AddressRange
{
    /// Create a range of `len` bytes starting at `start`.
    #[must_use]
    pub const fn new(start: Address, len: usize) -> Self
    {
        Self { start, len }
    }

    /// One past the last byte, widened so it cannot overflow.
    #[must_use]
    pub fn end(&self) -> u128
    {
        u128::from(self.start.value()) + self.len as u128
    }

    /// Whether the range covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Whether `other` lies entirely inside this range.
    #[must_use]
    pub fn contains(&self, other: &AddressRange) -> bool
    {
        other.start >= self.start && other.end() <= self.end()
    }

    /// Whether the two ranges share at least one byte.
    #[must_use]
    pub fn intersects(&self, other: &AddressRange) -> bool
    {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        u128::from(self.start.value()) < other.end() && u128::from(other.start.value()) < self.end()
    }

    /// Whether `address` falls inside this range.
    #[must_use]
    pub fn contains_address(&self, address: Address) -> bool
    {
        address >= self.start && u128::from(address.value()) < self.end()
    }
}

impl fmt::Display for AddressRange
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}+{:#x}", self.start, self.len)
    }
}
